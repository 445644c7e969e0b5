//! 落库前的 payload 脱敏
//!
//! order_events.raw_payload_json 永久保留，任何敏感字段都不允许进入事件流。

use serde_json::Value;

/// 命中即整体移除的敏感键（大小写不敏感）
const SENSITIVE_KEYS: [&str; 6] = [
    "token",
    "secret",
    "signature",
    "api_key",
    "password",
    "authorization",
];

/// 字符串值长度上限，超过则截断并追加省略标记
const MAX_STRING_LEN: usize = 2048;

const TRUNCATION_MARK: &str = "…[truncated]";

fn is_sensitive(key: &str) -> bool {
    SENSITIVE_KEYS
        .iter()
        .any(|s| key.eq_ignore_ascii_case(s))
}

/// 递归脱敏：删除敏感键、截断超长字符串。原值不可变，返回清洗后的副本。
pub fn scrub_payload(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if is_sensitive(k) {
                    continue;
                }
                out.insert(k.clone(), scrub_payload(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(scrub_payload).collect()),
        Value::String(s) => {
            if s.chars().count() > MAX_STRING_LEN {
                let truncated: String = s.chars().take(MAX_STRING_LEN).collect();
                Value::String(format!("{}{}", truncated, TRUNCATION_MARK))
            } else {
                value.clone()
            }
        }
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_removes_sensitive_keys_recursively() {
        let payload = json!({
            "symbol": "BTCUSDT",
            "api_key": "AKIA123",
            "nested": {
                "Signature": "deadbeef",
                "qty": 0.5,
                "deeper": [{"authorization": "Bearer x", "ok": true}]
            }
        });
        let clean = scrub_payload(&payload);
        assert_eq!(clean["symbol"], "BTCUSDT");
        assert!(clean.get("api_key").is_none());
        assert!(clean["nested"].get("Signature").is_none());
        assert_eq!(clean["nested"]["qty"], 0.5);
        assert!(clean["nested"]["deeper"][0].get("authorization").is_none());
        assert_eq!(clean["nested"]["deeper"][0]["ok"], true);
    }

    #[test]
    fn test_truncates_long_strings() {
        let long = "x".repeat(5000);
        let payload = json!({ "blob": long });
        let clean = scrub_payload(&payload);
        let s = clean["blob"].as_str().unwrap();
        assert!(s.ends_with(TRUNCATION_MARK));
        assert_eq!(s.chars().count(), 2048 + TRUNCATION_MARK.chars().count());
    }

    #[test]
    fn test_short_strings_untouched() {
        let payload = json!({ "note": "ok" });
        assert_eq!(scrub_payload(&payload), payload);
    }
}
