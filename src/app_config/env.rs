use std::env;

/// 读取布尔型环境变量：支持 true/false/1/0（大小写不敏感）
pub fn env_is_true(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim();
            v.eq_ignore_ascii_case("true") || v == "1"
        }
        Err(_) => default,
    }
}

/// 读取字符串环境变量，若不存在则返回默认值
pub fn env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) => v,
        Err(_) => default.to_string(),
    }
}

/// 读取数值型环境变量，解析失败时回落到默认值
pub fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parse_or() {
        env::set_var("ASV8_TEST_NUM", "42");
        assert_eq!(env_parse_or::<u64>("ASV8_TEST_NUM", 7), 42);
        assert_eq!(env_parse_or::<u64>("ASV8_TEST_MISSING", 7), 7);
        env::set_var("ASV8_TEST_NUM", "not a number");
        assert_eq!(env_parse_or::<u64>("ASV8_TEST_NUM", 7), 7);
    }
}
