//! 时间工具：调度一律使用香港时间（UTC+8，无夏令时），持久化一律使用 UTC 毫秒。

use chrono::{DateTime, FixedOffset, TimeZone, Timelike, Utc};

/// 香港固定时差
pub fn hk_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("UTC+8 is a valid offset")
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// UTC 毫秒时间戳 → "YYYY-MM-DD HH:MM:SS"（UTC）
pub fn mill_time_to_datetime(timestamp_ms: i64) -> Result<String, String> {
    match Utc.timestamp_millis_opt(timestamp_ms) {
        chrono::LocalResult::Single(datetime) => {
            Ok(datetime.format("%Y-%m-%d %H:%M:%S").to_string())
        }
        _ => Err(format!("Invalid timestamp: {}", timestamp_ms)),
    }
}

/// UTC 毫秒时间戳 → "YYYY-MM-DD HH:MM:SS"（香港时间）
pub fn mill_time_to_datetime_hk(timestamp_ms: i64) -> Result<String, String> {
    match Utc.timestamp_millis_opt(timestamp_ms) {
        chrono::LocalResult::Single(datetime) => {
            let local_datetime = datetime.with_timezone(&hk_offset());
            Ok(local_datetime.format("%Y-%m-%d %H:%M:%S").to_string())
        }
        _ => Err(format!("Invalid timestamp: {}", timestamp_ms)),
    }
}

pub fn utc_to_hk(dt: DateTime<Utc>) -> DateTime<FixedOffset> {
    dt.with_timezone(&hk_offset())
}

/// K线周期字符串 → 毫秒。未识别的周期回落到 15m。
pub fn interval_to_ms(interval: &str) -> i64 {
    match interval {
        "1m" => 60_000,
        "5m" => 300_000,
        "15m" => 900_000,
        "30m" => 1_800_000,
        "1h" | "1H" => 3_600_000,
        "4h" | "4H" => 14_400_000,
        "1d" | "1D" => 86_400_000,
        _ => 900_000,
    }
}

/// 策略 tick 判定：香港墙钟分钟数落在周期边界，且处于边界后 0–3 秒窗口内。
///
/// 边界示例（15m）：15:00:00 触发，15:00:03 触发，15:00:04 不触发。
pub fn is_tick_boundary(hk: DateTime<FixedOffset>, interval_min: u32, grace_secs: u32) -> bool {
    interval_min > 0 && hk.minute() % interval_min == 0 && hk.second() <= grace_secs
}

/// 距离下一个周期边界的秒数（香港墙钟）
pub fn next_tick_sleep_seconds(now_utc: DateTime<Utc>, interval_seconds: i64) -> f64 {
    let epoch_ms = now_utc.timestamp_millis();
    let interval_ms = interval_seconds * 1000;
    let next_ms = (epoch_ms / interval_ms + 1) * interval_ms;
    ((next_ms - epoch_ms) as f64 / 1000.0).max(0.0)
}

/// bar 收盘时间 = 开盘时间 + 周期
pub fn bar_close_ts(open_time_ms: i64, interval_ms: i64) -> i64 {
    open_time_ms + interval_ms
}

/// bar 是否已经收盘（收盘时间不在未来）
pub fn bar_is_closed(open_time_ms: i64, interval_ms: i64, now_ms: i64) -> bool {
    bar_close_ts(open_time_ms, interval_ms) <= now_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hk(h: u32, m: u32, s: u32) -> DateTime<FixedOffset> {
        hk_offset()
            .with_ymd_and_hms(2025, 6, 2, h, m, s)
            .single()
            .unwrap()
    }

    #[test]
    fn test_tick_boundary_window() {
        assert!(is_tick_boundary(hk(15, 0, 0), 15, 3));
        assert!(is_tick_boundary(hk(15, 0, 3), 15, 3));
        assert!(!is_tick_boundary(hk(15, 0, 4), 15, 3));
        assert!(!is_tick_boundary(hk(15, 1, 0), 15, 3));
        assert!(is_tick_boundary(hk(15, 45, 2), 15, 3));
    }

    #[test]
    fn test_next_tick_sleep() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 7, 0, 0).single().unwrap();
        // 正好在边界上：到下一边界还有整整一个周期
        assert!((next_tick_sleep_seconds(now, 900) - 900.0).abs() < 1e-9);
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 7, 14, 30).single().unwrap();
        assert!((next_tick_sleep_seconds(now, 900) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_bar_close() {
        let interval = interval_to_ms("15m");
        assert_eq!(bar_close_ts(1_700_000_000_000, interval), 1_700_000_900_000);
        assert!(bar_is_closed(1_700_000_000_000, interval, 1_700_000_900_000));
        assert!(!bar_is_closed(1_700_000_000_000, interval, 1_700_000_899_999));
    }

    #[test]
    fn test_hk_conversion() {
        // 2024-01-01 00:00 UTC == 08:00 HK
        let s = mill_time_to_datetime_hk(1_704_067_200_000).unwrap();
        assert_eq!(s, "2024-01-01 08:00:00");
        let s = mill_time_to_datetime(1_704_067_200_000).unwrap();
        assert_eq!(s, "2024-01-01 00:00:00");
    }
}
