//! 交易相关环境配置的统一入口
//!
//! 所有可识别的环境变量在这里集中声明默认值，避免散落在业务代码里。

use crate::app_config::env::{env_is_true, env_or_default, env_parse_or};

#[derive(Debug, Clone)]
pub struct Settings {
    /// 逗号分隔的交易对列表，如 "BTCUSDT,ETHUSDT"
    pub symbols: Vec<String>,
    /// K线周期，默认 15m
    pub timeframe: String,
    /// 是否允许真实下单
    pub enable_trading: bool,
    /// 模拟盘模式（不触达真实交易所）
    pub paper_trading: bool,
    /// 交易所名称，写入 order_events.exchange
    pub exchange_name: String,

    pub tick_budget_seconds: u64,
    pub control_poll_seconds: u64,
    pub position_snapshot_interval_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    pub order_confirm_timeout_seconds: u64,
    pub trade_lock_ttl_seconds: u64,

    pub feature_version: i32,

    pub market_data_lag_alert_seconds: i64,
    pub market_data_lag_alert_cooldown_seconds: i64,

    /// 信号阈值（Open Question：源实现中为可调参数，这里保持 config 驱动）
    pub adx_min: f64,
    pub vol_ratio_min: f64,
    pub ai_score_min: f64,

    /// AI 模型实现标签：online_lr / sgd_compat
    pub ai_model_impl: String,
}

impl Settings {
    pub fn from_env() -> Self {
        let symbols = env_or_default("SYMBOLS", "BTCUSDT")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            symbols,
            timeframe: env_or_default("TIMEFRAME", "15m"),
            enable_trading: env_is_true("ENABLE_TRADING", false),
            paper_trading: env_is_true("PAPER_TRADING", true),
            exchange_name: env_or_default("EXCHANGE_NAME", "binance-usdm"),

            tick_budget_seconds: env_parse_or("TICK_BUDGET_SECONDS", 10),
            control_poll_seconds: env_parse_or("CONTROL_POLL_SECONDS", 2),
            position_snapshot_interval_seconds: env_parse_or(
                "POSITION_SNAPSHOT_INTERVAL_SECONDS",
                300,
            ),
            heartbeat_interval_seconds: env_parse_or("HEARTBEAT_INTERVAL_SECONDS", 30),
            order_confirm_timeout_seconds: env_parse_or("ORDER_CONFIRM_TIMEOUT", 8),
            trade_lock_ttl_seconds: env_parse_or("TRADE_LOCK_TTL_SECONDS", 30),

            feature_version: env_parse_or("FEATURE_VERSION", 1),

            market_data_lag_alert_seconds: env_parse_or("MARKET_DATA_LAG_ALERT_SECONDS", 120),
            market_data_lag_alert_cooldown_seconds: env_parse_or(
                "MARKET_DATA_LAG_ALERT_COOLDOWN_SECONDS",
                300,
            ),

            adx_min: env_parse_or("ADX_MIN", 25.0),
            vol_ratio_min: env_parse_or("VOL_RATIO_MIN", 1.5),
            ai_score_min: env_parse_or("AI_SCORE_MIN", 50.0),

            ai_model_impl: env_or_default("AI_MODEL_IMPL", "online_lr"),
        }
    }

    /// K线周期毫秒数
    pub fn interval_ms(&self) -> i64 {
        crate::time_util::interval_to_ms(&self.timeframe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::from_env();
        assert_eq!(s.timeframe, "15m");
        assert_eq!(s.tick_budget_seconds, 10);
        assert_eq!(s.control_poll_seconds, 2);
        assert_eq!(s.trade_lock_ttl_seconds, 30);
        assert!((s.ai_score_min - 50.0).abs() < f64::EPSILON);
    }
}
