//! client_order_id：订单幂等键
//!
//! 格式 `asv8-{symbol}-{side}-{timeframe}-{bar_close_ts}-{nonce}`。
//! nonce 是 trace_id 的稳定短哈希：同一次决策的所有重试共享同一个 id，
//! 交易所端的重复提交被天然吸收。

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

use crate::trading::core::exchange::OrderSide;

const PREFIX: &str = "asv8";

/// trace_id → 8 位十六进制 nonce（稳定，可重入）
pub fn nonce_from_trace(trace_id: &str) -> String {
    let digest = Sha256::digest(trace_id.as_bytes());
    digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn generate(
    symbol: &str,
    side: OrderSide,
    timeframe: &str,
    bar_close_ts: i64,
    trace_id: &str,
) -> String {
    format!(
        "{}-{}-{}-{}-{}-{}",
        PREFIX,
        symbol,
        side.as_str(),
        timeframe,
        bar_close_ts,
        nonce_from_trace(trace_id)
    )
}

/// 同一根 bar 的所有开仓尝试共享的前缀（重启去重用）
pub fn bar_prefix(symbol: &str, side: OrderSide, timeframe: &str, bar_close_ts: i64) -> String {
    format!(
        "{}-{}-{}-{}-{}-",
        PREFIX,
        symbol,
        side.as_str(),
        timeframe,
        bar_close_ts
    )
}

/// 止损单 id 由父单派生
pub fn stop_id(parent: &str) -> String {
    format!("{}-stop", parent)
}

/// 平仓单 id 由父单派生
pub fn exit_id(parent: &str) -> String {
    format!("{}-exit", parent)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOrderId {
    pub symbol: String,
    pub side: OrderSide,
    pub timeframe: String,
    pub bar_close_ts: i64,
    pub nonce: String,
}

pub fn parse(client_order_id: &str) -> Result<ParsedOrderId> {
    let parts: Vec<&str> = client_order_id.split('-').collect();
    if parts.len() != 6 || parts[0] != PREFIX {
        return Err(anyhow!("malformed client_order_id: {}", client_order_id));
    }
    Ok(ParsedOrderId {
        symbol: parts[1].to_string(),
        side: OrderSide::parse(parts[2])
            .ok_or_else(|| anyhow!("bad side in client_order_id: {}", parts[2]))?,
        timeframe: parts[3].to_string(),
        bar_close_ts: parts[4]
            .parse()
            .map_err(|_| anyhow!("bad bar_close_ts in client_order_id: {}", parts[4]))?,
        nonce: parts[5].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let cid = generate("BTCUSDT", OrderSide::Buy, "15m", 1_700_000_900_000, "trace-abc");
        let parsed = parse(&cid).unwrap();
        assert_eq!(parsed.symbol, "BTCUSDT");
        assert_eq!(parsed.side, OrderSide::Buy);
        assert_eq!(parsed.timeframe, "15m");
        assert_eq!(parsed.bar_close_ts, 1_700_000_900_000);
        assert_eq!(parsed.nonce, nonce_from_trace("trace-abc"));
    }

    #[test]
    fn test_same_trace_same_id() {
        let a = generate("ETHUSDT", OrderSide::Buy, "15m", 1_700_000_900_000, "t-1");
        let b = generate("ETHUSDT", OrderSide::Buy, "15m", 1_700_000_900_000, "t-1");
        assert_eq!(a, b);
        let c = generate("ETHUSDT", OrderSide::Buy, "15m", 1_700_000_900_000, "t-2");
        assert_ne!(a, c);
    }

    #[test]
    fn test_bar_prefix_matches_generated_ids() {
        let cid = generate("BTCUSDT", OrderSide::Buy, "15m", 42, "trace-x");
        assert!(cid.starts_with(&bar_prefix("BTCUSDT", OrderSide::Buy, "15m", 42)));
    }

    #[test]
    fn test_derived_ids() {
        assert_eq!(stop_id("abc"), "abc-stop");
        assert_eq!(exit_id("abc"), "abc-exit");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("not-an-order-id").is_err());
        assert!(parse("asv8-BTCUSDT-HOLD-15m-1-aaaa").is_err());
    }
}
