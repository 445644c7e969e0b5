//! 行情K线表 market_data
//!
//! 主键 (symbol, timeframe, open_time_ms)，写入一律 INSERT IGNORE，
//! 重复拉取天然幂等。时间全部为 UTC 毫秒。

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::app_config::db::get_db_pool;
use crate::trading::core::exchange::Kline;

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct CandleEntity {
    pub symbol: String,
    pub timeframe: String,
    pub open_time_ms: i64,
    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub close_price: f64,
    pub volume: f64,
}

impl CandleEntity {
    pub fn from_kline(symbol: &str, timeframe: &str, k: &Kline) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            open_time_ms: k.open_time_ms,
            open_price: k.open,
            high_price: k.high,
            low_price: k.low,
            close_price: k.close,
            volume: k.volume,
        }
    }
}

pub struct CandlesModel;

impl CandlesModel {
    /// 批量写入，主键冲突静默忽略。返回实际插入行数。
    pub async fn insert_ignore_batch(list: &[CandleEntity]) -> Result<u64> {
        if list.is_empty() {
            return Ok(0);
        }
        let mut query = String::from(
            "INSERT IGNORE INTO market_data
               (symbol, timeframe, open_time_ms, open_price, high_price, low_price, close_price, volume)
             VALUES ",
        );
        query.push_str(
            &std::iter::repeat("(?, ?, ?, ?, ?, ?, ?, ?)")
                .take(list.len())
                .collect::<Vec<_>>()
                .join(","),
        );

        let mut q = sqlx::query(&query);
        for candle in list {
            q = q
                .bind(&candle.symbol)
                .bind(&candle.timeframe)
                .bind(candle.open_time_ms)
                .bind(candle.open_price)
                .bind(candle.high_price)
                .bind(candle.low_price)
                .bind(candle.close_price)
                .bind(candle.volume);
        }
        let result = q.execute(get_db_pool()).await?;
        Ok(result.rows_affected())
    }

    pub async fn latest_open_time(symbol: &str, timeframe: &str) -> Result<Option<i64>> {
        let ts: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(open_time_ms) FROM market_data WHERE symbol = ? AND timeframe = ?",
        )
        .bind(symbol)
        .bind(timeframe)
        .fetch_one(get_db_pool())
        .await?;
        Ok(ts)
    }

    /// 最近 limit 根，按时间正序返回
    pub async fn recent(symbol: &str, timeframe: &str, limit: u32) -> Result<Vec<CandleEntity>> {
        let mut rows = sqlx::query_as::<_, CandleEntity>(
            "SELECT symbol, timeframe, open_time_ms, open_price, high_price, low_price, close_price, volume
             FROM market_data WHERE symbol = ? AND timeframe = ?
             ORDER BY open_time_ms DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(timeframe)
        .bind(limit)
        .fetch_all(get_db_pool())
        .await?;
        rows.reverse();
        Ok(rows)
    }

    /// 截止某根 bar（含）的最近 limit 根，按时间正序返回
    pub async fn recent_until(
        symbol: &str,
        timeframe: &str,
        until_open_time_ms: i64,
        limit: u32,
    ) -> Result<Vec<CandleEntity>> {
        let mut rows = sqlx::query_as::<_, CandleEntity>(
            "SELECT symbol, timeframe, open_time_ms, open_price, high_price, low_price, close_price, volume
             FROM market_data WHERE symbol = ? AND timeframe = ? AND open_time_ms <= ?
             ORDER BY open_time_ms DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(timeframe)
        .bind(until_open_time_ms)
        .bind(limit)
        .fetch_all(get_db_pool())
        .await?;
        rows.reverse();
        Ok(rows)
    }

    pub async fn get_one(
        symbol: &str,
        timeframe: &str,
        open_time_ms: i64,
    ) -> Result<Option<CandleEntity>> {
        let row = sqlx::query_as::<_, CandleEntity>(
            "SELECT symbol, timeframe, open_time_ms, open_price, high_price, low_price, close_price, volume
             FROM market_data WHERE symbol = ? AND timeframe = ? AND open_time_ms = ?",
        )
        .bind(symbol)
        .bind(timeframe)
        .bind(open_time_ms)
        .fetch_optional(get_db_pool())
        .await?;
        Ok(row)
    }

    /// 缺口扫描：相邻两根开盘时间差超过周期，即视为缺口，返回缺失的开盘时间
    pub async fn find_gaps(symbol: &str, timeframe: &str, interval_ms: i64) -> Result<Vec<i64>> {
        if interval_ms <= 0 {
            return Err(anyhow!("interval_ms must be positive"));
        }
        let times: Vec<i64> = sqlx::query_scalar(
            "SELECT open_time_ms FROM market_data
             WHERE symbol = ? AND timeframe = ? ORDER BY open_time_ms ASC",
        )
        .bind(symbol)
        .bind(timeframe)
        .fetch_all(get_db_pool())
        .await?;
        Ok(missing_bar_times(&times, interval_ms))
    }
}

/// 纯函数，便于测试：从有序时间序列里找出缺失的 bar 开盘时间
pub fn missing_bar_times(sorted_open_times: &[i64], interval_ms: i64) -> Vec<i64> {
    let mut missing = Vec::new();
    for pair in sorted_open_times.windows(2) {
        let mut expected = pair[0] + interval_ms;
        while expected < pair[1] {
            missing.push(expected);
            expected += interval_ms;
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_bar_times() {
        let interval = 900_000;
        let times = vec![0, 900_000, 3_600_000, 4_500_000];
        // 900_000 与 3_600_000 之间缺 1_800_000 和 2_700_000
        assert_eq!(
            missing_bar_times(&times, interval),
            vec![1_800_000, 2_700_000]
        );
        assert!(missing_bar_times(&[0, 900_000], interval).is_empty());
        assert!(missing_bar_times(&[], interval).is_empty());
    }
}
