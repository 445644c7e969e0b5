//! 持仓生命周期 trade_logs：每个仓位一行，OPEN → CLOSED

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::app_config::db::get_db_pool;

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct TradeLogEntity {
    pub id: i64,
    pub symbol: String,
    pub side: String,
    pub qty: f64,
    pub leverage: i32,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub pnl: Option<f64>,
    pub stop_price: f64,
    pub stop_dist_pct: f64,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub robot_score: f64,
    pub ai_prob: f64,
    pub open_reason_code: String,
    pub open_reason: String,
    pub close_reason_code: Option<String>,
    pub close_reason: Option<String>,
    pub entry_time_ms: i64,
    pub exit_time_ms: Option<i64>,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct NewTradeLog {
    pub symbol: String,
    pub side: String,
    pub qty: f64,
    pub leverage: i32,
    pub entry_price: f64,
    pub stop_price: f64,
    pub stop_dist_pct: f64,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub robot_score: f64,
    pub ai_prob: f64,
    pub open_reason_code: String,
    pub open_reason: String,
    pub entry_time_ms: i64,
}

pub struct TradeLogModel;

impl TradeLogModel {
    pub async fn open(log: &NewTradeLog) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO trade_logs
               (symbol, side, qty, leverage, entry_price, stop_price, stop_dist_pct,
                client_order_id, exchange_order_id, robot_score, ai_prob,
                open_reason_code, open_reason, entry_time_ms, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'OPEN')",
        )
        .bind(&log.symbol)
        .bind(&log.side)
        .bind(log.qty)
        .bind(log.leverage)
        .bind(log.entry_price)
        .bind(log.stop_price)
        .bind(log.stop_dist_pct)
        .bind(&log.client_order_id)
        .bind(&log.exchange_order_id)
        .bind(log.robot_score)
        .bind(log.ai_prob)
        .bind(&log.open_reason_code)
        .bind(&log.open_reason)
        .bind(log.entry_time_ms)
        .execute(get_db_pool())
        .await?;
        Ok(result.last_insert_id() as i64)
    }

    pub async fn close(
        id: i64,
        exit_price: f64,
        pnl: f64,
        close_reason_code: &str,
        close_reason: &str,
        exit_time_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE trade_logs
             SET exit_price = ?, pnl = ?, close_reason_code = ?, close_reason = ?,
                 exit_time_ms = ?, status = 'CLOSED'
             WHERE id = ? AND status = 'OPEN'",
        )
        .bind(exit_price)
        .bind(pnl)
        .bind(close_reason_code)
        .bind(close_reason)
        .bind(exit_time_ms)
        .bind(id)
        .execute(get_db_pool())
        .await?;
        Ok(())
    }

    pub async fn open_position(symbol: &str) -> Result<Option<TradeLogEntity>> {
        let row = sqlx::query_as::<_, TradeLogEntity>(
            "SELECT * FROM trade_logs WHERE symbol = ? AND status = 'OPEN'
             ORDER BY id DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(get_db_pool())
        .await?;
        Ok(row)
    }

    pub async fn all_open() -> Result<Vec<TradeLogEntity>> {
        let rows =
            sqlx::query_as::<_, TradeLogEntity>("SELECT * FROM trade_logs WHERE status = 'OPEN'")
                .fetch_all(get_db_pool())
                .await?;
        Ok(rows)
    }
}
