//! 追加式订单事件流 order_events
//!
//! 事件流是订单状态机的权威记录：只插入，永不 UPDATE / DELETE。
//! 幂等键 (exchange, symbol, client_order_id, event_type)，
//! 重复写入静默吞掉并返回 false。payload 落库前强制脱敏。

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use crate::app_config::db::get_db_pool;
use crate::time_util;
use crate::trading::utils::scrub::scrub_payload;

/// 事件类型全集
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEventType {
    Created,
    Submitted,
    Ack,
    Partial,
    Filled,
    Canceled,
    Rejected,
    Error,
    Reconciled,
    StopArmed,
    StopTriggered,
    StopFilled,
}

impl OrderEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderEventType::Created => "CREATED",
            OrderEventType::Submitted => "SUBMITTED",
            OrderEventType::Ack => "ACK",
            OrderEventType::Partial => "PARTIAL",
            OrderEventType::Filled => "FILLED",
            OrderEventType::Canceled => "CANCELED",
            OrderEventType::Rejected => "REJECTED",
            OrderEventType::Error => "ERROR",
            OrderEventType::Reconciled => "RECONCILED",
            OrderEventType::StopArmed => "STOP_ARMED",
            OrderEventType::StopTriggered => "STOP_TRIGGERED",
            OrderEventType::StopFilled => "STOP_FILLED",
        }
    }
}

/// 一次事件写入的全部字段
#[derive(Debug, Clone)]
pub struct NewOrderEvent {
    pub trace_id: String,
    pub service: String,
    pub exchange: String,
    pub symbol: String,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub event_type: OrderEventType,
    pub side: String,
    pub qty: f64,
    pub price: Option<f64>,
    pub status: String,
    pub reason_code: String,
    pub reason: String,
    pub action: String,
    pub actor: String,
    pub payload: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct OrderEventEntity {
    pub id: i64,
    pub trace_id: String,
    pub service: String,
    pub exchange: String,
    pub symbol: String,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub event_type: String,
    pub side: String,
    pub qty: f64,
    pub price: Option<f64>,
    pub status: String,
    pub reason_code: String,
    pub reason: String,
    pub action: String,
    pub actor: String,
    pub event_ts_utc: i64,
    pub event_ts_hk: String,
    pub raw_payload_json: String,
}

pub struct OrderEventModel;

impl OrderEventModel {
    /// 追加事件，返回是否真的新插入（false = 幂等命中）
    pub async fn append(event: &NewOrderEvent) -> Result<bool> {
        let now_ms = time_util::now_ms();
        let ts_hk = time_util::mill_time_to_datetime_hk(now_ms)
            .unwrap_or_else(|_| "1970-01-01 00:00:00".to_string());
        let payload_json = scrub_payload(&event.payload).to_string();

        let result = sqlx::query(
            "INSERT IGNORE INTO order_events
               (trace_id, service, exchange, symbol, client_order_id, exchange_order_id,
                event_type, side, qty, price, status, reason_code, reason, action, actor,
                event_ts_utc, event_ts_hk, raw_payload_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.trace_id)
        .bind(&event.service)
        .bind(&event.exchange)
        .bind(&event.symbol)
        .bind(&event.client_order_id)
        .bind(&event.exchange_order_id)
        .bind(event.event_type.as_str())
        .bind(&event.side)
        .bind(event.qty)
        .bind(event.price)
        .bind(&event.status)
        .bind(&event.reason_code)
        .bind(&event.reason)
        .bind(&event.action)
        .bind(&event.actor)
        .bind(now_ms)
        .bind(&ts_hk)
        .bind(&payload_json)
        .execute(get_db_pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 某 client_order_id 是否已有指定类型的事件
    pub async fn exists(
        exchange: &str,
        symbol: &str,
        client_order_id: &str,
        event_type: OrderEventType,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM order_events
             WHERE exchange = ? AND symbol = ? AND client_order_id = ? AND event_type = ?",
        )
        .bind(exchange)
        .bind(symbol)
        .bind(client_order_id)
        .bind(event_type.as_str())
        .fetch_one(get_db_pool())
        .await?;
        Ok(count > 0)
    }

    /// 当前 bar 是否已经有过开仓尝试（重启去重用：按 client_order_id 前缀匹配）
    pub async fn exists_created_with_prefix(
        exchange: &str,
        symbol: &str,
        client_order_id_prefix: &str,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM order_events
             WHERE exchange = ? AND symbol = ? AND event_type = 'CREATED'
               AND client_order_id LIKE CONCAT(?, '%')",
        )
        .bind(exchange)
        .bind(symbol)
        .bind(client_order_id_prefix)
        .fetch_one(get_db_pool())
        .await?;
        Ok(count > 0)
    }

    /// 健康面板用：最近 N 条 ERROR 事件
    pub async fn recent_errors(limit: u32) -> Result<Vec<OrderEventEntity>> {
        let rows = sqlx::query_as::<_, OrderEventEntity>(
            "SELECT * FROM order_events WHERE event_type = 'ERROR'
             ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(get_db_pool())
        .await?;
        Ok(rows)
    }

    /// 等待对账的订单：有 SUBMITTED 但没有任何终态事件
    pub async fn unreconciled_client_order_ids(exchange: &str, symbol: &str) -> Result<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT s.client_order_id FROM order_events s
             WHERE s.exchange = ? AND s.symbol = ? AND s.event_type = 'SUBMITTED'
               AND NOT EXISTS (
                 SELECT 1 FROM order_events t
                 WHERE t.exchange = s.exchange AND t.symbol = s.symbol
                   AND t.client_order_id = s.client_order_id
                   AND t.event_type IN ('FILLED', 'CANCELED', 'REJECTED', 'RECONCILED')
               )",
        )
        .bind(exchange)
        .bind(symbol)
        .fetch_all(get_db_pool())
        .await?;
        Ok(rows)
    }
}
