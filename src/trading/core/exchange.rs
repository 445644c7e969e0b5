//! 交易所抽象：网关背后的唯一 seam
//!
//! 具体交易所（binance-usdm / paper）只负责把一次 HTTP 往返翻译为
//! `(T, ResponseMeta)` 或分类后的 `ExchangeError`，重试与限流都在网关完成。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trading::core::rate_limiter::ResponseMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(OrderSide::Buy),
            "SELL" => Some(OrderSide::Sell),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    StopMarket,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::StopMarket => "STOP_MARKET",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    Unknown,
}

impl OrderStatus {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "NEW" => OrderStatus::New,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" | "CANCELLED" => OrderStatus::Canceled,
            "REJECTED" => OrderStatus::Rejected,
            "EXPIRED" => OrderStatus::Expired,
            _ => OrderStatus::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

/// OHLCV K线，时间为 UTC 毫秒开盘时间
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kline {
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: f64,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    pub client_order_id: String,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, qty: f64, client_order_id: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            qty,
            price: None,
            stop_price: None,
            client_order_id: client_order_id.to_string(),
            reduce_only: false,
        }
    }

    pub fn stop_market(
        symbol: &str,
        side: OrderSide,
        qty: f64,
        stop_price: f64,
        client_order_id: &str,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::StopMarket,
            qty,
            price: None,
            stop_price: Some(stop_price),
            client_order_id: client_order_id.to_string(),
            reduce_only: true,
        }
    }
}

/// 交易所返回的订单状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderState {
    pub exchange_order_id: Option<String>,
    pub client_order_id: String,
    pub status: OrderStatus,
    pub executed_qty: f64,
    pub avg_price: Option<f64>,
    /// 原始响应，落库前必须经过脱敏
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionInfo {
    pub symbol: String,
    pub qty: f64,
    pub entry_price: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub equity_usdt: f64,
    pub available_usdt: f64,
    pub positions: Vec<PositionInfo>,
}

/// 失败三分类：可重试瞬时 / 限流 / 终态
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("瞬时错误: {0}")]
    Transient(String),

    #[error("交易所限流 (retry_after={retry_after_secs:?})")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("终态错误 [{code}]: {message}")]
    Terminal { code: String, message: String },
}

impl ExchangeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::Transient(_))
    }

    pub fn reason_code(&self) -> String {
        match self {
            ExchangeError::Transient(_) => "EXCHANGE_TRANSIENT".to_string(),
            ExchangeError::RateLimited { .. } => "RATE_LIMIT_REJECTED".to_string(),
            ExchangeError::Terminal { code, .. } => format!("EXCHANGE_{}", code),
        }
    }

    /// 网关 observe 用：从错误合成响应元信息
    pub fn response_meta(&self) -> ResponseMeta {
        match self {
            ExchangeError::Transient(_) => ResponseMeta::ok(503),
            ExchangeError::RateLimited { retry_after_secs } => ResponseMeta {
                status: 429,
                retry_after_secs: *retry_after_secs,
                ..Default::default()
            },
            ExchangeError::Terminal { .. } => ResponseMeta::ok(400),
        }
    }
}

/// 成功路径同时带回响应元信息，供限流器 observe
pub type ExchangeResult<T> = Result<(T, ResponseMeta), ExchangeError>;

#[async_trait]
pub trait Exchange: Send + Sync {
    /// 交易所标识，持久化进 order_events.exchange
    fn name(&self) -> &str;

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: Option<i64>,
        limit: u32,
    ) -> ExchangeResult<Vec<Kline>>;

    async fn place_order(&self, req: &OrderRequest) -> ExchangeResult<OrderState>;

    async fn cancel_order(&self, symbol: &str, client_order_id: &str) -> ExchangeResult<OrderState>;

    async fn get_order(&self, symbol: &str, client_order_id: &str) -> ExchangeResult<OrderState>;

    async fn get_account(&self) -> ExchangeResult<AccountSnapshot>;

    /// 保护性止损单（stop-market, reduce-only）
    async fn set_stop(&self, req: &OrderRequest) -> ExchangeResult<OrderState>;
}
