//! 模拟盘交易所（PAPER_TRADING=true）
//!
//! 市价单按标记价立即全部成交；止损单挂起不触发（触发逻辑由引擎的软件止损路径承担）。
//! K线由注入数据提供，冷启动联调与测试都走这条路径。

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::trading::core::exchange::{
    AccountSnapshot, Exchange, ExchangeError, ExchangeResult, Kline, OrderRequest, OrderSide,
    OrderState, OrderStatus, OrderType, PositionInfo,
};
use crate::trading::core::rate_limiter::ResponseMeta;

struct PaperState {
    klines: HashMap<(String, String), Vec<Kline>>,
    mark_prices: HashMap<String, f64>,
    orders: HashMap<String, OrderState>,
    positions: HashMap<String, PositionInfo>,
    equity_usdt: f64,
    next_order_id: u64,
}

pub struct PaperExchange {
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(equity_usdt: f64) -> Self {
        Self {
            state: Mutex::new(PaperState {
                klines: HashMap::new(),
                mark_prices: HashMap::new(),
                orders: HashMap::new(),
                positions: HashMap::new(),
                equity_usdt,
                next_order_id: 1,
            }),
        }
    }

    pub fn from_env() -> Self {
        Self::new(crate::app_config::env::env_parse_or("PAPER_EQUITY_USDT", 500.0))
    }

    /// 注入K线（最后一根的收盘价同时作为标记价）
    pub fn seed_klines(&self, symbol: &str, interval: &str, klines: Vec<Kline>) {
        let mut state = self.state.lock().expect("paper state poisoned");
        if let Some(last) = klines.last() {
            state.mark_prices.insert(symbol.to_string(), last.close);
        }
        state
            .klines
            .insert((symbol.to_string(), interval.to_string()), klines);
    }

    pub fn set_mark_price(&self, symbol: &str, price: f64) {
        let mut state = self.state.lock().expect("paper state poisoned");
        state.mark_prices.insert(symbol.to_string(), price);
    }

    fn fill_market(state: &mut PaperState, req: &OrderRequest, price: f64) -> OrderState {
        let oid = state.next_order_id;
        state.next_order_id += 1;

        let pos = state
            .positions
            .entry(req.symbol.clone())
            .or_insert(PositionInfo {
                symbol: req.symbol.clone(),
                qty: 0.0,
                entry_price: price,
                unrealized_pnl: 0.0,
            });
        match req.side {
            OrderSide::Buy => {
                pos.entry_price = if pos.qty > 0.0 {
                    (pos.entry_price * pos.qty + price * req.qty) / (pos.qty + req.qty)
                } else {
                    price
                };
                pos.qty += req.qty;
            }
            OrderSide::Sell => {
                pos.qty = (pos.qty - req.qty).max(0.0);
            }
        }

        OrderState {
            exchange_order_id: Some(oid.to_string()),
            client_order_id: req.client_order_id.clone(),
            status: OrderStatus::Filled,
            executed_qty: req.qty,
            avg_price: Some(price),
            raw: json!({"paper": true, "fill_price": price}),
        }
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: Option<i64>,
        limit: u32,
    ) -> ExchangeResult<Vec<Kline>> {
        let state = self.state.lock().expect("paper state poisoned");
        let all = state
            .klines
            .get(&(symbol.to_string(), interval.to_string()))
            .cloned()
            .unwrap_or_default();
        let filtered: Vec<Kline> = all
            .into_iter()
            .filter(|k| start_ms.map_or(true, |s| k.open_time_ms >= s))
            .take(limit as usize)
            .collect();
        Ok((filtered, ResponseMeta::ok(200)))
    }

    async fn place_order(&self, req: &OrderRequest) -> ExchangeResult<OrderState> {
        let mut state = self.state.lock().expect("paper state poisoned");
        if state.orders.contains_key(&req.client_order_id) {
            // 幂等：同一 client_order_id 重复提交返回既有状态
            let existing = state.orders[&req.client_order_id].clone();
            return Ok((existing, ResponseMeta::ok(200)));
        }
        let price = match req.order_type {
            OrderType::Market => state
                .mark_prices
                .get(&req.symbol)
                .copied()
                .ok_or_else(|| ExchangeError::Terminal {
                    code: "NO_MARK_PRICE".to_string(),
                    message: format!("no mark price for {}", req.symbol),
                })?,
            OrderType::StopMarket => req.stop_price.unwrap_or(0.0),
        };

        let order = match req.order_type {
            OrderType::Market => Self::fill_market(&mut state, req, price),
            OrderType::StopMarket => {
                let oid = state.next_order_id;
                state.next_order_id += 1;
                OrderState {
                    exchange_order_id: Some(oid.to_string()),
                    client_order_id: req.client_order_id.clone(),
                    status: OrderStatus::New,
                    executed_qty: 0.0,
                    avg_price: None,
                    raw: json!({"paper": true, "stop_price": price}),
                }
            }
        };
        state.orders.insert(req.client_order_id.clone(), order.clone());
        Ok((order, ResponseMeta::ok(200)))
    }

    async fn cancel_order(&self, _symbol: &str, client_order_id: &str) -> ExchangeResult<OrderState> {
        let mut state = self.state.lock().expect("paper state poisoned");
        match state.orders.get_mut(client_order_id) {
            Some(order) => {
                if !order.status.is_terminal() {
                    order.status = OrderStatus::Canceled;
                }
                Ok((order.clone(), ResponseMeta::ok(200)))
            }
            None => Err(ExchangeError::Terminal {
                code: "UNKNOWN_ORDER".to_string(),
                message: client_order_id.to_string(),
            }),
        }
    }

    async fn get_order(&self, _symbol: &str, client_order_id: &str) -> ExchangeResult<OrderState> {
        let state = self.state.lock().expect("paper state poisoned");
        match state.orders.get(client_order_id) {
            Some(order) => Ok((order.clone(), ResponseMeta::ok(200))),
            None => Err(ExchangeError::Terminal {
                code: "UNKNOWN_ORDER".to_string(),
                message: client_order_id.to_string(),
            }),
        }
    }

    async fn get_account(&self) -> ExchangeResult<AccountSnapshot> {
        let state = self.state.lock().expect("paper state poisoned");
        Ok((
            AccountSnapshot {
                equity_usdt: state.equity_usdt,
                available_usdt: state.equity_usdt,
                positions: state.positions.values().cloned().collect(),
            },
            ResponseMeta::ok(200),
        ))
    }

    async fn set_stop(&self, req: &OrderRequest) -> ExchangeResult<OrderState> {
        self.place_order(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_market_order_fills_immediately() {
        let paper = PaperExchange::new(500.0);
        paper.set_mark_price("BTCUSDT", 50_000.0);
        let req = OrderRequest::market("BTCUSDT", OrderSide::Buy, 0.01, "cid-1");
        let (order, _) = paper.place_order(&req).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.avg_price, Some(50_000.0));

        let (account, _) = paper.get_account().await.unwrap();
        assert_eq!(account.positions.len(), 1);
        assert!((account.positions[0].qty - 0.01).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_duplicate_client_order_id_is_idempotent() {
        let paper = PaperExchange::new(500.0);
        paper.set_mark_price("BTCUSDT", 50_000.0);
        let req = OrderRequest::market("BTCUSDT", OrderSide::Buy, 0.01, "cid-dup");
        paper.place_order(&req).await.unwrap();
        paper.place_order(&req).await.unwrap();
        let (account, _) = paper.get_account().await.unwrap();
        // 重复提交不会加仓
        assert!((account.positions[0].qty - 0.01).abs() < 1e-12);
    }
}
