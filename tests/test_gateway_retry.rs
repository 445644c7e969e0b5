//! 网关失败三分类：瞬时重试 / 终态立刻返回

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use asv8::trading::core::exchange::{
    AccountSnapshot, Exchange, ExchangeError, ExchangeResult, Kline, OrderRequest, OrderSide,
    OrderState, OrderStatus,
};
use asv8::trading::core::exchange_gateway::ExchangeGateway;
use asv8::trading::core::rate_limiter::{AdaptiveRateLimiter, ResponseMeta};

enum Script {
    Transient,
    Terminal,
    Ok,
}

struct ScriptedExchange {
    script: Mutex<Vec<Script>>,
    calls: AtomicU32,
    seen_cids: Mutex<Vec<String>>,
}

impl ScriptedExchange {
    fn new(script: Vec<Script>) -> Self {
        Self {
            script: Mutex::new(script),
            calls: AtomicU32::new(0),
            seen_cids: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Exchange for ScriptedExchange {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn get_klines(
        &self,
        _symbol: &str,
        _interval: &str,
        _start_ms: Option<i64>,
        _limit: u32,
    ) -> ExchangeResult<Vec<Kline>> {
        Ok((vec![], ResponseMeta::ok(200)))
    }

    async fn place_order(&self, req: &OrderRequest) -> ExchangeResult<OrderState> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_cids
            .lock()
            .unwrap()
            .push(req.client_order_id.clone());
        let mut script = self.script.lock().unwrap();
        match script.remove(0) {
            Script::Transient => Err(ExchangeError::Transient("connection reset".to_string())),
            Script::Terminal => Err(ExchangeError::Terminal {
                code: "-2010".to_string(),
                message: "insufficient balance".to_string(),
            }),
            Script::Ok => Ok((
                OrderState {
                    exchange_order_id: Some("7".to_string()),
                    client_order_id: req.client_order_id.clone(),
                    status: OrderStatus::Filled,
                    executed_qty: req.qty,
                    avg_price: Some(101.5),
                    raw: serde_json::json!({}),
                },
                ResponseMeta::ok(200),
            )),
        }
    }

    async fn cancel_order(&self, _symbol: &str, _cid: &str) -> ExchangeResult<OrderState> {
        Err(ExchangeError::Transient("not scripted".to_string()))
    }

    async fn get_order(&self, _symbol: &str, _cid: &str) -> ExchangeResult<OrderState> {
        Err(ExchangeError::Transient("not scripted".to_string()))
    }

    async fn get_account(&self) -> ExchangeResult<AccountSnapshot> {
        Ok((
            AccountSnapshot {
                equity_usdt: 500.0,
                available_usdt: 500.0,
                positions: vec![],
            },
            ResponseMeta::ok(200),
        ))
    }

    async fn set_stop(&self, req: &OrderRequest) -> ExchangeResult<OrderState> {
        self.place_order(req).await
    }
}

fn gateway_over(exchange: Arc<ScriptedExchange>) -> ExchangeGateway {
    let limiter = Arc::new(AdaptiveRateLimiter::with_system_clock(None));
    ExchangeGateway::new(exchange, limiter)
}

/// 两次瞬时失败后成功：同一 client_order_id 提交三次，最终只有一个成交结果
#[tokio::test(start_paused = true)]
async fn test_transient_errors_retried_with_same_cid() {
    let exchange = Arc::new(ScriptedExchange::new(vec![
        Script::Transient,
        Script::Transient,
        Script::Ok,
    ]));
    let gateway = gateway_over(exchange.clone());

    let req = OrderRequest::market("ETHUSDT", OrderSide::Buy, 1.0, "cid-transient");
    let order = gateway.place_order(&req).await.unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 3);
    let cids = exchange.seen_cids.lock().unwrap().clone();
    assert!(cids.iter().all(|c| c == "cid-transient"));
}

/// 终态错误不重试，带原始错误码返回
#[tokio::test(start_paused = true)]
async fn test_terminal_error_fails_fast() {
    let exchange = Arc::new(ScriptedExchange::new(vec![Script::Terminal]));
    let gateway = gateway_over(exchange.clone());

    let req = OrderRequest::market("ETHUSDT", OrderSide::Buy, 1.0, "cid-terminal");
    let err = gateway.place_order(&req).await.expect_err("terminal");
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
    match err {
        ExchangeError::Terminal { code, .. } => assert_eq!(code, "-2010"),
        other => panic!("expected terminal, got {:?}", other.reason_code()),
    }
}

/// 重试预算（3 次）耗尽后瞬时错误上浮
#[tokio::test(start_paused = true)]
async fn test_transient_budget_exhaustion() {
    let exchange = Arc::new(ScriptedExchange::new(vec![
        Script::Transient,
        Script::Transient,
        Script::Transient,
        Script::Transient,
    ]));
    let gateway = gateway_over(exchange.clone());

    let req = OrderRequest::market("ETHUSDT", OrderSide::Buy, 1.0, "cid-drain");
    let err = gateway.place_order(&req).await.expect_err("exhausted");
    assert!(err.is_retryable());
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 4);
}
