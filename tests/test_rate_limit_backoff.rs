//! 限流退避的端到端行为：注入连续 429，断言重试节奏与指标
//!
//! 使用 tokio 虚拟时钟，测试不消耗真实时长。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use asv8::trading::core::exchange::{
    AccountSnapshot, Exchange, ExchangeError, ExchangeResult, Kline, OrderRequest, OrderState,
    OrderStatus,
};
use asv8::trading::core::exchange_gateway::ExchangeGateway;
use asv8::trading::core::rate_limiter::{AdaptiveRateLimiter, ResponseMeta};

/// 按脚本回放失败/成功的假交易所，记录每次调用的虚拟时刻与 client_order_id
struct FaultInjectingExchange {
    calls: AtomicU32,
    call_log: Mutex<Vec<(u128, String)>>,
    started: tokio::time::Instant,
    /// 前 N 次调用返回 429 RetryAfter=2
    rate_limited_calls: u32,
}

impl FaultInjectingExchange {
    fn new(rate_limited_calls: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            call_log: Mutex::new(Vec::new()),
            started: tokio::time::Instant::now(),
            rate_limited_calls,
        }
    }

    fn log(&self, cid: &str) -> u32 {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_log
            .lock()
            .unwrap()
            .push((self.started.elapsed().as_millis(), cid.to_string()));
        n
    }

    fn filled(req: &OrderRequest) -> OrderState {
        OrderState {
            exchange_order_id: Some("1".to_string()),
            client_order_id: req.client_order_id.clone(),
            status: OrderStatus::Filled,
            executed_qty: req.qty,
            avg_price: Some(100.0),
            raw: serde_json::json!({}),
        }
    }
}

#[async_trait]
impl Exchange for FaultInjectingExchange {
    fn name(&self) -> &str {
        "fault-injector"
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
        let n = self.log(&req.client_order_id);
        if n < self.rate_limited_calls {
            Err(ExchangeError::RateLimited {
                retry_after_secs: Some(2),
            })
        } else {
            Ok((Self::filled(req), ResponseMeta::ok(200)))
        }
    }

    async fn cancel_order(&self, _symbol: &str, cid: &str) -> ExchangeResult<OrderState> {
        Err(ExchangeError::Terminal {
            code: "UNKNOWN_ORDER".to_string(),
            message: cid.to_string(),
        })
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

/// 连续三个 429 (RetryAfter=2,2,2)：第三次重试距首次调用 >= 6 秒，
/// 限流指标里 429 计数 >= 3
#[tokio::test(start_paused = true)]
async fn test_three_429s_space_retries_by_retry_after() {
    let exchange = Arc::new(FaultInjectingExchange::new(3));
    let limiter = Arc::new(AdaptiveRateLimiter::with_system_clock(None));
    let gateway = ExchangeGateway::new(exchange.clone(), limiter);

    let req = OrderRequest::market("BTCUSDT", asv8::trading::core::exchange::OrderSide::Buy, 0.1, "cid-429");
    let order = gateway.place_order(&req).await.expect("4th attempt succeeds");
    assert_eq!(order.status, OrderStatus::Filled);

    let log = exchange.call_log.lock().unwrap().clone();
    assert_eq!(log.len(), 4, "1 次原始调用 + 3 次重试");
    let first = log[0].0;
    let third_retry = log[3].0;
    assert!(
        third_retry - first >= 6_000,
        "第三次重试应距首次 >= 6s，实际 {}ms",
        third_retry - first
    );
    // 每次重试都沿用同一个 client_order_id
    assert!(log.iter().all(|(_, cid)| cid == "cid-429"));

    let metrics = gateway.limiter().metrics();
    let order_group = metrics
        .groups
        .iter()
        .find(|g| g.group == "order")
        .expect("order group present");
    assert!(order_group.rate_limited_total >= 3);
}

/// 超过重试预算的持续 429 最终返回 RateLimited 错误
#[tokio::test(start_paused = true)]
async fn test_429_budget_exhaustion_surfaces_error() {
    let exchange = Arc::new(FaultInjectingExchange::new(u32::MAX));
    let limiter = Arc::new(AdaptiveRateLimiter::with_system_clock(None));
    let gateway = ExchangeGateway::new(exchange.clone(), limiter);

    let req = OrderRequest::market("BTCUSDT", asv8::trading::core::exchange::OrderSide::Buy, 0.1, "cid-drain");
    let err = gateway.place_order(&req).await.expect_err("must fail");
    assert!(matches!(err, ExchangeError::RateLimited { .. }));
    assert_eq!(exchange.calls.load(Ordering::SeqCst), 4);
}

/// 一次 429 RetryAfter=5 之后，该分组 >= 5 秒内不会再发起调用
#[tokio::test(start_paused = true)]
async fn test_retry_after_silences_group() {
    let limiter = AdaptiveRateLimiter::with_system_clock(None);
    limiter.observe(
        asv8::trading::core::rate_limiter::RateGroup::Order,
        &ResponseMeta {
            status: 429,
            retry_after_secs: Some(5),
            ..Default::default()
        },
    );
    let started = tokio::time::Instant::now();
    limiter
        .acquire(asv8::trading::core::rate_limiter::RateGroup::Order, 1)
        .await;
    assert!(started.elapsed().as_millis() >= 5_000);
}
