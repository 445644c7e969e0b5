//! 交易所网关：所有交易所 I/O 的单一入口
//!
//! 职责：按调用类别映射限流分组、穿过限流器、瞬时错误带退避重试
//! （重试保持原 client_order_id 不变）、每次响应回灌 observe。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::trading::core::exchange::{
    AccountSnapshot, Exchange, ExchangeError, ExchangeResult, Kline, OrderRequest, OrderState,
};
use crate::trading::core::rate_limiter::{AdaptiveRateLimiter, RateGroup};

const TRANSIENT_BACKOFF_BASE_MS: u64 = 500;
const TRANSIENT_BACKOFF_CAP_MS: u64 = 30_000;

pub struct ExchangeGateway {
    inner: Arc<dyn Exchange>,
    limiter: Arc<AdaptiveRateLimiter>,
    max_retries: u32,
}

impl ExchangeGateway {
    pub fn new(inner: Arc<dyn Exchange>, limiter: Arc<AdaptiveRateLimiter>) -> Self {
        Self {
            inner,
            limiter,
            max_retries: crate::app_config::env::env_parse_or("EXCHANGE_MAX_RETRIES", 3),
        }
    }

    pub fn exchange_name(&self) -> String {
        self.inner.name().to_string()
    }

    pub fn limiter(&self) -> &AdaptiveRateLimiter {
        &self.limiter
    }

    /// 重试骨架：acquire → 调用 → observe。
    /// 瞬时错误按指数退避重试；限流错误依赖 acquire 等完退避期后重试；终态错误立刻返回。
    async fn execute<T, F, Fut>(
        &self,
        group: RateGroup,
        weight: u64,
        op: &'static str,
        mut f: F,
    ) -> Result<T, ExchangeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.limiter.acquire(group, weight).await;

            match f().await {
                Ok((value, meta)) => {
                    self.limiter.observe(group, &meta);
                    return Ok(value);
                }
                Err(e) => {
                    self.limiter.observe(group, &e.response_meta());
                    let retryable = attempt <= self.max_retries;
                    match &e {
                        ExchangeError::Transient(msg) if retryable => {
                            let backoff_ms = TRANSIENT_BACKOFF_BASE_MS
                                .saturating_mul(1u64 << (attempt - 1).min(16))
                                .min(TRANSIENT_BACKOFF_CAP_MS);
                            warn!(op, attempt, backoff_ms, msg = msg.as_str(), "瞬时错误，退避后重试");
                            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        }
                        ExchangeError::RateLimited { .. } if retryable => {
                            // 下一轮 acquire 会等完退避期
                            warn!(op, attempt, "限流拒绝，等待退避期后重试");
                        }
                        _ => {
                            error!(op, attempt, error = %e, "交易所调用失败（不再重试）");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Kline>, ExchangeError> {
        self.execute(RateGroup::Market, 2, "get_klines", || {
            self.inner.get_klines(symbol, interval, start_ms, limit)
        })
        .await
    }

    pub async fn place_order(&self, req: &OrderRequest) -> Result<OrderState, ExchangeError> {
        self.execute(RateGroup::Order, 1, "place_order", || {
            self.inner.place_order(req)
        })
        .await
    }

    pub async fn cancel_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<OrderState, ExchangeError> {
        self.execute(RateGroup::Order, 1, "cancel_order", || {
            self.inner.cancel_order(symbol, client_order_id)
        })
        .await
    }

    pub async fn get_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<OrderState, ExchangeError> {
        self.execute(RateGroup::Order, 1, "get_order", || {
            self.inner.get_order(symbol, client_order_id)
        })
        .await
    }

    pub async fn get_account(&self) -> Result<AccountSnapshot, ExchangeError> {
        self.execute(RateGroup::Account, 5, "get_account", || {
            self.inner.get_account()
        })
        .await
    }

    pub async fn set_stop(&self, req: &OrderRequest) -> Result<OrderState, ExchangeError> {
        self.execute(RateGroup::Order, 1, "set_stop", || self.inner.set_stop(req))
            .await
    }
}
