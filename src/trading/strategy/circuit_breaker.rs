//! 熔断器
//!
//! 聚合三类信号：连续下单失败、429 风暴（由限流器发信号）、回撤超限。
//! 任一阈值命中即写 HALT_TRADING=true（带审计）并告警。
//! 熔断从不自愈，恢复必须是显式 RESUME 指令。

use std::sync::Mutex;

use anyhow::Result;
use tracing::{error, warn};

use crate::trading::core::rate_limiter::BreakerSignal;
use crate::trading::model::system_config::{keys, SystemConfigModel};
use crate::trading::services::notification::Notifier;

const ORDER_ERROR_WINDOW_MS: i64 = 60_000;
const ORDER_ERROR_THRESHOLD: usize = 5;
const MAX_DRAWDOWN_PCT: f64 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub struct TripReason {
    pub reason_code: String,
    pub reason: String,
}

#[derive(Debug, Default)]
struct BreakerState {
    /// 窗口内连续下单失败的时间戳；一次成功清空
    order_error_ms: Vec<i64>,
    peak_equity: f64,
}

pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// 下单成功：连续失败计数清零
    pub fn record_order_success(&self) {
        let mut state = self.state.lock().expect("breaker poisoned");
        state.order_error_ms.clear();
    }

    /// 下单失败：返回 Some 表示达到阈值需要熔断
    pub fn record_order_error(&self, now_ms: i64) -> Option<TripReason> {
        let mut state = self.state.lock().expect("breaker poisoned");
        state.order_error_ms.push(now_ms);
        state
            .order_error_ms
            .retain(|t| now_ms - *t <= ORDER_ERROR_WINDOW_MS);
        if state.order_error_ms.len() >= ORDER_ERROR_THRESHOLD {
            Some(TripReason {
                reason_code: "CIRCUIT_BREAKER_ORDER_ERRORS".to_string(),
                reason: format!(
                    "{} consecutive order errors within {}s",
                    state.order_error_ms.len(),
                    ORDER_ERROR_WINDOW_MS / 1000
                ),
            })
        } else {
            None
        }
    }

    /// 权益采样：回撤超过 5% 触发
    pub fn record_equity(&self, equity: f64) -> Option<TripReason> {
        let mut state = self.state.lock().expect("breaker poisoned");
        if equity > state.peak_equity {
            state.peak_equity = equity;
            return None;
        }
        if state.peak_equity <= 0.0 {
            return None;
        }
        let drawdown = (state.peak_equity - equity) / state.peak_equity;
        if drawdown > MAX_DRAWDOWN_PCT {
            Some(TripReason {
                reason_code: "CIRCUIT_BREAKER_DRAWDOWN".to_string(),
                reason: format!(
                    "drawdown {:.2}% from peak {:.2}",
                    drawdown * 100.0,
                    state.peak_equity
                ),
            })
        } else {
            None
        }
    }

    /// 限流器信号直接转熔断
    pub fn from_limiter_signal(&self, signal: &BreakerSignal) -> TripReason {
        TripReason {
            reason_code: signal.reason_code.to_string(),
            reason: signal.detail.clone(),
        }
    }

    /// 执行熔断：写 HALT + 审计 + 告警。
    /// 已处于 HALT 时静默跳过；恢复只能由显式 RESUME 指令完成，
    /// 恢复之后再次越限会重新熔断。
    pub async fn trip(
        &self,
        reason: &TripReason,
        trace_id: &str,
        notifier: &dyn Notifier,
    ) -> Result<()> {
        if SystemConfigModel::get_bool(keys::HALT_TRADING, false)
            .await
            .unwrap_or(false)
        {
            return Ok(());
        }
        error!(
            reason_code = reason.reason_code.as_str(),
            reason = reason.reason.as_str(),
            trace_id,
            "熔断触发，停止开仓"
        );
        SystemConfigModel::write(
            keys::HALT_TRADING,
            "true",
            "circuit-breaker",
            trace_id,
            &reason.reason_code,
            &reason.reason,
        )
        .await?;
        if let Err(e) = notifier
            .send_system_alert(
                "CIRCUIT_BREAKER",
                trace_id,
                &[
                    ("reason_code".to_string(), reason.reason_code.clone()),
                    ("reason".to_string(), reason.reason.clone()),
                ],
            )
            .await
        {
            warn!(error = %e, "熔断告警发送失败");
        }
        Ok(())
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_errors_trip_at_threshold() {
        let breaker = CircuitBreaker::new();
        let t0 = 1_000_000;
        for i in 0..4 {
            assert!(breaker.record_order_error(t0 + i * 1000).is_none());
        }
        let trip = breaker.record_order_error(t0 + 5000).unwrap();
        assert_eq!(trip.reason_code, "CIRCUIT_BREAKER_ORDER_ERRORS");
    }

    #[test]
    fn test_success_resets_consecutive_errors() {
        let breaker = CircuitBreaker::new();
        let t0 = 1_000_000;
        for i in 0..4 {
            breaker.record_order_error(t0 + i * 1000);
        }
        breaker.record_order_success();
        assert!(breaker.record_order_error(t0 + 10_000).is_none());
    }

    #[test]
    fn test_old_errors_age_out_of_window() {
        let breaker = CircuitBreaker::new();
        for i in 0..4 {
            breaker.record_order_error(i * 1000);
        }
        // 61 秒后，窗口里只剩这一条
        assert!(breaker.record_order_error(65_000).is_none());
    }

    #[test]
    fn test_drawdown_trip() {
        let breaker = CircuitBreaker::new();
        assert!(breaker.record_equity(1000.0).is_none());
        assert!(breaker.record_equity(960.0).is_none()); // 4%
        let trip = breaker.record_equity(940.0).unwrap(); // 6%
        assert_eq!(trip.reason_code, "CIRCUIT_BREAKER_DRAWDOWN");
    }
}
