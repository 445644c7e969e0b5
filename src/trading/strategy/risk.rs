//! 动态保证金与 3% 硬风控
//!
//! base_margin = max(50, equity * 10%)，AI 分 > 85 且非冷启动时放大 1.2 倍。
//! risk_amount = base_margin * leverage * stop_dist_pct，超过 3% * equity
//! 就把杠杆降 1 重试；降到 1 仍超标则拒单（RISK_BUDGET_EXCEEDED）。

use crate::error::AppError;

pub const REASON_RISK_BUDGET_EXCEEDED: &str = "RISK_BUDGET_EXCEEDED";
pub const REASON_RISK_INVALID_STOP: &str = "RISK_INVALID_STOP";

const MIN_MARGIN_USDT: f64 = 50.0;
const MARGIN_EQUITY_PCT: f64 = 0.10;
const AI_BOOST_SCORE: f64 = 85.0;
const AI_BOOST_FACTOR: f64 = 1.2;
const RISK_BUDGET_PCT: f64 = 0.03;

/// 动态保证金。冷启动禁止 AI 放大。
pub fn dynamic_margin(equity: f64, ai_score: f64, cold_start: bool) -> f64 {
    let mut margin = MIN_MARGIN_USDT.max(equity * MARGIN_EQUITY_PCT);
    if ai_score > AI_BOOST_SCORE && !cold_start {
        margin *= AI_BOOST_FACTOR;
    }
    margin
}

/// 通过风控的仓位参数
#[derive(Debug, Clone)]
pub struct RiskApproval {
    pub qty: f64,
    pub leverage: u32,
    pub margin: f64,
    pub risk_amount: f64,
    pub stop_dist_pct: f64,
    pub reason: String,
}

/// 多头仓位的风控判定。拒单走 AppError::RiskRejected，调用方据此写 REJECTED 事件。
pub fn evaluate_long(
    equity: f64,
    ai_score: f64,
    cold_start: bool,
    entry_price: f64,
    stop_price: f64,
    max_leverage: u32,
) -> Result<RiskApproval, AppError> {
    if entry_price <= 0.0 || stop_price >= entry_price {
        return Err(AppError::RiskRejected {
            reason_code: REASON_RISK_INVALID_STOP.to_string(),
            reason: format!(
                "stop {:.4} must be below entry {:.4} for long",
                stop_price, entry_price
            ),
        });
    }

    let stop_dist_pct = (entry_price - stop_price) / entry_price;
    let margin = dynamic_margin(equity, ai_score, cold_start);
    let budget = equity * RISK_BUDGET_PCT;

    let mut leverage = max_leverage.max(1);
    loop {
        let risk_amount = margin * leverage as f64 * stop_dist_pct;
        if risk_amount <= budget {
            let qty = margin * leverage as f64 / entry_price;
            return Ok(RiskApproval {
                qty,
                leverage,
                margin,
                risk_amount,
                stop_dist_pct,
                reason: format!(
                    "Risk OK: risk=${:.2} <= budget=${:.2} at {}x (margin=${:.2}, stop_dist={:.2}%)",
                    risk_amount,
                    budget,
                    leverage,
                    margin,
                    stop_dist_pct * 100.0
                ),
            });
        }
        if leverage == 1 {
            return Err(AppError::RiskRejected {
                reason_code: REASON_RISK_BUDGET_EXCEEDED.to_string(),
                reason: format!(
                    "risk=${:.2} > budget=${:.2} even at 1x (margin=${:.2}, stop_dist={:.2}%)",
                    risk_amount,
                    budget,
                    margin,
                    stop_dist_pct * 100.0
                ),
            });
        }
        leverage -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejection_code(err: AppError) -> String {
        match err {
            AppError::RiskRejected { reason_code, .. } => reason_code,
            other => panic!("expected RiskRejected, got {}", other),
        }
    }

    #[test]
    fn test_margin_floor_and_pct() {
        // 小资金走 50U 保底
        assert!((dynamic_margin(300.0, 60.0, false) - 50.0).abs() < 1e-9);
        // 大资金走 10%
        assert!((dynamic_margin(2000.0, 60.0, false) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_ai_boost_requires_warm_model() {
        assert!((dynamic_margin(2000.0, 90.0, false) - 240.0).abs() < 1e-9);
        // 冷启动禁止放大
        assert!((dynamic_margin(2000.0, 90.0, true) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_leverage_decrements_until_within_budget() {
        // equity=500 → margin=50, budget=15；stop_dist=12%:
        // 5x: 30 > 15 → 4x: 24 → 3x: 18 → 2x: 12 ≤ 15，批准于 2x
        let approval = evaluate_long(500.0, 60.0, false, 100.0, 88.0, 5).unwrap();
        assert_eq!(approval.leverage, 2);
        assert!((approval.risk_amount - 12.0).abs() < 1e-9);
        assert!((approval.qty - 1.0).abs() < 1e-9); // 50*2/100
    }

    #[test]
    fn test_rejects_when_even_1x_exceeds_budget() {
        // stop_dist=40% → 1x risk = 50*0.4 = 20 > 15
        let err = evaluate_long(500.0, 60.0, false, 100.0, 60.0, 5).unwrap_err();
        assert_eq!(rejection_code(err), REASON_RISK_BUDGET_EXCEEDED);
    }

    #[test]
    fn test_invalid_stop_rejected() {
        let err = evaluate_long(500.0, 60.0, false, 100.0, 105.0, 5).unwrap_err();
        assert_eq!(rejection_code(err), REASON_RISK_INVALID_STOP);
    }

    #[test]
    fn test_cold_start_paper_sizing() {
        // 冷启动模拟盘：equity=500, 2% 止损距离 → 5x 风险 $5 远低于 $15 预算
        let approval = evaluate_long(500.0, 50.0, true, 50_000.0, 49_000.0, 5).unwrap();
        assert_eq!(approval.leverage, 5);
        assert!((approval.margin - 50.0).abs() < 1e-9);
    }
}
