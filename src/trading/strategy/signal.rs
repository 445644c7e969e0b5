//! Setup B 做多信号
//!
//! 全部条件在刚收盘的 bar 上成立才触发：
//! 趋势（ADX、+DI>-DI）、挤压释放（prev on → curr off）、
//! 动量由负转正、量比达标、AI 分达标。

use serde::{Deserialize, Serialize};

use crate::trading::indicator::feature::FeatureSet;

pub const REASON_SETUP_B: &str = "SETUP_B_SQUEEZE_RELEASE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalThresholds {
    pub adx_min: f64,
    pub vol_ratio_min: f64,
    pub ai_score_min: f64,
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self {
            adx_min: 25.0,
            vol_ratio_min: 1.5,
            ai_score_min: 50.0,
        }
    }
}

/// 信号判定结果。未触发时 reason_code 说明卡在哪一条。
#[derive(Debug, Clone)]
pub struct SignalDecision {
    pub triggered: bool,
    pub reason_code: &'static str,
    pub reason: String,
}

impl SignalDecision {
    fn rejected(reason_code: &'static str, reason: String) -> Self {
        Self {
            triggered: false,
            reason_code,
            reason,
        }
    }
}

/// 无状态判定：输入当前与前一根 bar 的特征 + AI 分
pub fn check_setup_b_long(
    curr: &FeatureSet,
    prev: &FeatureSet,
    ai_score: f64,
    thresholds: &SignalThresholds,
) -> SignalDecision {
    // 1. 趋势
    if curr.adx < thresholds.adx_min || curr.di_plus <= curr.di_minus {
        return SignalDecision::rejected(
            "SETUP_B_TREND_WEAK",
            format!(
                "ADX={:.1} (min {:.1}), +DI={:.1}, -DI={:.1}",
                curr.adx, thresholds.adx_min, curr.di_plus, curr.di_minus
            ),
        );
    }

    // 2. 挤压释放：前一根在挤压中，这一根已张开
    if !(prev.squeeze_on && !curr.squeeze_on) {
        return SignalDecision::rejected(
            "SETUP_B_NO_SQUEEZE_RELEASE",
            format!(
                "squeeze prev={} curr={}",
                prev.squeeze_on, curr.squeeze_on
            ),
        );
    }

    // 3. 动量金叉：≤0 → >0
    if !(prev.momentum <= 0.0 && curr.momentum > 0.0) {
        return SignalDecision::rejected(
            "SETUP_B_NO_MOMENTUM_FLIP",
            format!(
                "momentum prev={:.4} curr={:.4}",
                prev.momentum, curr.momentum
            ),
        );
    }

    // 4. 量能
    if curr.vol_ratio < thresholds.vol_ratio_min {
        return SignalDecision::rejected(
            "SETUP_B_LOW_VOLUME",
            format!(
                "vol_ratio={:.2} (min {:.2})",
                curr.vol_ratio, thresholds.vol_ratio_min
            ),
        );
    }

    // 5. AI 分
    if ai_score < thresholds.ai_score_min {
        return SignalDecision::rejected(
            "SETUP_B_AI_SCORE_LOW",
            format!(
                "ai_score={:.1} (min {:.1})",
                ai_score, thresholds.ai_score_min
            ),
        );
    }

    SignalDecision {
        triggered: true,
        reason_code: REASON_SETUP_B,
        reason: format!(
            "Squeeze release, ADX={:.1}, +DI={:.1} > -DI={:.1}, momentum {:.4}->{:.4}, vol_ratio={:.2}, ai={:.1}",
            curr.adx, curr.di_plus, curr.di_minus, prev.momentum, curr.momentum, curr.vol_ratio, ai_score
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(
        adx: f64,
        di_plus: f64,
        di_minus: f64,
        squeeze_on: bool,
        momentum: f64,
        vol_ratio: f64,
    ) -> FeatureSet {
        FeatureSet {
            adx,
            di_plus,
            di_minus,
            ema_21: 0.0,
            ema_55: 0.0,
            squeeze_on,
            momentum,
            vol_ratio,
            rsi: 55.0,
            rsi_slope: 1.0,
            atr: 1.0,
            btc_corr: None,
        }
    }

    /// 冷启动模拟盘场景的信号面：ADX=28, +DI=24, -DI=12,
    /// 挤压 prev on → curr off，动量 -0.5 → +0.3，量比 2.1，AI 60
    #[test]
    fn test_cold_start_scenario_triggers() {
        let prev = features(27.0, 22.0, 13.0, true, -0.5, 1.0);
        let curr = features(28.0, 24.0, 12.0, false, 0.3, 2.1);
        let decision = check_setup_b_long(&curr, &prev, 60.0, &SignalThresholds::default());
        assert!(decision.triggered);
        assert_eq!(decision.reason_code, REASON_SETUP_B);
        assert!(decision.reason.contains("ADX=28.0"));
    }

    #[test]
    fn test_weak_trend_rejects() {
        let prev = features(27.0, 22.0, 13.0, true, -0.5, 1.0);
        let curr = features(20.0, 24.0, 12.0, false, 0.3, 2.1);
        let decision = check_setup_b_long(&curr, &prev, 60.0, &SignalThresholds::default());
        assert!(!decision.triggered);
        assert_eq!(decision.reason_code, "SETUP_B_TREND_WEAK");
    }

    #[test]
    fn test_no_release_without_prior_squeeze() {
        let prev = features(27.0, 22.0, 13.0, false, -0.5, 1.0);
        let curr = features(28.0, 24.0, 12.0, false, 0.3, 2.1);
        let decision = check_setup_b_long(&curr, &prev, 60.0, &SignalThresholds::default());
        assert!(!decision.triggered);
        assert_eq!(decision.reason_code, "SETUP_B_NO_SQUEEZE_RELEASE");
    }

    #[test]
    fn test_momentum_must_cross_zero() {
        let prev = features(27.0, 22.0, 13.0, true, 0.2, 1.0);
        let curr = features(28.0, 24.0, 12.0, false, 0.3, 2.1);
        let decision = check_setup_b_long(&curr, &prev, 60.0, &SignalThresholds::default());
        assert!(!decision.triggered);
        assert_eq!(decision.reason_code, "SETUP_B_NO_MOMENTUM_FLIP");
    }

    #[test]
    fn test_low_volume_rejects() {
        let prev = features(27.0, 22.0, 13.0, true, -0.5, 1.0);
        let curr = features(28.0, 24.0, 12.0, false, 0.3, 1.2);
        let decision = check_setup_b_long(&curr, &prev, 60.0, &SignalThresholds::default());
        assert!(!decision.triggered);
        assert_eq!(decision.reason_code, "SETUP_B_LOW_VOLUME");
    }

    #[test]
    fn test_ai_gate() {
        let prev = features(27.0, 22.0, 13.0, true, -0.5, 1.0);
        let curr = features(28.0, 24.0, 12.0, false, 0.3, 2.1);
        let decision = check_setup_b_long(&curr, &prev, 42.0, &SignalThresholds::default());
        assert!(!decision.triggered);
        assert_eq!(decision.reason_code, "SETUP_B_AI_SCORE_LOW");
    }
}
