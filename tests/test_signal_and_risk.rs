//! Setup B 与风控的字面场景

use asv8::error::AppError;
use asv8::trading::indicator::feature::FeatureSet;
use asv8::trading::strategy::risk;
use asv8::trading::strategy::signal::{check_setup_b_long, SignalThresholds, REASON_SETUP_B};

fn feature_bar(
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
        ema_21: 100.0,
        ema_55: 98.0,
        squeeze_on,
        momentum,
        vol_ratio,
        rsi: 58.0,
        rsi_slope: 2.0,
        atr: 500.0,
        btc_corr: None,
    }
}

/// 冷启动模拟盘：ADX=28, +DI=24, -DI=12，挤压 prev on → curr off，
/// 动量 -0.5 → +0.3，vol_ratio=2.1，冷启动默认分 50 过线，
/// 开仓理由必须是 SETUP_B_SQUEEZE_RELEASE
#[test]
fn test_cold_start_signal_fires_with_default_score() {
    let prev = feature_bar(26.0, 20.0, 15.0, true, -0.5, 1.0);
    let curr = feature_bar(28.0, 24.0, 12.0, false, 0.3, 2.1);
    let decision = check_setup_b_long(&curr, &prev, 50.0, &SignalThresholds::default());
    assert!(decision.triggered);
    assert_eq!(decision.reason_code, REASON_SETUP_B);
}

/// 同一组特征缺任何一条腿都不触发
#[test]
fn test_all_legs_required() {
    let prev = feature_bar(26.0, 20.0, 15.0, true, -0.5, 1.0);
    let good = feature_bar(28.0, 24.0, 12.0, false, 0.3, 2.1);
    let thresholds = SignalThresholds::default();

    let mut weak_adx = good.clone();
    weak_adx.adx = 20.0;
    assert!(!check_setup_b_long(&weak_adx, &prev, 60.0, &thresholds).triggered);

    let mut di_inverted = good.clone();
    di_inverted.di_minus = 30.0;
    assert!(!check_setup_b_long(&di_inverted, &prev, 60.0, &thresholds).triggered);

    let mut still_squeezed = good.clone();
    still_squeezed.squeeze_on = true;
    assert!(!check_setup_b_long(&still_squeezed, &prev, 60.0, &thresholds).triggered);

    let mut momentum_negative = good.clone();
    momentum_negative.momentum = -0.1;
    assert!(!check_setup_b_long(&momentum_negative, &prev, 60.0, &thresholds).triggered);

    let mut thin_volume = good.clone();
    thin_volume.vol_ratio = 1.1;
    assert!(!check_setup_b_long(&thin_volume, &prev, 60.0, &thresholds).triggered);

    assert!(!check_setup_b_long(&good, &prev, 10.0, &thresholds).triggered);
    assert!(check_setup_b_long(&good, &prev, 60.0, &thresholds).triggered);
}

/// 风控预算：equity=500 → margin=50、预算 15U。
/// 止损距离 12% 时杠杆从 5 一路降到 2 才过线
#[test]
fn test_risk_budget_leverage_decrement() {
    let approval = risk::evaluate_long(500.0, 60.0, false, 100.0, 88.0, 5)
        .expect("expected approval at 2x");
    assert_eq!(approval.leverage, 2);
    assert!((approval.margin - 50.0).abs() < 1e-9);
    assert!(approval.risk_amount <= 0.03 * 500.0);
}

/// 1 倍杠杆仍超 3% 预算：必须拒单，reason_code = RISK_BUDGET_EXCEEDED
#[test]
fn test_risk_budget_rejection_at_1x() {
    let err = risk::evaluate_long(500.0, 60.0, false, 100.0, 55.0, 5).expect_err("expected rejection");
    match err {
        AppError::RiskRejected { reason_code, .. } => {
            assert_eq!(reason_code, risk::REASON_RISK_BUDGET_EXCEEDED);
        }
        other => panic!("expected RiskRejected, got {}", other),
    }
}

/// AI 高分放大只对热模型生效；冷启动保持基础保证金
#[test]
fn test_ai_margin_boost_gated_by_cold_start() {
    assert!((risk::dynamic_margin(5000.0, 90.0, false) - 600.0).abs() < 1e-9);
    assert!((risk::dynamic_margin(5000.0, 90.0, true) - 500.0).abs() < 1e-9);
    assert!((risk::dynamic_margin(5000.0, 70.0, false) - 500.0).abs() < 1e-9);
}
