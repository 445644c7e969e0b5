//! AI 打分器：按标签装载、在线学习、序列化恢复

use asv8::trading::strategy::ai::{
    self, AiScorer, OnlineLogisticRegression, SgdCompatScorer, IMPL_ONLINE_LR, IMPL_SGD_COMPAT,
};

#[test]
fn test_scorer_selection_by_tag() {
    let lr = ai::new_scorer(IMPL_ONLINE_LR, 8).unwrap();
    let sgd = ai::new_scorer(IMPL_SGD_COMPAT, 8).unwrap();
    assert_eq!(lr.impl_tag(), IMPL_ONLINE_LR);
    assert_eq!(sgd.impl_tag(), IMPL_SGD_COMPAT);
}

#[test]
fn test_cold_start_threshold() {
    let mut model = OnlineLogisticRegression::new(2);
    assert!(ai::is_cold_start(&model));
    for _ in 0..40 {
        model.partial_fit(&[0.5, -0.5], 1);
    }
    assert!(!ai::is_cold_start(&model));
}

/// 两个实现是独立的：同一输入不要求分数一致
#[test]
fn test_impls_are_independent() {
    let mut lr = OnlineLogisticRegression::new(2);
    let mut sgd = SgdCompatScorer::new(2);
    for _ in 0..50 {
        lr.partial_fit(&[1.0, 0.0], 1);
        lr.partial_fit(&[-1.0, 0.0], 0);
        sgd.partial_fit(&[1.0, 0.0], 1);
        sgd.partial_fit(&[-1.0, 0.0], 0);
    }
    // 两者都学到了方向
    assert!(lr.score(&[1.0, 0.0]) > lr.score(&[-1.0, 0.0]));
    assert!(sgd.score(&[1.0, 0.0]) > sgd.score(&[-1.0, 0.0]));
}

/// 落库 → 装载闭环：load_scorer 按标签恢复出等价模型
#[test]
fn test_persist_and_reload_round_trip() {
    let mut model = OnlineLogisticRegression::new(3);
    for i in 0..20 {
        model.partial_fit(&[i as f64 / 20.0, 0.5, -0.5], (i % 2) as u8);
    }
    let params = model.serialize_model().unwrap();

    let restored = ai::load_scorer(IMPL_ONLINE_LR, &params).unwrap();
    assert_eq!(restored.samples_seen(), 20);
    let x = [0.3, 0.5, -0.5];
    assert!((restored.score(&x) - model.score(&x)).abs() < 1e-9);

    // 错误标签拒绝装载
    assert!(ai::load_scorer("nope", &params).is_err());
}

#[test]
fn test_scores_stay_in_0_100() {
    let mut model = OnlineLogisticRegression::new(1);
    for _ in 0..1000 {
        model.partial_fit(&[100.0], 1);
    }
    let s = model.score(&[100.0]);
    assert!((0.0..=100.0).contains(&s));
    assert!(s > 95.0);
}
