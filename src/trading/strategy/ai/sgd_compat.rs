//! sgd_compat：与历史 sklearn SGDClassifier 模型兼容的实现
//!
//! 更新规则与 online_lr 相同，但学习率按 inverse scaling 衰减
//! （eta = eta0 / t^power_t），对给定输入不保证与 online_lr 输出一致 —
//! 两者是独立实现，按配置选择。

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{sigmoid, AiScorer, IMPL_SGD_COMPAT};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SgdCompatScorer {
    pub dim: usize,
    pub eta0: f64,
    pub power_t: f64,
    pub alpha: f64,
    pub bias: f64,
    pub w: Vec<f64>,
    pub seen: u64,
}

impl SgdCompatScorer {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            eta0: 0.1,
            power_t: 0.25,
            alpha: 1e-4,
            bias: 0.0,
            w: vec![0.0; dim],
            seen: 0,
        }
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let mut model: Self = serde_json::from_str(s)?;
        model.w.resize(model.dim, 0.0);
        Ok(model)
    }

    fn eta(&self) -> f64 {
        self.eta0 / ((self.seen + 1) as f64).powf(self.power_t)
    }

    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        if x.is_empty() {
            return 0.5;
        }
        let mut z = self.bias;
        for (wi, xi) in self.w.iter().zip(x.iter()) {
            z += wi * xi;
        }
        sigmoid(z)
    }
}

impl AiScorer for SgdCompatScorer {
    fn impl_tag(&self) -> &'static str {
        IMPL_SGD_COMPAT
    }

    fn score(&self, features: &[f64]) -> f64 {
        self.predict_proba(features) * 100.0
    }

    fn partial_fit(&mut self, features: &[f64], label: u8) {
        let y = if label == 1 { 1.0 } else { 0.0 };
        let p = self.predict_proba(features);
        let err = p - y;
        let eta = self.eta();
        let n = features.len().min(self.w.len());
        for i in 0..n {
            self.w[i] -= eta * (err * features[i] + self.alpha * self.w[i]);
        }
        self.bias -= eta * err;
        self.seen += 1;
    }

    fn samples_seen(&self) -> u64 {
        self.seen
    }

    fn serialize_model(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learning_rate_decays() {
        let mut model = SgdCompatScorer::new(2);
        let eta_start = model.eta();
        for _ in 0..100 {
            model.partial_fit(&[1.0, 0.0], 1);
        }
        assert!(model.eta() < eta_start);
    }

    #[test]
    fn test_learns_separable_stream() {
        let mut model = SgdCompatScorer::new(2);
        for _ in 0..500 {
            model.partial_fit(&[1.0, -0.5], 1);
            model.partial_fit(&[-1.0, -0.5], 0);
        }
        assert!(model.predict_proba(&[1.0, -0.5]) > 0.7);
        assert!(model.predict_proba(&[-1.0, -0.5]) < 0.3);
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut model = SgdCompatScorer::new(3);
        model.partial_fit(&[1.0, 2.0, 3.0], 0);
        let json = model.serialize_model().unwrap();
        let restored = SgdCompatScorer::from_json(&json).unwrap();
        assert_eq!(restored.seen, 1);
        let x = [0.4, 0.5, 0.6];
        assert!((restored.predict_proba(&x) - model.predict_proba(&x)).abs() < 1e-12);
    }
}
