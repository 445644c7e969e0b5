//! 在线逻辑回归（逐样本 SGD），无重依赖，可 JSON 持久化

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{sigmoid, AiScorer, IMPL_ONLINE_LR};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OnlineLogisticRegression {
    pub dim: usize,
    pub lr: f64,
    pub l2: f64,
    pub bias: f64,
    pub w: Vec<f64>,
    pub seen: u64,
    pub version: u32,
}

impl OnlineLogisticRegression {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            lr: 0.05,
            l2: 1e-6,
            bias: 0.0,
            w: vec![0.0; dim],
            seen: 0,
            version: 1,
        }
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let mut model: Self = serde_json::from_str(s)?;
        // 维度兜底：截断或补零到声明维度
        model.w.resize(model.dim, 0.0);
        Ok(model)
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

impl AiScorer for OnlineLogisticRegression {
    fn impl_tag(&self) -> &'static str {
        IMPL_ONLINE_LR
    }

    fn score(&self, features: &[f64]) -> f64 {
        self.predict_proba(features) * 100.0
    }

    fn partial_fit(&mut self, features: &[f64], label: u8) {
        let y = if label == 1 { 1.0 } else { 0.0 };
        let p = self.predict_proba(features);
        let err = p - y;
        let n = features.len().min(self.w.len());
        for i in 0..n {
            self.w[i] -= self.lr * (err * features[i] + self.l2 * self.w[i]);
        }
        self.bias -= self.lr * err;
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
    fn test_learns_separable_stream() {
        let mut model = OnlineLogisticRegression::new(2);
        // 简单可分样本：x0 > 0 为正类
        for _ in 0..200 {
            model.partial_fit(&[1.0, 0.3], 1);
            model.partial_fit(&[-1.0, 0.3], 0);
        }
        assert!(model.predict_proba(&[1.0, 0.3]) > 0.8);
        assert!(model.predict_proba(&[-1.0, 0.3]) < 0.2);
        assert_eq!(model.samples_seen(), 400);
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut model = OnlineLogisticRegression::new(3);
        model.partial_fit(&[0.5, -0.2, 1.0], 1);
        let json = model.serialize_model().unwrap();
        let restored = OnlineLogisticRegression::from_json(&json).unwrap();
        let x = [0.1, 0.2, 0.3];
        assert!((restored.predict_proba(&x) - model.predict_proba(&x)).abs() < 1e-12);
        assert_eq!(restored.seen, model.seen);
    }

    #[test]
    fn test_empty_features_neutral() {
        let model = OnlineLogisticRegression::new(4);
        assert!((model.predict_proba(&[]) - 0.5).abs() < 1e-12);
    }
}
