//! AI 打分器
//!
//! 能力面刻意收窄：score / partial_fit / serialize / deserialize。
//! 具体实现按模型行里记录的 impl_tag 加载，缺失时回落 AI_MODEL_IMPL 配置，
//! 模型可以换实现而不需要迁移。

pub mod online_lr;
pub mod sgd_compat;

use anyhow::{anyhow, Result};

pub use online_lr::OnlineLogisticRegression;
pub use sgd_compat::SgdCompatScorer;

pub const IMPL_ONLINE_LR: &str = "online_lr";
pub const IMPL_SGD_COMPAT: &str = "sgd_compat";

/// 冷启动默认分（见风控：冷启动禁止杠杆放大）
pub const COLD_START_SCORE: f64 = 50.0;

pub trait AiScorer: Send + Sync {
    /// 实现标签，持久化进 ai_models.impl_tag
    fn impl_tag(&self) -> &'static str;

    /// 0-100 分
    fn score(&self, features: &[f64]) -> f64;

    /// 在线学习一条样本，label: 1 = 盈利离场
    fn partial_fit(&mut self, features: &[f64], label: u8);

    /// 已见样本数，用于冷启动判定
    fn samples_seen(&self) -> u64;

    fn serialize_model(&self) -> Result<String>;
}

/// 模型是否仍处于冷启动（样本太少，分数不可信）
pub fn is_cold_start(scorer: &dyn AiScorer) -> bool {
    scorer.samples_seen() < crate::app_config::env::env_parse_or("AI_COLD_START_MIN_SAMPLES", 30)
}

/// 按标签构建空模型
pub fn new_scorer(impl_tag: &str, dim: usize) -> Result<Box<dyn AiScorer>> {
    match impl_tag {
        IMPL_ONLINE_LR => Ok(Box::new(OnlineLogisticRegression::new(dim))),
        IMPL_SGD_COMPAT => Ok(Box::new(SgdCompatScorer::new(dim))),
        other => Err(anyhow!("未知的 AI 实现标签: {}", other)),
    }
}

/// 按标签反序列化模型
pub fn load_scorer(impl_tag: &str, params_json: &str) -> Result<Box<dyn AiScorer>> {
    match impl_tag {
        IMPL_ONLINE_LR => Ok(Box::new(OnlineLogisticRegression::from_json(params_json)?)),
        IMPL_SGD_COMPAT => Ok(Box::new(SgdCompatScorer::from_json(params_json)?)),
        other => Err(anyhow!("未知的 AI 实现标签: {}", other)),
    }
}

/// 数值稳定的 sigmoid
pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        let ez = (-z).exp();
        1.0 / (1.0 + ez)
    } else {
        let ez = z.exp();
        ez / (1.0 + ez)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_stable() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(800.0) > 0.999);
        assert!(sigmoid(-800.0) < 0.001);
    }

    #[test]
    fn test_new_scorer_by_tag() {
        assert_eq!(new_scorer(IMPL_ONLINE_LR, 8).unwrap().impl_tag(), "online_lr");
        assert_eq!(
            new_scorer(IMPL_SGD_COMPAT, 8).unwrap().impl_tag(),
            "sgd_compat"
        );
        assert!(new_scorer("who_knows", 8).is_err());
    }
}
