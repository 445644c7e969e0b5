use thiserror::Error;

/// 应用错误
#[derive(Error, Debug)]
pub enum AppError {
    /// 业务错误
    #[error("业务错误: {0}")]
    BizError(String),

    /// 数据库错误
    #[error("数据库错误: {0}")]
    DbError(#[from] sqlx::Error),

    /// Redis错误
    #[error("Redis错误: {0}")]
    RedisError(#[from] redis::RedisError),

    /// 交易所错误
    #[error("交易所错误: {0}")]
    ExchangeError(#[from] crate::trading::core::exchange::ExchangeError),

    /// 风控拒绝
    #[error("风控拒绝: {reason_code}: {reason}")]
    RiskRejected { reason_code: String, reason: String },

    /// 未知错误
    #[error("未知错误: {0}")]
    Unknown(String),
}
