//! 系统配置与配置审计
//!
//! 配置写入与 config_audit 落在同一事务里：没有无审计的配置变更。

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::info;

use crate::app_config::db::get_db_pool;

/// 约定的配置键
pub mod keys {
    pub const HALT_TRADING: &str = "HALT_TRADING";
    pub const EMERGENCY_EXIT: &str = "EMERGENCY_EXIT";
    pub const SYMBOLS: &str = "SYMBOLS";
    pub const TIMEFRAME: &str = "TIMEFRAME";
    pub const FEATURE_VERSION: &str = "FEATURE_VERSION";
    pub const AI_MODEL_IMPL: &str = "AI_MODEL_IMPL";
}

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct ConfigAuditEntity {
    pub actor: String,
    pub action: String,
    pub cfg_key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub trace_id: String,
    pub reason_code: String,
    pub reason: String,
}

pub struct SystemConfigModel;

impl SystemConfigModel {
    pub async fn get(key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT cfg_value FROM system_config WHERE cfg_key = ?")
                .bind(key)
                .fetch_optional(get_db_pool())
                .await?;
        Ok(value)
    }

    pub async fn get_or(key: &str, default: &str) -> Result<String> {
        Ok(Self::get(key).await?.unwrap_or_else(|| default.to_string()))
    }

    pub async fn get_bool(key: &str, default: bool) -> Result<bool> {
        Ok(match Self::get(key).await? {
            Some(v) => v.eq_ignore_ascii_case("true") || v == "1",
            None => default,
        })
    }

    /// 写配置 + 审计，单事务
    pub async fn write(
        key: &str,
        value: &str,
        actor: &str,
        trace_id: &str,
        reason_code: &str,
        reason: &str,
    ) -> Result<()> {
        let pool = get_db_pool();
        let mut tx = pool.begin().await?;

        let old_value: Option<String> =
            sqlx::query_scalar("SELECT cfg_value FROM system_config WHERE cfg_key = ?")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;

        sqlx::query(
            "INSERT INTO system_config (cfg_key, cfg_value) VALUES (?, ?)
             ON DUPLICATE KEY UPDATE cfg_value = VALUES(cfg_value)",
        )
        .bind(key)
        .bind(value)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO config_audit
               (actor, action, cfg_key, old_value, new_value, trace_id, reason_code, reason)
             VALUES (?, 'SET', ?, ?, ?, ?, ?, ?)",
        )
        .bind(actor)
        .bind(key)
        .bind(&old_value)
        .bind(value)
        .bind(trace_id)
        .bind(reason_code)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(key, value, actor, trace_id, "配置已更新");
        Ok(())
    }
}
