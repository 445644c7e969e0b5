//! 控制指令队列
//!
//! 管理面入队，本服务消费。至少一次投递，幂等性由消费方保证。
//! 认领使用条件更新 NEW→PROCESSING，避免多实例重复消费。

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::app_config::db::get_db_pool;

pub mod commands {
    pub const HALT: &str = "HALT";
    pub const RESUME: &str = "RESUME";
    pub const EMERGENCY_EXIT: &str = "EMERGENCY_EXIT";
    pub const CONFIG_SET: &str = "CONFIG_SET";
}

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct ControlCommandEntity {
    pub id: i64,
    pub command: String,
    pub payload_json: Option<String>,
    pub status: String,
    pub trace_id: String,
    pub actor: String,
    pub reason_code: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

pub struct ControlCommandModel;

impl ControlCommandModel {
    pub async fn enqueue(
        command: &str,
        payload_json: Option<&str>,
        actor: &str,
        trace_id: &str,
        reason_code: &str,
        reason: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO control_commands
               (command, payload_json, status, trace_id, actor, reason_code, reason)
             VALUES (?, ?, 'NEW', ?, ?, ?, ?)",
        )
        .bind(command)
        .bind(payload_json)
        .bind(trace_id)
        .bind(actor)
        .bind(reason_code)
        .bind(reason)
        .execute(get_db_pool())
        .await?;
        Ok(result.last_insert_id() as i64)
    }

    /// 原子认领最旧的 NEW 指令（条件更新；返回 None 表示队列为空或已被他人认领）
    pub async fn claim_next_new() -> Result<Option<ControlCommandEntity>> {
        let pool = get_db_pool();
        let candidate: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM control_commands WHERE status = 'NEW' ORDER BY id ASC LIMIT 1",
        )
        .fetch_optional(pool)
        .await?;

        let id = match candidate {
            Some(id) => id,
            None => return Ok(None),
        };

        let claimed = sqlx::query(
            "UPDATE control_commands SET status = 'PROCESSING' WHERE id = ? AND status = 'NEW'",
        )
        .bind(id)
        .execute(pool)
        .await?;
        if claimed.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, ControlCommandEntity>(
            "SELECT * FROM control_commands WHERE id = ?",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(Some(row))
    }

    pub async fn mark_processed(id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE control_commands SET status = 'PROCESSED', processed_at = NOW() WHERE id = ?",
        )
        .bind(id)
        .execute(get_db_pool())
        .await?;
        Ok(())
    }

    pub async fn mark_error(id: i64, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE control_commands
             SET status = 'ERROR', processed_at = NOW(), error = ? WHERE id = ?",
        )
        .bind(error)
        .bind(id)
        .execute(get_db_pool())
        .await?;
        Ok(())
    }
}
