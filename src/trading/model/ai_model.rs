//! AI 模型存储：每个 model_name 恰好一行 is_current，切换在事务里完成

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::app_config::db::get_db_pool;

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct AiModelEntity {
    pub id: i64,
    pub model_name: String,
    pub version: i32,
    pub impl_tag: String,
    pub metrics_json: String,
    pub params_json: String,
    pub is_current: i8,
}

pub struct AiModelModel;

impl AiModelModel {
    pub async fn current(model_name: &str) -> Result<Option<AiModelEntity>> {
        let row = sqlx::query_as::<_, AiModelEntity>(
            "SELECT id, model_name, version, impl_tag, metrics_json, params_json, is_current
             FROM ai_models WHERE model_name = ? AND is_current = 1 LIMIT 1",
        )
        .bind(model_name)
        .fetch_optional(get_db_pool())
        .await?;
        Ok(row)
    }

    /// 保存新版本并原子切换 is_current
    pub async fn save_as_current(
        model_name: &str,
        impl_tag: &str,
        metrics_json: &str,
        params_json: &str,
    ) -> Result<i32> {
        let pool = get_db_pool();
        let mut tx = pool.begin().await?;

        let max_version: Option<i32> =
            sqlx::query_scalar("SELECT MAX(version) FROM ai_models WHERE model_name = ?")
                .bind(model_name)
                .fetch_one(&mut *tx)
                .await?;
        let version = max_version.unwrap_or(0) + 1;

        sqlx::query("UPDATE ai_models SET is_current = 0 WHERE model_name = ?")
            .bind(model_name)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO ai_models (model_name, version, impl_tag, metrics_json, params_json, is_current)
             VALUES (?, ?, ?, ?, ?, 1)",
        )
        .bind(model_name)
        .bind(version)
        .bind(impl_tag)
        .bind(metrics_json)
        .bind(params_json)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(version)
    }
}
