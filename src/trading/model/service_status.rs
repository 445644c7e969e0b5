//! 服务心跳（(service, instance) 维度的 UPSERT，非追加表）

use anyhow::Result;
use serde_json::Value;

use crate::app_config::db::get_db_pool;

pub struct ServiceStatusModel;

impl ServiceStatusModel {
    pub async fn upsert(service_name: &str, instance_id: &str, status: &Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO service_status (service_name, instance_id, last_heartbeat, status_json)
             VALUES (?, ?, NOW(), ?)
             ON DUPLICATE KEY UPDATE last_heartbeat = NOW(), status_json = VALUES(status_json)",
        )
        .bind(service_name)
        .bind(instance_id)
        .bind(status.to_string())
        .execute(get_db_pool())
        .await?;
        Ok(())
    }
}

/// 稳定的实例标识：hostname-pid
pub fn instance_id() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{}-{}", hostname, std::process::id())
}
