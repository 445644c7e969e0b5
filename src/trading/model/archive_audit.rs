//! 归档审计：每次归档区间一行

use anyhow::Result;

use crate::app_config::db::get_db_pool;

pub struct ArchiveAuditModel;

impl ArchiveAuditModel {
    pub async fn record(
        table_name: &str,
        from_open_time: i64,
        to_open_time: i64,
        moved_rows: u64,
        trace_id: &str,
        status: &str,
        message: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO archive_audit
               (table_name, from_open_time, to_open_time, moved_rows, trace_id, status, message)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(table_name)
        .bind(from_open_time)
        .bind(to_open_time)
        .bind(moved_rows as i64)
        .bind(trace_id)
        .bind(status)
        .bind(message)
        .execute(get_db_pool())
        .await?;
        Ok(())
    }
}
