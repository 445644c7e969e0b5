//! 日终归档：HK 00:00 把 90 天前的热表数据搬进 *_history
//!
//! 每批在一个事务里 insert-ignore + delete 同一区间，批量有上界；
//! 历史表与热表同主键，重跑只会搬 0 行。每个区间记一行 archive_audit。

use anyhow::Result;
use sqlx::{MySql, Pool};
use tracing::{error, info};
use uuid::Uuid;

use crate::app_config::db::get_db_pool;
use crate::time_util;
use crate::trading::model::archive_audit::ArchiveAuditModel;

const ARCHIVE_RETENTION_DAYS: i64 = 90;
const ARCHIVE_BATCH_ROWS: i64 = 5_000;

/// 归档的热表与其主键时间列。表名是编译期常量，不走参数绑定。
const ARCHIVE_TABLES: [&str; 2] = ["market_data", "market_data_cache"];

pub async fn run_daily_archive() -> Result<()> {
    let trace_id = Uuid::new_v4().to_string();
    let cutoff = time_util::now_ms() - ARCHIVE_RETENTION_DAYS * 86_400_000;
    info!(trace_id = trace_id.as_str(), cutoff, "归档任务开始");

    let pool = get_db_pool();
    for table in ARCHIVE_TABLES {
        if let Err(e) = archive_table(pool, table, cutoff, &trace_id).await {
            error!(table, error = %e, "归档失败");
            ArchiveAuditModel::record(table, 0, cutoff, 0, &trace_id, "ERROR", &e.to_string())
                .await
                .ok();
        }
    }
    Ok(())
}

async fn archive_table(
    pool: &Pool<MySql>,
    table: &str,
    cutoff_ms: i64,
    trace_id: &str,
) -> Result<()> {
    loop {
        // 本批区间：cutoff 之前最旧的一段
        let batch: Vec<i64> = sqlx::query_scalar(&format!(
            "SELECT open_time_ms FROM {} WHERE open_time_ms < ?
             ORDER BY open_time_ms ASC LIMIT ?",
            table
        ))
        .bind(cutoff_ms)
        .bind(ARCHIVE_BATCH_ROWS)
        .fetch_all(pool)
        .await?;

        let (from, to) = match (batch.first(), batch.last()) {
            (Some(from), Some(to)) => (*from, *to),
            _ => break,
        };

        let mut tx = pool.begin().await?;
        sqlx::query(&format!(
            "INSERT IGNORE INTO {t}_history SELECT * FROM {t}
             WHERE open_time_ms >= ? AND open_time_ms <= ?",
            t = table
        ))
        .bind(from)
        .bind(to)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query(&format!(
            "DELETE FROM {} WHERE open_time_ms >= ? AND open_time_ms <= ?",
            table
        ))
        .bind(from)
        .bind(to)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let moved = deleted.rows_affected();
        info!(table, from, to, moved, "归档批次完成");
        ArchiveAuditModel::record(table, from, to, moved, trace_id, "OK", "batch archived")
            .await?;

        if moved < ARCHIVE_BATCH_ROWS as u64 {
            break;
        }
    }
    Ok(())
}
