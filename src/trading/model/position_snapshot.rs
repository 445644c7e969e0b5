//! 仓位快照：周期性 + 事件触发

use anyhow::Result;
use serde_json::Value;

use crate::app_config::db::get_db_pool;

pub struct PositionSnapshotModel;

impl PositionSnapshotModel {
    pub async fn write(symbol: &str, base_qty: f64, avg_entry_price: f64, meta: &Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO position_snapshots (symbol, base_qty, avg_entry_price, meta_json)
             VALUES (?, ?, ?, ?)",
        )
        .bind(symbol)
        .bind(base_qty)
        .bind(avg_entry_price)
        .bind(meta.to_string())
        .execute(get_db_pool())
        .await?;
        Ok(())
    }
}
