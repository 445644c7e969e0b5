//! 特征缓存 market_data_cache 与预计算任务 precompute_tasks
//!
//! 主键都带 feature_version：不同版本永不互相覆盖，读取方必须按当前版本过滤。

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::app_config::db::get_db_pool;

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct MarketCacheEntity {
    pub symbol: String,
    pub timeframe: String,
    pub open_time_ms: i64,
    pub feature_version: i32,
    pub features_json: String,
}

pub struct MarketCacheModel;

impl MarketCacheModel {
    pub async fn insert_ignore(entity: &MarketCacheEntity) -> Result<bool> {
        let result = sqlx::query(
            "INSERT IGNORE INTO market_data_cache
               (symbol, timeframe, open_time_ms, feature_version, features_json)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entity.symbol)
        .bind(&entity.timeframe)
        .bind(entity.open_time_ms)
        .bind(entity.feature_version)
        .bind(&entity.features_json)
        .execute(get_db_pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// 指定版本的最新一行
    pub async fn latest_cache(
        symbol: &str,
        timeframe: &str,
        feature_version: i32,
    ) -> Result<Option<MarketCacheEntity>> {
        let row = sqlx::query_as::<_, MarketCacheEntity>(
            "SELECT symbol, timeframe, open_time_ms, feature_version, features_json
             FROM market_data_cache
             WHERE symbol = ? AND timeframe = ? AND feature_version = ?
             ORDER BY open_time_ms DESC LIMIT 1",
        )
        .bind(symbol)
        .bind(timeframe)
        .bind(feature_version)
        .fetch_optional(get_db_pool())
        .await?;
        Ok(row)
    }

    /// 指定 bar 的缓存行（在线学习回查开仓 bar 的特征用）
    pub async fn get_at(
        symbol: &str,
        timeframe: &str,
        open_time_ms: i64,
        feature_version: i32,
    ) -> Result<Option<MarketCacheEntity>> {
        let row = sqlx::query_as::<_, MarketCacheEntity>(
            "SELECT symbol, timeframe, open_time_ms, feature_version, features_json
             FROM market_data_cache
             WHERE symbol = ? AND timeframe = ? AND open_time_ms = ? AND feature_version = ?",
        )
        .bind(symbol)
        .bind(timeframe)
        .bind(open_time_ms)
        .bind(feature_version)
        .fetch_optional(get_db_pool())
        .await?;
        Ok(row)
    }

    /// 指定版本的最近两行（prev-bar 对比用），按时间正序返回 [prev, curr]
    pub async fn last_two_cache(
        symbol: &str,
        timeframe: &str,
        feature_version: i32,
    ) -> Result<Vec<MarketCacheEntity>> {
        let mut rows = sqlx::query_as::<_, MarketCacheEntity>(
            "SELECT symbol, timeframe, open_time_ms, feature_version, features_json
             FROM market_data_cache
             WHERE symbol = ? AND timeframe = ? AND feature_version = ?
             ORDER BY open_time_ms DESC LIMIT 2",
        )
        .bind(symbol)
        .bind(timeframe)
        .bind(feature_version)
        .fetch_all(get_db_pool())
        .await?;
        rows.reverse();
        Ok(rows)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, FromRow)]
pub struct PrecomputeTaskEntity {
    pub symbol: String,
    pub timeframe: String,
    pub open_time_ms: i64,
    pub feature_version: i32,
    pub status: String,
    pub try_count: i32,
    pub last_error: Option<String>,
    pub trace_id: String,
}

pub struct PrecomputeTaskModel;

impl PrecomputeTaskModel {
    pub async fn enqueue(
        symbol: &str,
        timeframe: &str,
        open_time_ms: i64,
        feature_version: i32,
        trace_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT IGNORE INTO precompute_tasks
               (symbol, timeframe, open_time_ms, feature_version, status, trace_id)
             VALUES (?, ?, ?, ?, 'PENDING', ?)",
        )
        .bind(symbol)
        .bind(timeframe)
        .bind(open_time_ms)
        .bind(feature_version)
        .bind(trace_id)
        .execute(get_db_pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn pending(symbol: &str, timeframe: &str, feature_version: i32, limit: u32) -> Result<Vec<PrecomputeTaskEntity>> {
        let rows = sqlx::query_as::<_, PrecomputeTaskEntity>(
            "SELECT symbol, timeframe, open_time_ms, feature_version, status, try_count, last_error, trace_id
             FROM precompute_tasks
             WHERE symbol = ? AND timeframe = ? AND feature_version = ? AND status = 'PENDING'
             ORDER BY open_time_ms ASC LIMIT ?",
        )
        .bind(symbol)
        .bind(timeframe)
        .bind(feature_version)
        .bind(limit)
        .fetch_all(get_db_pool())
        .await?;
        Ok(rows)
    }

    pub async fn mark_done(task: &PrecomputeTaskEntity) -> Result<()> {
        sqlx::query(
            "UPDATE precompute_tasks SET status = 'DONE'
             WHERE symbol = ? AND timeframe = ? AND open_time_ms = ? AND feature_version = ?",
        )
        .bind(&task.symbol)
        .bind(&task.timeframe)
        .bind(task.open_time_ms)
        .bind(task.feature_version)
        .execute(get_db_pool())
        .await?;
        Ok(())
    }

    pub async fn mark_error(task: &PrecomputeTaskEntity, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE precompute_tasks
             SET status = 'ERROR', try_count = try_count + 1, last_error = ?
             WHERE symbol = ? AND timeframe = ? AND open_time_ms = ? AND feature_version = ?",
        )
        .bind(error)
        .bind(&task.symbol)
        .bind(&task.timeframe)
        .bind(task.open_time_ms)
        .bind(task.feature_version)
        .execute(get_db_pool())
        .await?;
        Ok(())
    }
}
