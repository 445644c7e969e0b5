//! SQLx 数据库连接池管理

use once_cell::sync::OnceCell;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{MySql, Pool};
use std::time::Duration;
use tracing::info;

use crate::app_config::env::{env_or_default, env_parse_or};

static DB_POOL: OnceCell<Pool<MySql>> = OnceCell::new();

/// 初始化数据库连接池
///
/// 优先读取 DATABASE_URL；未设置时由 DB_HOST/DB_PORT/DB_NAME/DB_USER/DB_PASSWORD 拼装。
pub async fn init_db_pool() -> anyhow::Result<()> {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => format!(
            "mysql://{}:{}@{}:{}/{}",
            env_or_default("DB_USER", "asv8"),
            env_or_default("DB_PASSWORD", ""),
            env_or_default("DB_HOST", "127.0.0.1"),
            env_or_default("DB_PORT", "3306"),
            env_or_default("DB_NAME", "asv8"),
        ),
    };

    info!("正在初始化数据库连接池...");

    let max_connections: u32 = env_parse_or("DB_MAX_CONNECTIONS", 20);
    let pool = MySqlPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .max_lifetime(Duration::from_secs(3600))
        .connect(&database_url)
        .await
        .map_err(|e| anyhow::anyhow!("数据库连接失败: {}", e))?;

    DB_POOL
        .set(pool)
        .map_err(|_| anyhow::anyhow!("数据库连接池已初始化"))?;

    info!("✓ 数据库连接池初始化成功 (max={})", max_connections);
    Ok(())
}

/// 获取数据库连接池
pub fn get_db_pool() -> &'static Pool<MySql> {
    DB_POOL
        .get()
        .expect("数据库连接池未初始化，请先调用 init_db_pool()")
}

/// 关闭数据库连接池
pub async fn close_db_pool() {
    if let Some(pool) = DB_POOL.get() {
        info!("正在关闭数据库连接池...");
        pool.close().await;
    }
}

/// 健康检查
pub async fn health_check() -> anyhow::Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(get_db_pool())
        .await
        .map_err(|e| anyhow::anyhow!("数据库健康检查失败: {}", e))?;
    Ok(())
}
