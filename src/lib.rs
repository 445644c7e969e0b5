pub mod app;
pub mod app_config;
pub mod error;
pub mod time_util;
pub mod trading;

use std::sync::Arc;

use dotenv::dotenv;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tokio_cron_scheduler::JobScheduler;
use tracing::info;

/// 应用初始化：env / 日志 / 数据库 / 迁移 / Redis
///
/// 迁移失败是致命错误：任何 worker 都不允许在 schema 不一致时启动。
pub async fn app_init() -> anyhow::Result<()> {
    dotenv().ok();
    app_config::log::setup_logging().await?;

    app_config::db::init_db_pool().await?;
    let ran = trading::model::migrations::run_startup_migrations(app_config::db::get_db_pool())
        .await
        .map_err(|e| anyhow::anyhow!("schema 迁移失败，拒绝启动: {}", e))?;
    if !ran.is_empty() {
        info!(migrations = ?ran, "本次启动执行的迁移");
    }

    app_config::redis_config::init_redis_pool().await?;
    Ok(())
}

/// 全局调度器容器，按需初始化
pub static SCHEDULER: Lazy<Mutex<Option<Arc<JobScheduler>>>> = Lazy::new(|| Mutex::new(None));

pub async fn init_scheduler() -> anyhow::Result<Arc<JobScheduler>> {
    let mut lock = SCHEDULER.lock().await;
    if lock.is_none() {
        let mut scheduler = JobScheduler::new().await?;
        scheduler.start().await?;
        let arc_scheduler = Arc::new(scheduler);
        *lock = Some(Arc::clone(&arc_scheduler));
        return Ok(arc_scheduler);
    }
    Ok(Arc::clone(lock.as_ref().expect("scheduler initialized")))
}
