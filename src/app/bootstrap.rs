//! 应用编排：按环境开关拉起数据同步与策略引擎，统一优雅关闭

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio_cron_scheduler::Job;
use tracing::{error, info};

use crate::app_config::env::env_is_true;
use crate::app_config::settings::Settings;
use crate::trading::core::exchange_gateway::ExchangeGateway;
use crate::trading::core::factory::build_exchange;
use crate::trading::core::rate_limiter::AdaptiveRateLimiter;
use crate::trading::model::ai_model::AiModelModel;
use crate::trading::services::notification::build_notifier;
use crate::trading::strategy::ai;
use crate::trading::strategy::circuit_breaker::CircuitBreaker;
use crate::trading::strategy::control::{control_channel, ControlCommandConsumer};
use crate::trading::strategy::engine::StrategyEngine;
use crate::trading::task::archive_job;
use crate::trading::task::data_syncer::DataSyncer;

/// 模型行缺失时兜底的模型名
const AI_MODEL_NAME: &str = "setup_b";

/// 按 impl_tag 恢复或新建打分器：模型行记录的标签优先，配置兜底
async fn load_ai_scorer(settings: &Settings) -> Result<Box<dyn ai::AiScorer>> {
    match AiModelModel::current(AI_MODEL_NAME).await {
        Ok(Some(row)) => {
            info!(
                impl_tag = row.impl_tag.as_str(),
                version = row.version,
                "加载已有 AI 模型"
            );
            ai::load_scorer(&row.impl_tag, &row.params_json)
        }
        Ok(None) => {
            info!(impl_tag = settings.ai_model_impl.as_str(), "新建 AI 模型（冷启动）");
            ai::new_scorer(
                &settings.ai_model_impl,
                crate::trading::indicator::feature::FEATURE_DIM,
            )
        }
        Err(e) => {
            error!(error = %e, "读取 AI 模型失败，按配置新建");
            ai::new_scorer(
                &settings.ai_model_impl,
                crate::trading::indicator::feature::FEATURE_DIM,
            )
        }
    }
}

/// 入口总编排：初始化、拉起各服务、等待退出信号、优雅关闭
pub async fn run() -> Result<()> {
    let settings = Settings::from_env();
    info!(symbols = ?settings.symbols, timeframe = settings.timeframe.as_str(), paper = settings.paper_trading, "启动配置");

    let notifier = build_notifier();

    // 限流器 → 熔断信号通道
    let (breaker_tx, breaker_rx) = tokio::sync::mpsc::unbounded_channel();
    let limiter = Arc::new(AdaptiveRateLimiter::with_system_clock(Some(breaker_tx)));
    let exchange = build_exchange(&settings)?;
    let gateway = Arc::new(ExchangeGateway::new(exchange, limiter));

    // 控制面：快照通道 + 指令消费者
    let (control_tx, control_rx) = control_channel();
    let consumer = ControlCommandConsumer::new(&settings, control_tx.clone(), Arc::clone(&notifier));
    consumer.load_initial_state().await?;
    tokio::spawn(consumer.run());

    // 数据同步
    if env_is_true("IS_RUN_DATA_SYNCER", true) {
        let syncer = Arc::new(DataSyncer::new(
            settings.clone(),
            Arc::clone(&gateway),
            Arc::clone(&notifier),
        ));
        tokio::spawn(syncer.run());

        // 日终归档：UTC 16:00 = 香港 00:00（无夏令时）
        let scheduler = crate::init_scheduler()
            .await
            .map_err(|e| anyhow!("初始化任务调度器失败: {}", e))?;
        let archive_job = Job::new_async("0 0 16 * * *", |_uuid, _lock| {
            Box::pin(async {
                if let Err(e) = archive_job::run_daily_archive().await {
                    error!(error = %e, "归档任务失败");
                }
            })
        })
        .map_err(|e| anyhow!("创建归档任务失败: {}", e))?;
        scheduler
            .add(archive_job)
            .await
            .map_err(|e| anyhow!("注册归档任务失败: {}", e))?;
    }

    // 策略引擎
    if env_is_true("IS_RUN_STRATEGY_ENGINE", true) {
        if !settings.enable_trading && !settings.paper_trading {
            info!("ENABLE_TRADING=false 且非模拟盘：策略引擎不启动");
        } else {
            let scorer = load_ai_scorer(&settings).await?;
            let engine = Arc::new(StrategyEngine::new(
                settings.clone(),
                Arc::clone(&gateway),
                Arc::clone(&notifier),
                control_rx.clone(),
                control_tx.clone(),
                scorer,
                Arc::new(CircuitBreaker::new()),
            ));
            tokio::spawn(engine.run(breaker_rx));
        }
    }

    // 等待退出信号
    let signal_name = setup_shutdown_signals().await;
    info!("接收到 {} 信号，开始优雅关闭...", signal_name);

    crate::app_config::db::close_db_pool().await;
    info!("应用已优雅退出");
    Ok(())
}

/// 多种退出信号
async fn setup_shutdown_signals() -> &'static str {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to register SIGTERM handler");
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("Failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("Failed to listen for ctrl-c");
        "CTRL+C"
    }
}
