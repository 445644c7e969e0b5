//! 数据同步服务
//!
//! 增量拉K线（只落已收盘 bar）、缺口检测与补拉、按当前特征版本预计算指标、
//! 心跳与数据滞后告警。循环边界的未捕获错误统一折叠成
//! order_events 里 service="data-syncer" 的 ERROR 行，审计流保持单一。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app_config::settings::Settings;
use crate::time_util;
use crate::trading::core::exchange_gateway::ExchangeGateway;
use crate::trading::indicator::feature::{FeatureEngine, MIN_BARS};
use crate::trading::model::market::candles::{CandleEntity, CandlesModel};
use crate::trading::model::market::market_cache::{
    MarketCacheEntity, MarketCacheModel, PrecomputeTaskModel,
};
use crate::trading::model::order::order_event::{NewOrderEvent, OrderEventModel, OrderEventType};
use crate::trading::model::service_status::{instance_id, ServiceStatusModel};
use crate::trading::services::notification::Notifier;

const SERVICE: &str = "data-syncer";
/// 交易所单页上限
const PAGE_LIMIT: u32 = 500;
/// 指标计算所需的回看长度
const LOOKBACK: u32 = 160;
/// 轮询间隔
const SYNC_POLL_SECONDS: u64 = 15;

pub struct DataSyncer {
    settings: Settings,
    gateway: Arc<ExchangeGateway>,
    notifier: Arc<dyn Notifier>,
    feature_engine: FeatureEngine,
    /// symbol → 上次 DATA_LAG 告警毫秒时间，冷却窗口内不重复告警
    lag_alerted_at: DashMap<String, i64>,
}

impl DataSyncer {
    pub fn new(
        settings: Settings,
        gateway: Arc<ExchangeGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            gateway,
            notifier,
            feature_engine: FeatureEngine::new(),
            lag_alerted_at: DashMap::new(),
        }
    }

    /// 常驻同步循环
    pub async fn run(self: Arc<Self>) {
        info!("数据同步服务启动");
        let instance = instance_id();
        loop {
            for symbol in self.settings.symbols.clone() {
                if let Err(e) = self.sync_symbol(&symbol).await {
                    error!(symbol = symbol.as_str(), error = %e, "同步失败");
                    self.record_loop_error(&symbol, &e).await;
                }
                // 交易对之间稍作间隔，避免瞬时风暴
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            if let Err(e) = self.heartbeat(&instance).await {
                error!(error = %e, "心跳写入失败");
            }
            tokio::time::sleep(Duration::from_secs(SYNC_POLL_SECONDS)).await;
        }
    }

    async fn sync_symbol(&self, symbol: &str) -> Result<()> {
        let timeframe = &self.settings.timeframe;
        let interval_ms = self.settings.interval_ms();

        // 1. 增量拉取到最近一根已收盘 bar
        let mut since = CandlesModel::latest_open_time(symbol, timeframe)
            .await?
            .map(|ts| ts + interval_ms);
        let mut new_bar_times: Vec<i64> = Vec::new();
        loop {
            let klines = self
                .gateway
                .get_klines(symbol, timeframe, since, PAGE_LIMIT)
                .await?;
            let now = time_util::now_ms();
            let closed: Vec<CandleEntity> = klines
                .iter()
                .filter(|k| time_util::bar_is_closed(k.open_time_ms, interval_ms, now))
                .map(|k| CandleEntity::from_kline(symbol, timeframe, k))
                .collect();
            if closed.is_empty() {
                break;
            }
            CandlesModel::insert_ignore_batch(&closed).await?;
            new_bar_times.extend(closed.iter().map(|c| c.open_time_ms));
            let page_full = klines.len() as u32 >= PAGE_LIMIT;
            since = Some(closed.last().expect("non-empty").open_time_ms + interval_ms);
            if !page_full {
                break;
            }
        }
        if !new_bar_times.is_empty() {
            info!(symbol, bars = new_bar_times.len(), "新增K线入库");
        }

        // 2. 缺口检测：为缺失 bar 建预计算任务并补拉
        let gaps = CandlesModel::find_gaps(symbol, timeframe, interval_ms).await?;
        if !gaps.is_empty() {
            warn!(symbol, gaps = gaps.len(), "检测到K线缺口，开始回补");
            let trace_id = Uuid::new_v4().to_string();
            for open_time in &gaps {
                PrecomputeTaskModel::enqueue(
                    symbol,
                    timeframe,
                    *open_time,
                    self.settings.feature_version,
                    &trace_id,
                )
                .await?;
                let klines = self
                    .gateway
                    .get_klines(symbol, timeframe, Some(*open_time), 1)
                    .await?;
                let refill: Vec<CandleEntity> = klines
                    .iter()
                    .filter(|k| k.open_time_ms == *open_time)
                    .map(|k| CandleEntity::from_kline(symbol, timeframe, k))
                    .collect();
                CandlesModel::insert_ignore_batch(&refill).await?;
                new_bar_times.push(*open_time);
            }
        }

        // 3. 新 bar 的特征计算
        new_bar_times.sort_unstable();
        new_bar_times.dedup();
        for open_time in &new_bar_times {
            if let Err(e) = self.compute_features_at(symbol, *open_time).await {
                warn!(symbol, open_time, error = %e, "特征计算失败");
            }
        }

        // 4. 消化遗留的预计算任务（补拉后重算，失败累计 try_count）
        let pending = PrecomputeTaskModel::pending(
            symbol,
            timeframe,
            self.settings.feature_version,
            64,
        )
        .await?;
        for task in pending {
            match self.compute_features_at(symbol, task.open_time_ms).await {
                Ok(_) => PrecomputeTaskModel::mark_done(&task).await?,
                Err(e) => PrecomputeTaskModel::mark_error(&task, &e.to_string()).await?,
            }
        }

        // 5. 数据滞后告警（带每交易对冷却）
        self.check_data_lag(symbol).await?;
        Ok(())
    }

    /// 以 open_time 为末端构建历史缓冲区，算出特征并写入当前版本缓存
    async fn compute_features_at(&self, symbol: &str, open_time_ms: i64) -> Result<()> {
        let timeframe = &self.settings.timeframe;
        let buffer = CandlesModel::recent_until(symbol, timeframe, open_time_ms, LOOKBACK).await?;
        if buffer.len() < MIN_BARS {
            return Err(anyhow!(
                "insufficient history for {} @ {}: {} bars",
                symbol,
                open_time_ms,
                buffer.len()
            ));
        }
        if buffer.last().map(|c| c.open_time_ms) != Some(open_time_ms) {
            return Err(anyhow!("bar {} missing from market_data", open_time_ms));
        }

        // BTC 相关性：尽力而为，取不到同长度的对齐序列就置空
        let btc_closes: Option<Vec<f64>> = if symbol != "BTCUSDT" {
            match CandlesModel::recent_until("BTCUSDT", timeframe, open_time_ms, LOOKBACK).await {
                Ok(btc) if btc.len() == buffer.len() => {
                    Some(btc.iter().map(|c| c.close_price).collect())
                }
                _ => None,
            }
        } else {
            None
        };

        let features = self
            .feature_engine
            .compute_last(&buffer, btc_closes.as_deref())?;

        MarketCacheModel::insert_ignore(&MarketCacheEntity {
            symbol: symbol.to_string(),
            timeframe: timeframe.clone(),
            open_time_ms,
            feature_version: self.settings.feature_version,
            features_json: features.to_json(),
        })
        .await?;
        Ok(())
    }

    async fn check_data_lag(&self, symbol: &str) -> Result<()> {
        let timeframe = &self.settings.timeframe;
        let interval_ms = self.settings.interval_ms();
        let latest = match CandlesModel::latest_open_time(symbol, timeframe).await? {
            Some(ts) => ts,
            None => return Ok(()),
        };
        let now = time_util::now_ms();
        let lag_secs = (now - time_util::bar_close_ts(latest, interval_ms)) / 1000;
        if lag_secs <= self.settings.market_data_lag_alert_seconds {
            return Ok(());
        }

        let cooldown_ms = self.settings.market_data_lag_alert_cooldown_seconds * 1000;
        if let Some(last) = self.lag_alerted_at.get(symbol) {
            if now - *last < cooldown_ms {
                return Ok(());
            }
        }
        self.lag_alerted_at.insert(symbol.to_string(), now);

        let trace_id = Uuid::new_v4().to_string();
        warn!(symbol, lag_secs, reason_code = "DATA_LAG", "行情滞后");
        self.notifier
            .send_system_alert(
                "DATA_LAG",
                &trace_id,
                &[
                    ("symbol".to_string(), symbol.to_string()),
                    ("lag_seconds".to_string(), lag_secs.to_string()),
                ],
            )
            .await
            .ok();
        Ok(())
    }

    async fn heartbeat(&self, instance: &str) -> Result<()> {
        let mut lags = serde_json::Map::new();
        for symbol in &self.settings.symbols {
            if let Ok(Some(latest)) =
                CandlesModel::latest_open_time(symbol, &self.settings.timeframe).await
            {
                let lag = (time_util::now_ms()
                    - time_util::bar_close_ts(latest, self.settings.interval_ms()))
                    / 1000;
                lags.insert(symbol.clone(), json!(lag));
            }
        }
        let now = time_util::now_ms();
        let status = json!({
            "last_sync_utc": time_util::mill_time_to_datetime(now).unwrap_or_default(),
            "last_sync_hk": time_util::mill_time_to_datetime_hk(now).unwrap_or_default(),
            "sync_lag_seconds": lags,
        });
        ServiceStatusModel::upsert(SERVICE, instance, &status).await
    }

    /// 循环边界错误统一落到事件流
    async fn record_loop_error(&self, symbol: &str, e: &anyhow::Error) {
        let trace_id = Uuid::new_v4().to_string();
        let event = NewOrderEvent {
            trace_id: trace_id.clone(),
            service: SERVICE.to_string(),
            exchange: self.gateway.exchange_name(),
            symbol: symbol.to_string(),
            client_order_id: format!("svc-{}", trace_id),
            exchange_order_id: None,
            event_type: OrderEventType::Error,
            side: "NONE".to_string(),
            qty: 0.0,
            price: None,
            status: "ERROR".to_string(),
            reason_code: "SYNC_LOOP_ERROR".to_string(),
            reason: e.to_string(),
            action: "DATA_SYNC".to_string(),
            actor: SERVICE.to_string(),
            payload: json!({ "error": e.to_string() }),
        };
        if let Err(e2) = OrderEventModel::append(&event).await {
            error!(error = %e2, "ERROR 事件落库失败");
        }
    }
}
