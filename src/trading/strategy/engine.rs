//! 策略引擎：15 分钟 tick 循环与每交易对流水线
//!
//! 事件流即状态机：CREATED → SUBMITTED → FILLED（→ STOP_ARMED）落库后才算数。
//! 每个交易对由分布式锁串行化，交易对之间并发执行；
//! 单次 tick 受 TICK_BUDGET_SECONDS 约束，超时割断、剩余顺延到下一轮。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app_config::settings::Settings;
use crate::time_util;
use crate::trading::core::exchange::{OrderRequest, OrderSide, OrderState, OrderStatus};
use crate::trading::core::exchange_gateway::ExchangeGateway;
use crate::trading::core::rate_limiter::BreakerSignal;
use crate::trading::indicator::feature::FeatureSet;
use crate::trading::lock::redis_lock::TradeLock;
use crate::trading::model::market::candles::CandlesModel;
use crate::trading::model::market::market_cache::MarketCacheModel;
use crate::trading::model::order::order_event::{NewOrderEvent, OrderEventModel, OrderEventType};
use crate::trading::model::order::trade_log::{NewTradeLog, TradeLogEntity, TradeLogModel};
use crate::trading::model::position_snapshot::PositionSnapshotModel;
use crate::trading::model::service_status::{instance_id, ServiceStatusModel};
use crate::trading::model::system_config::{keys, SystemConfigModel};
use crate::trading::services::notification::Notifier;
use crate::trading::strategy::ai::{self, AiScorer};
use crate::trading::strategy::circuit_breaker::CircuitBreaker;
use crate::trading::strategy::control::{ControlStateReceiver, ControlStateSender};
use crate::error::AppError;
use crate::trading::strategy::order_ids;
use crate::trading::strategy::risk;
use crate::trading::strategy::signal::{check_setup_b_long, SignalThresholds};

const SERVICE: &str = "strategy-engine";
const TICK_GRACE_SECS: u32 = 3;
const FILL_POLL_INTERVAL_MS: u64 = 500;

pub struct StrategyEngine {
    settings: Settings,
    gateway: Arc<ExchangeGateway>,
    notifier: Arc<dyn Notifier>,
    control_rx: ControlStateReceiver,
    control_tx: ControlStateSender,
    ai: Arc<tokio::sync::Mutex<Box<dyn AiScorer>>>,
    breaker: Arc<CircuitBreaker>,
    thresholds: SignalThresholds,
}

impl StrategyEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        gateway: Arc<ExchangeGateway>,
        notifier: Arc<dyn Notifier>,
        control_rx: ControlStateReceiver,
        control_tx: ControlStateSender,
        ai: Box<dyn AiScorer>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let thresholds = SignalThresholds {
            adx_min: settings.adx_min,
            vol_ratio_min: settings.vol_ratio_min,
            ai_score_min: settings.ai_score_min,
        };
        Self {
            settings,
            gateway,
            notifier,
            control_rx,
            control_tx,
            ai: Arc::new(tokio::sync::Mutex::new(ai)),
            breaker,
            thresholds,
        }
    }

    /// 常驻主循环 + 周边任务
    pub async fn run(self: Arc<Self>, mut breaker_rx: UnboundedReceiver<BreakerSignal>) {
        // 限流器熔断信号
        {
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                while let Some(signal) = breaker_rx.recv().await {
                    let reason = engine.breaker.from_limiter_signal(&signal);
                    let trace_id = Uuid::new_v4().to_string();
                    if let Err(e) = engine
                        .breaker
                        .trip(&reason, &trace_id, engine.notifier.as_ref())
                        .await
                    {
                        error!(error = %e, "限流熔断落库失败");
                    }
                    engine.control_tx.send_modify(|s| s.halt_trading = true);
                }
            });
        }

        // 周期性仓位快照
        {
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                engine.periodic_snapshot_loop().await;
            });
        }

        // 心跳（第一次成功即就绪信号）
        {
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                engine.heartbeat_loop().await;
            });
        }

        // 紧急退出监听：watch 一变化立即全平，1-3 秒内闭环
        {
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                engine.emergency_watch_loop().await;
            });
        }

        // 主 tick 循环
        let interval_secs = self.settings.interval_ms() / 1000;
        loop {
            let sleep_s = time_util::next_tick_sleep_seconds(chrono::Utc::now(), interval_secs);
            tokio::time::sleep(Duration::from_secs_f64(sleep_s)).await;

            let hk_now = time_util::utc_to_hk(chrono::Utc::now());
            let interval_min = (interval_secs / 60) as u32;
            if !time_util::is_tick_boundary(hk_now, interval_min, TICK_GRACE_SECS) {
                continue;
            }

            let budget = Duration::from_secs(self.settings.tick_budget_seconds);
            let engine = Arc::clone(&self);
            match tokio::time::timeout(budget, engine.tick()).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(
                        reason_code = "TICK_TIMEOUT",
                        budget_secs = self.settings.tick_budget_seconds,
                        "tick 超出预算被割断，剩余交易对顺延"
                    );
                }
            }
        }
    }

    /// 单次 tick：每个交易对一个任务，并发执行
    pub async fn tick(self: Arc<Self>) {
        info!(tick_hk = %time_util::utc_to_hk(chrono::Utc::now()), "tick 触发");
        let mut set = JoinSet::new();
        for symbol in self.settings.symbols.clone() {
            let engine = Arc::clone(&self);
            set.spawn(async move {
                engine.process_symbol(symbol).await;
            });
        }
        while set.join_next().await.is_some() {}
    }

    /// 循环边界：任何未捕获错误都折叠成 ERROR 事件，tick 不中断
    pub async fn process_symbol(self: Arc<Self>, symbol: String) {
        let trace_id = Uuid::new_v4().to_string();
        if let Err(e) = self.symbol_pipeline(&symbol, &trace_id).await {
            error!(symbol = symbol.as_str(), trace_id = trace_id.as_str(), error = %e, "流水线失败");
            let event = self.event_base(
                &trace_id,
                &symbol,
                &format!("svc-{}", trace_id),
                OrderEventType::Error,
                OrderSide::Buy,
                0.0,
                "PIPELINE_ERROR",
                &e.to_string(),
                "TICK",
                json!({ "error": e.to_string() }),
            );
            if let Err(e2) = OrderEventModel::append(&event).await {
                error!(error = %e2, "ERROR 事件落库失败");
            }
        }
    }

    async fn symbol_pipeline(&self, symbol: &str, trace_id: &str) -> Result<()> {
        let state = self.control_rx.borrow().clone();
        let open_trade = TradeLogModel::open_position(symbol).await?;

        // HALT 且无持仓：直接跳过；有持仓时仍然管理离场
        if state.halt_trading && open_trade.is_none() {
            return Ok(());
        }

        let guard = match TradeLock::try_acquire(symbol, self.settings.trade_lock_ttl_seconds).await?
        {
            Some(guard) => guard,
            None => {
                info!(symbol, "交易锁被占用，本轮跳过");
                return Ok(());
            }
        };

        // 锁内主体；无论成败都走统一释放路径
        let result = self
            .locked_pipeline(symbol, trace_id, state.halt_trading, open_trade)
            .await;
        guard.release().await.ok();
        result
    }

    async fn locked_pipeline(
        &self,
        symbol: &str,
        trace_id: &str,
        halted: bool,
        open_trade: Option<TradeLogEntity>,
    ) -> Result<()> {
        // 上一轮确认超时的订单先对账
        self.reconcile(symbol, trace_id).await?;

        // 持仓管理：软件止损
        if let Some(trade) = open_trade {
            self.check_software_stop(&trade, trace_id).await?;
            return Ok(()); // 单仓模型：有持仓不再开新仓
        }
        if halted {
            return Ok(());
        }
        self.try_enter(symbol, trace_id).await
    }

    async fn try_enter(&self, symbol: &str, trace_id: &str) -> Result<()> {
        let interval_ms = self.settings.interval_ms();

        // 1. 读缓存（当前特征版本的最近两行）
        let rows = MarketCacheModel::last_two_cache(
            symbol,
            &self.settings.timeframe,
            self.settings.feature_version,
        )
        .await?;
        if rows.len() < 2 {
            info!(symbol, reason_code = "STALE_CACHE", "缓存不足两行，跳过");
            return Ok(());
        }
        let (prev_row, curr_row) = (&rows[0], &rows[1]);
        let now = time_util::now_ms();
        if now - curr_row.open_time_ms > 2 * interval_ms {
            warn!(
                symbol,
                reason_code = "STALE_CACHE",
                age_ms = now - curr_row.open_time_ms,
                "缓存过期，跳过"
            );
            return Ok(());
        }

        let prev: FeatureSet = FeatureSet::from_json(&prev_row.features_json)?;
        let curr: FeatureSet = FeatureSet::from_json(&curr_row.features_json)?;

        // 2. AI 打分（冷启动给默认分）
        let (ai_score, cold_start) = {
            let scorer = self.ai.lock().await;
            let cold = ai::is_cold_start(scorer.as_ref());
            let score = if cold {
                ai::COLD_START_SCORE
            } else {
                scorer.score(&curr.to_vector())
            };
            (score, cold)
        };

        // 3. Setup B
        let decision = check_setup_b_long(&curr, &prev, ai_score, &self.thresholds);
        if !decision.triggered {
            return Ok(());
        }
        info!(
            symbol,
            reason_code = decision.reason_code,
            reason = decision.reason.as_str(),
            "信号触发"
        );

        // 4. 账户与风控
        let account = self.gateway.get_account().await?;
        if let Some(trip) = self.breaker.record_equity(account.equity_usdt) {
            self.breaker
                .trip(&trip, trace_id, self.notifier.as_ref())
                .await?;
            self.control_tx.send_modify(|s| s.halt_trading = true);
            return Ok(());
        }

        let latest = CandlesModel::recent(symbol, &self.settings.timeframe, 1).await?;
        let entry_price = latest
            .last()
            .map(|c| c.close_price)
            .ok_or_else(|| anyhow!("no market data for {}", symbol))?;
        // ATR 止损，ATR 失真时退到 2%
        let atr = if curr.atr > 0.0 {
            curr.atr
        } else {
            entry_price * 0.01
        };
        let stop_price = (entry_price - 2.0 * atr).max(0.0);

        let max_leverage = crate::app_config::env::env_parse_or("MAX_LEVERAGE", 5u32);
        let bar_close_ts = time_util::bar_close_ts(curr_row.open_time_ms, interval_ms);
        let cid = order_ids::generate(symbol, OrderSide::Buy, &self.settings.timeframe, bar_close_ts, trace_id);

        let approval = match risk::evaluate_long(
            account.equity_usdt,
            ai_score,
            cold_start,
            entry_price,
            stop_price,
            max_leverage,
        ) {
            Ok(approval) => approval,
            Err(AppError::RiskRejected {
                reason_code,
                reason,
            }) => {
                warn!(symbol, reason_code = reason_code.as_str(), reason = reason.as_str(), "风控拒单");
                let event = self.event_base(
                    trace_id,
                    symbol,
                    &cid,
                    OrderEventType::Rejected,
                    OrderSide::Buy,
                    0.0,
                    &reason_code,
                    &reason,
                    "RISK_CHECK",
                    json!({ "equity": account.equity_usdt, "stop_price": stop_price }),
                );
                OrderEventModel::append(&event).await?;
                return Ok(());
            }
            Err(other) => return Err(other.into()),
        };
        let (qty, leverage, stop_dist_pct, risk_reason) = (
            approval.qty,
            approval.leverage,
            approval.stop_dist_pct,
            approval.reason,
        );

        // 5. 同一根 bar 的重复开仓抑制（重启恢复场景）
        let prefix = order_ids::bar_prefix(symbol, OrderSide::Buy, &self.settings.timeframe, bar_close_ts);
        if OrderEventModel::exists_created_with_prefix(
            &self.gateway.exchange_name(),
            symbol,
            &prefix,
        )
        .await?
        {
            info!(symbol, bar_close_ts, "该 bar 已有开仓尝试，跳过");
            return Ok(());
        }

        // 6. CREATED：意图先落库，再触达交易所
        let full_reason = format!("{} | {}", decision.reason, risk_reason);
        let mut event = self.event_base(
            trace_id,
            symbol,
            &cid,
            OrderEventType::Created,
            OrderSide::Buy,
            qty,
            decision.reason_code,
            &full_reason,
            "OPEN",
            json!({
                "entry_price": entry_price,
                "stop_price": stop_price,
                "leverage": leverage,
                "ai_score": ai_score,
            }),
        );
        event.price = Some(entry_price);
        OrderEventModel::append(&event).await?;

        // 7. 下单（网关内部对瞬时错误重试，client_order_id 不变）
        let order_req = OrderRequest::market(symbol, OrderSide::Buy, qty, &cid);
        let order = match self.gateway.place_order(&order_req).await {
            Ok(order) => {
                self.breaker.record_order_success();
                order
            }
            Err(e) => {
                if let Some(trip) = self.breaker.record_order_error(time_util::now_ms()) {
                    self.breaker
                        .trip(&trip, trace_id, self.notifier.as_ref())
                        .await?;
                    self.control_tx.send_modify(|s| s.halt_trading = true);
                }
                let event_type = if e.is_retryable() {
                    OrderEventType::Error
                } else {
                    OrderEventType::Rejected
                };
                let reason_code = e.reason_code();
                let err = AppError::from(e);
                let event = self.event_base(
                    trace_id,
                    symbol,
                    &cid,
                    event_type,
                    OrderSide::Buy,
                    qty,
                    &reason_code,
                    &err.to_string(),
                    "OPEN",
                    json!({ "error": err.to_string() }),
                );
                OrderEventModel::append(&event).await?;
                self.notifier
                    .send_system_alert(
                        "ORDER_FAILED",
                        trace_id,
                        &[
                            ("symbol".to_string(), symbol.to_string()),
                            ("client_order_id".to_string(), cid.clone()),
                            ("reason".to_string(), err.to_string()),
                        ],
                    )
                    .await
                    .ok();
                return Ok(());
            }
        };

        let mut event = self.event_base(
            trace_id,
            symbol,
            &cid,
            OrderEventType::Submitted,
            OrderSide::Buy,
            qty,
            "EXCHANGE_ACK",
            "order accepted by exchange",
            "OPEN",
            order.raw.clone(),
        );
        event.exchange_order_id = order.exchange_order_id.clone();
        event.status = order.status.as_str().to_string();
        OrderEventModel::append(&event).await?;

        // 8. 确认成交（超时交给下一轮对账）
        let filled = match self.confirm_fill(symbol, &cid, order).await? {
            Some(filled) => filled,
            None => {
                let event = self.event_base(
                    trace_id,
                    symbol,
                    &cid,
                    OrderEventType::Error,
                    OrderSide::Buy,
                    qty,
                    "ORDER_CONFIRM_TIMEOUT",
                    "fill not confirmed within budget, left to reconciliation",
                    "OPEN",
                    json!({}),
                );
                OrderEventModel::append(&event).await?;
                return Ok(());
            }
        };

        let fill_price = filled.avg_price.unwrap_or(entry_price);
        let mut event = self.event_base(
            trace_id,
            symbol,
            &cid,
            OrderEventType::Filled,
            OrderSide::Buy,
            filled.executed_qty,
            decision.reason_code,
            &full_reason,
            "OPEN",
            filled.raw.clone(),
        );
        event.exchange_order_id = filled.exchange_order_id.clone();
        event.price = Some(fill_price);
        event.status = "FILLED".to_string();
        OrderEventModel::append(&event).await?;

        // 9. TradeLog(OPEN) + 快照
        TradeLogModel::open(&NewTradeLog {
            symbol: symbol.to_string(),
            side: "BUY".to_string(),
            qty: filled.executed_qty,
            leverage: leverage as i32,
            entry_price: fill_price,
            stop_price,
            stop_dist_pct,
            client_order_id: cid.clone(),
            exchange_order_id: filled.exchange_order_id.clone(),
            robot_score: curr.adx,
            ai_prob: ai_score / 100.0,
            open_reason_code: decision.reason_code.to_string(),
            open_reason: full_reason.clone(),
            entry_time_ms: time_util::now_ms(),
        })
        .await?;
        PositionSnapshotModel::write(
            symbol,
            filled.executed_qty,
            fill_price,
            &json!({
                "note": "entry",
                "trace_id": trace_id,
                "client_order_id": cid,
                "open_reason_code": decision.reason_code,
            }),
        )
        .await?;

        self.notifier
            .send_trade_alert(
                "POSITION_OPENED",
                trace_id,
                &[
                    ("symbol".to_string(), symbol.to_string()),
                    ("qty".to_string(), format!("{}", filled.executed_qty)),
                    ("entry_price".to_string(), format!("{}", fill_price)),
                    ("leverage".to_string(), format!("{}", leverage)),
                    ("stop_price".to_string(), format!("{}", stop_price)),
                    ("reason".to_string(), full_reason.clone()),
                ],
            )
            .await
            .ok();

        // 10. 保护性止损
        self.arm_protective_stop(symbol, &cid, filled.executed_qty, stop_price, trace_id)
            .await?;
        Ok(())
    }

    /// 轮询确认成交，受 ORDER_CONFIRM_TIMEOUT 约束；None = 超时
    async fn confirm_fill(
        &self,
        symbol: &str,
        cid: &str,
        submitted: OrderState,
    ) -> Result<Option<OrderState>> {
        if submitted.status == OrderStatus::Filled {
            return Ok(Some(submitted));
        }
        let budget = Duration::from_secs(self.settings.order_confirm_timeout_seconds);
        let poll = async {
            loop {
                tokio::time::sleep(Duration::from_millis(FILL_POLL_INTERVAL_MS)).await;
                match self.gateway.get_order(symbol, cid).await {
                    Ok(order) if order.status == OrderStatus::Filled => return order,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(symbol, cid, error = %e, "查单失败，继续轮询");
                        continue;
                    }
                }
            }
        };
        match tokio::time::timeout(budget, poll).await {
            Ok(order) => Ok(Some(order)),
            Err(_) => Ok(None),
        }
    }

    async fn arm_protective_stop(
        &self,
        symbol: &str,
        parent_cid: &str,
        qty: f64,
        stop_price: f64,
        trace_id: &str,
    ) -> Result<()> {
        let stop_cid = order_ids::stop_id(parent_cid);
        let stop_req = OrderRequest::stop_market(symbol, OrderSide::Sell, qty, stop_price, &stop_cid);

        let mut created = self.event_base(
            trace_id,
            symbol,
            &stop_cid,
            OrderEventType::Created,
            OrderSide::Sell,
            qty,
            "STOP_ARM",
            &format!("protective stop intent at {}", stop_price),
            "STOP",
            json!({ "parent": parent_cid }),
        );
        created.price = Some(stop_price);
        OrderEventModel::append(&created).await?;

        match self.gateway.set_stop(&stop_req).await {
            Ok(stop_order) => {
                let mut event = self.event_base(
                    trace_id,
                    symbol,
                    &stop_cid,
                    OrderEventType::StopArmed,
                    OrderSide::Sell,
                    qty,
                    "STOP_ARMED",
                    &format!("protective stop at {}", stop_price),
                    "STOP",
                    stop_order.raw.clone(),
                );
                event.exchange_order_id = stop_order.exchange_order_id.clone();
                event.price = Some(stop_price);
                OrderEventModel::append(&event).await?;
            }
            Err(e) => {
                // 交易所止损挂不上：退化为软件止损，此仓位后续不再尝试交易所止损
                warn!(
                    symbol,
                    reason_code = "STOP_ARM_FAILED_FALLBACK",
                    error = %e,
                    "止损单挂载失败，启用软件止损"
                );
                let event = self.event_base(
                    trace_id,
                    symbol,
                    &stop_cid,
                    OrderEventType::Error,
                    OrderSide::Sell,
                    qty,
                    "STOP_ARM_FAILED_FALLBACK",
                    &format!("exchange stop failed, software stop at {}: {}", stop_price, e),
                    "STOP",
                    json!({ "error": e.to_string() }),
                );
                OrderEventModel::append(&event).await?;
            }
        }
        Ok(())
    }

    /// 软件止损：最新收盘价跌破 stop_price 即市价离场
    async fn check_software_stop(&self, trade: &TradeLogEntity, trace_id: &str) -> Result<()> {
        let latest = CandlesModel::recent(&trade.symbol, &self.settings.timeframe, 1).await?;
        let last_price = match latest.last() {
            Some(c) => c.close_price,
            None => return Ok(()),
        };

        // 交易所止损是否已经成交
        let stop_cid = order_ids::stop_id(&trade.client_order_id);
        if let Ok(stop_order) = self.gateway.get_order(&trade.symbol, &stop_cid).await {
            if stop_order.status == OrderStatus::Filled {
                let exit_price = stop_order.avg_price.unwrap_or(trade.stop_price);
                let mut event = self.event_base(
                    trace_id,
                    &trade.symbol,
                    &stop_cid,
                    OrderEventType::StopFilled,
                    OrderSide::Sell,
                    stop_order.executed_qty,
                    "STOP_LOSS",
                    "exchange stop filled",
                    "CLOSE",
                    stop_order.raw.clone(),
                );
                event.price = Some(exit_price);
                OrderEventModel::append(&event).await?;
                self.finalize_close(trade, exit_price, "STOP_LOSS", "exchange stop filled", trace_id)
                    .await?;
                return Ok(());
            }
        }

        if last_price > trade.stop_price {
            return Ok(());
        }
        info!(
            symbol = trade.symbol.as_str(),
            last_price,
            stop_price = trade.stop_price,
            "软件止损触发"
        );
        let mut event = self.event_base(
            trace_id,
            &trade.symbol,
            &order_ids::stop_id(&trade.client_order_id),
            OrderEventType::StopTriggered,
            OrderSide::Sell,
            trade.qty,
            "STOP_LOSS",
            &format!("price {} <= stop {}", last_price, trade.stop_price),
            "CLOSE",
            json!({ "last_price": last_price }),
        );
        event.price = Some(last_price);
        OrderEventModel::append(&event).await?;
        self.close_position(trade, "STOP_LOSS", "software stop triggered", trace_id)
            .await
    }

    /// 市价平仓 + 收尾
    pub async fn close_position(
        &self,
        trade: &TradeLogEntity,
        close_reason_code: &str,
        close_reason: &str,
        trace_id: &str,
    ) -> Result<()> {
        let exit_cid = order_ids::exit_id(&trade.client_order_id);
        let mut req = OrderRequest::market(&trade.symbol, OrderSide::Sell, trade.qty, &exit_cid);
        req.reduce_only = true;

        // 平仓也是一次订单提交：CREATED 先行
        let mut created = self.event_base(
            trace_id,
            &trade.symbol,
            &exit_cid,
            OrderEventType::Created,
            OrderSide::Sell,
            trade.qty,
            close_reason_code,
            close_reason,
            "CLOSE",
            json!({ "parent": trade.client_order_id }),
        );
        created.price = Some(trade.stop_price);
        OrderEventModel::append(&created).await?;

        let order = match self.gateway.place_order(&req).await {
            Ok(order) => order,
            Err(e) => {
                let reason_code = e.reason_code();
                let err = AppError::from(e);
                let event = self.event_base(
                    trace_id,
                    &trade.symbol,
                    &exit_cid,
                    OrderEventType::Error,
                    OrderSide::Sell,
                    trade.qty,
                    &reason_code,
                    &err.to_string(),
                    "CLOSE",
                    json!({ "error": err.to_string() }),
                );
                OrderEventModel::append(&event).await?;
                return Err(err.into());
            }
        };
        let exit_price = order.avg_price.unwrap_or(trade.stop_price);

        let mut submitted = self.event_base(
            trace_id,
            &trade.symbol,
            &exit_cid,
            OrderEventType::Submitted,
            OrderSide::Sell,
            trade.qty,
            close_reason_code,
            close_reason,
            "CLOSE",
            order.raw.clone(),
        );
        submitted.exchange_order_id = order.exchange_order_id.clone();
        OrderEventModel::append(&submitted).await?;

        let mut event = self.event_base(
            trace_id,
            &trade.symbol,
            &exit_cid,
            OrderEventType::Filled,
            OrderSide::Sell,
            order.executed_qty.max(trade.qty),
            close_reason_code,
            close_reason,
            "CLOSE",
            order.raw.clone(),
        );
        event.exchange_order_id = order.exchange_order_id.clone();
        event.price = Some(exit_price);
        event.status = "FILLED".to_string();
        OrderEventModel::append(&event).await?;

        self.finalize_close(trade, exit_price, close_reason_code, close_reason, trace_id)
            .await
    }

    /// TradeLog 置 CLOSED、终局快照、在线学习
    async fn finalize_close(
        &self,
        trade: &TradeLogEntity,
        exit_price: f64,
        close_reason_code: &str,
        close_reason: &str,
        trace_id: &str,
    ) -> Result<()> {
        let pnl = (exit_price - trade.entry_price) * trade.qty;
        TradeLogModel::close(
            trade.id,
            exit_price,
            pnl,
            close_reason_code,
            close_reason,
            time_util::now_ms(),
        )
        .await?;
        PositionSnapshotModel::write(
            &trade.symbol,
            0.0,
            0.0,
            &json!({
                "note": "close",
                "trace_id": trace_id,
                "close_reason_code": close_reason_code,
                "pnl": pnl,
            }),
        )
        .await?;

        // 用开仓 bar 的特征做在线学习；取不到就放弃这次训练
        let interval_ms = self.settings.interval_ms();
        let entry_bar_open = trade.entry_time_ms - trade.entry_time_ms.rem_euclid(interval_ms);
        if let Ok(Some(row)) = MarketCacheModel::get_at(
            &trade.symbol,
            &self.settings.timeframe,
            entry_bar_open,
            self.settings.feature_version,
        )
        .await
        {
            if let Ok(features) = FeatureSet::from_json(&row.features_json) {
                let label = if pnl > 0.0 { 1 } else { 0 };
                let mut scorer = self.ai.lock().await;
                scorer.partial_fit(&features.to_vector(), label);
                if let Ok(params) = scorer.serialize_model() {
                    crate::trading::model::ai_model::AiModelModel::save_as_current(
                        "setup_b",
                        scorer.impl_tag(),
                        &json!({ "seen": scorer.samples_seen() }).to_string(),
                        &params,
                    )
                    .await
                    .ok();
                }
            }
        }

        self.notifier
            .send_trade_alert(
                "POSITION_CLOSED",
                trace_id,
                &[
                    ("symbol".to_string(), trade.symbol.clone()),
                    ("exit_price".to_string(), format!("{}", exit_price)),
                    ("pnl".to_string(), format!("{:.4}", pnl)),
                    ("close_reason_code".to_string(), close_reason_code.to_string()),
                ],
            )
            .await
            .ok();
        Ok(())
    }

    /// 对账：有 SUBMITTED 无终态的订单逐一回查交易所
    async fn reconcile(&self, symbol: &str, trace_id: &str) -> Result<()> {
        let exchange = self.gateway.exchange_name();
        let pending = OrderEventModel::unreconciled_client_order_ids(&exchange, symbol).await?;
        for cid in pending {
            match self.gateway.get_order(symbol, &cid).await {
                Ok(order) => {
                    let mut event = self.event_base(
                        trace_id,
                        symbol,
                        &cid,
                        OrderEventType::Reconciled,
                        OrderSide::Buy,
                        order.executed_qty,
                        "RECONCILE",
                        &format!("exchange status {}", order.status.as_str()),
                        "RECONCILE",
                        order.raw.clone(),
                    );
                    event.exchange_order_id = order.exchange_order_id.clone();
                    event.status = order.status.as_str().to_string();
                    OrderEventModel::append(&event).await?;
                    if order.status == OrderStatus::Filled {
                        let mut fill_event = self.event_base(
                            trace_id,
                            symbol,
                            &cid,
                            OrderEventType::Filled,
                            OrderSide::Buy,
                            order.executed_qty,
                            "RECONCILE",
                            "fill discovered during reconciliation",
                            "RECONCILE",
                            order.raw.clone(),
                        );
                        fill_event.price = order.avg_price;
                        fill_event.status = "FILLED".to_string();
                        OrderEventModel::append(&fill_event).await?;
                    }
                }
                Err(e) => {
                    warn!(symbol, cid = cid.as_str(), error = %e, "对账查单失败");
                }
            }
        }
        Ok(())
    }

    /// 紧急退出监听：控制面置位后立即全平
    async fn emergency_watch_loop(self: Arc<Self>) {
        let mut rx = self.control_rx.clone();
        loop {
            if rx.changed().await.is_err() {
                return;
            }
            let state = rx.borrow().clone();
            if !state.emergency_exit {
                continue;
            }
            let trace_id = if state.emergency_trace_id.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                state.emergency_trace_id.clone()
            };
            info!(trace_id = trace_id.as_str(), "紧急退出：开始全平");
            match TradeLogModel::all_open().await {
                Ok(trades) => {
                    for trade in trades {
                        if let Err(e) = self
                            .close_position(&trade, "EMERGENCY_EXIT", "emergency exit command", &trace_id)
                            .await
                        {
                            error!(symbol = trade.symbol.as_str(), error = %e, "紧急平仓失败");
                        }
                    }
                }
                Err(e) => error!(error = %e, "读取持仓失败"),
            }
            // 平仓完成后回写清除紧急位；HALT 保持
            if let Err(e) = SystemConfigModel::write(
                keys::EMERGENCY_EXIT,
                "false",
                SERVICE,
                &trace_id,
                "EMERGENCY_EXIT",
                "emergency exit completed",
            )
            .await
            {
                error!(error = %e, "清除 EMERGENCY_EXIT 失败");
            }
            self.control_tx.send_modify(|s| s.emergency_exit = false);
        }
    }

    async fn periodic_snapshot_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(
            self.settings.position_snapshot_interval_seconds.max(1),
        ));
        loop {
            interval.tick().await;
            match TradeLogModel::all_open().await {
                Ok(trades) => {
                    for trade in trades.iter().filter(|t| t.qty > 0.0) {
                        if let Err(e) = PositionSnapshotModel::write(
                            &trade.symbol,
                            trade.qty,
                            trade.entry_price,
                            &json!({ "note": "periodic_snapshot" }),
                        )
                        .await
                        {
                            error!(symbol = trade.symbol.as_str(), error = %e, "周期快照失败");
                        }
                    }
                }
                Err(e) => error!(error = %e, "读取持仓失败"),
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let instance = instance_id();
        let mut first = true;
        let mut interval = tokio::time::interval(Duration::from_secs(
            self.settings.heartbeat_interval_seconds.max(1),
        ));
        loop {
            interval.tick().await;
            let now = time_util::now_ms();
            let state = self.control_rx.borrow().clone();
            let status = json!({
                "last_tick_utc": time_util::mill_time_to_datetime(now).unwrap_or_default(),
                "last_tick_hk": time_util::mill_time_to_datetime_hk(now).unwrap_or_default(),
                "halt_trading": state.halt_trading,
                "limiter": self.gateway.limiter().metrics(),
            });
            match ServiceStatusModel::upsert(SERVICE, &instance, &status).await {
                Ok(_) => {
                    if first {
                        info!(instance = instance.as_str(), "首次心跳成功，服务就绪");
                        first = false;
                    }
                }
                Err(e) => error!(error = %e, "心跳写入失败"),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn event_base(
        &self,
        trace_id: &str,
        symbol: &str,
        cid: &str,
        event_type: OrderEventType,
        side: OrderSide,
        qty: f64,
        reason_code: &str,
        reason: &str,
        action: &str,
        payload: serde_json::Value,
    ) -> NewOrderEvent {
        NewOrderEvent {
            trace_id: trace_id.to_string(),
            service: SERVICE.to_string(),
            exchange: self.gateway.exchange_name(),
            symbol: symbol.to_string(),
            client_order_id: cid.to_string(),
            exchange_order_id: None,
            event_type,
            side: side.as_str().to_string(),
            qty,
            price: None,
            status: event_type.as_str().to_string(),
            reason_code: reason_code.to_string(),
            reason: reason.to_string(),
            action: action.to_string(),
            actor: SERVICE.to_string(),
            payload,
        }
    }
}
