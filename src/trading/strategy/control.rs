//! 控制面：指令消费 + 可观察的控制状态快照
//!
//! tick 热路径只读 watch 通道里的快照，不查库；
//! 快照由指令消费者在应用每条指令后刷新。指令至少一次投递，
//! 这里的语义动作都写成可重入的（重复 HALT/RESUME 无副作用）。

use anyhow::Result;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::app_config::settings::Settings;
use crate::trading::model::control_command::{commands, ControlCommandEntity, ControlCommandModel};
use crate::trading::model::system_config::{keys, SystemConfigModel};
use crate::trading::services::notification::Notifier;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlState {
    pub halt_trading: bool,
    /// 置位后由策略引擎执行全平，平完由引擎回写清除
    pub emergency_exit: bool,
    /// 紧急退出指令的 trace，贯穿所有落库与告警
    pub emergency_trace_id: String,
}

pub type ControlStateSender = watch::Sender<ControlState>;
pub type ControlStateReceiver = watch::Receiver<ControlState>;

pub fn control_channel() -> (ControlStateSender, ControlStateReceiver) {
    watch::channel(ControlState::default())
}

pub struct ControlCommandConsumer {
    tx: ControlStateSender,
    notifier: std::sync::Arc<dyn Notifier>,
    poll_seconds: u64,
}

impl ControlCommandConsumer {
    pub fn new(
        settings: &Settings,
        tx: ControlStateSender,
        notifier: std::sync::Arc<dyn Notifier>,
    ) -> Self {
        Self {
            tx,
            notifier,
            poll_seconds: settings.control_poll_seconds,
        }
    }

    /// 启动时从 system_config 恢复快照
    pub async fn load_initial_state(&self) -> Result<()> {
        let halt = SystemConfigModel::get_bool(keys::HALT_TRADING, false).await?;
        let emergency = SystemConfigModel::get_bool(keys::EMERGENCY_EXIT, false).await?;
        self.tx.send_modify(|state| {
            state.halt_trading = halt;
            state.emergency_exit = emergency;
        });
        Ok(())
    }

    /// 常驻轮询任务
    pub async fn run(self) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.poll_seconds.max(1)));
        loop {
            interval.tick().await;
            match ControlCommandModel::claim_next_new().await {
                Ok(Some(command)) => {
                    let id = command.id;
                    match self.apply(&command).await {
                        Ok(_) => {
                            if let Err(e) = ControlCommandModel::mark_processed(id).await {
                                error!(id, error = %e, "标记指令 PROCESSED 失败");
                            }
                        }
                        Err(e) => {
                            error!(id, command = command.command.as_str(), error = %e, "指令执行失败");
                            if let Err(e2) = ControlCommandModel::mark_error(id, &e.to_string()).await
                            {
                                error!(id, error = %e2, "标记指令 ERROR 失败");
                            }
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "拉取控制指令失败"),
            }
        }
    }

    async fn apply(&self, command: &ControlCommandEntity) -> Result<()> {
        info!(
            id = command.id,
            command = command.command.as_str(),
            actor = command.actor.as_str(),
            trace_id = command.trace_id.as_str(),
            "应用控制指令"
        );
        match command.command.as_str() {
            commands::HALT => {
                SystemConfigModel::write(
                    keys::HALT_TRADING,
                    "true",
                    &command.actor,
                    &command.trace_id,
                    &command.reason_code,
                    &command.reason,
                )
                .await?;
                self.tx.send_modify(|state| state.halt_trading = true);
            }
            commands::RESUME => {
                SystemConfigModel::write(
                    keys::HALT_TRADING,
                    "false",
                    &command.actor,
                    &command.trace_id,
                    &command.reason_code,
                    &command.reason,
                )
                .await?;
                self.tx.send_modify(|state| {
                    state.halt_trading = false;
                    state.emergency_exit = false;
                });
            }
            commands::EMERGENCY_EXIT => {
                // 先 HALT，再置紧急退出位；实际平仓由策略引擎完成
                SystemConfigModel::write(
                    keys::HALT_TRADING,
                    "true",
                    &command.actor,
                    &command.trace_id,
                    "EMERGENCY_EXIT",
                    &command.reason,
                )
                .await?;
                SystemConfigModel::write(
                    keys::EMERGENCY_EXIT,
                    "true",
                    &command.actor,
                    &command.trace_id,
                    "EMERGENCY_EXIT",
                    &command.reason,
                )
                .await?;
                let trace = command.trace_id.clone();
                self.tx.send_modify(|state| {
                    state.halt_trading = true;
                    state.emergency_exit = true;
                    state.emergency_trace_id = trace;
                });
                self.notifier
                    .send_system_alert(
                        "EMERGENCY_EXIT",
                        &command.trace_id,
                        &[
                            ("actor".to_string(), command.actor.clone()),
                            ("reason".to_string(), command.reason.clone()),
                        ],
                    )
                    .await
                    .ok();
            }
            commands::CONFIG_SET => {
                let payload: Value = serde_json::from_str(
                    command.payload_json.as_deref().unwrap_or("{}"),
                )?;
                let key = payload
                    .get("key")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("CONFIG_SET 缺少 key"))?;
                let value = payload
                    .get("value")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("CONFIG_SET 缺少 value"))?;
                SystemConfigModel::write(
                    key,
                    value,
                    &command.actor,
                    &command.trace_id,
                    &command.reason_code,
                    &command.reason,
                )
                .await?;
                if key == keys::HALT_TRADING {
                    let halt = value.eq_ignore_ascii_case("true") || value == "1";
                    self.tx.send_modify(|state| state.halt_trading = halt);
                }
            }
            other => {
                warn!(command = other, "未识别的控制指令");
                return Err(anyhow::anyhow!("unknown command: {}", other));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_snapshot_updates() {
        let (tx, rx) = control_channel();
        assert!(!rx.borrow().halt_trading);
        tx.send_modify(|s| s.halt_trading = true);
        assert!(rx.borrow().halt_trading);
    }
}
