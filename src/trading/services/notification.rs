//! 告警通知
//!
//! 外部协作方只约定两个能力：系统告警与交易告警。
//! 两者都自动注入 ts_hk / ts_utc / event / trace_id，
//! 其余键按字典序排布，保证消息内容可复现、可断言。

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info};

use crate::time_util;

/// 组装告警正文：注入公共字段 + 剩余键排序
pub fn format_alert(event: &str, trace_id: &str, fields: &[(String, String)]) -> String {
    let now = time_util::now_ms();
    let mut lines = vec![
        format!("event: {}", event),
        format!("trace_id: {}", trace_id),
        format!(
            "ts_hk: {}",
            time_util::mill_time_to_datetime_hk(now).unwrap_or_default()
        ),
        format!(
            "ts_utc: {}",
            time_util::mill_time_to_datetime(now).unwrap_or_default()
        ),
    ];
    let mut rest: Vec<&(String, String)> = fields.iter().collect();
    rest.sort_by(|a, b| a.0.cmp(&b.0));
    for (k, v) in rest {
        lines.push(format!("{}: {}", k, v));
    }
    lines.join("\n")
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_system_alert(
        &self,
        event: &str,
        trace_id: &str,
        fields: &[(String, String)],
    ) -> Result<()>;

    async fn send_trade_alert(
        &self,
        event: &str,
        trace_id: &str,
        fields: &[(String, String)],
    ) -> Result<()>;
}

/// Telegram Bot 通知
pub struct TelegramNotifier {
    client: Client,
    bot_token: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramNotifier {
    /// 需要设置: TELEGRAM_BOT_TOKEN, TELEGRAM_CHAT_ID
    pub fn from_env() -> Result<Self> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| anyhow::anyhow!("TELEGRAM_BOT_TOKEN not set"))?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID")
            .map_err(|_| anyhow::anyhow!("TELEGRAM_CHAT_ID not set"))?;
        Ok(Self {
            client: Client::new(),
            bot_token,
            chat_id,
        })
    }

    async fn send_message(&self, text: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
        };
        let response = self.client.post(&url).json(&request).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Telegram 发送失败: {} - {}", status, body);
            Err(anyhow::anyhow!("Telegram API error: {}", status))
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_system_alert(
        &self,
        event: &str,
        trace_id: &str,
        fields: &[(String, String)],
    ) -> Result<()> {
        let text = format!("⚠️ 系统告警\n{}", format_alert(event, trace_id, fields));
        self.send_message(&text).await
    }

    async fn send_trade_alert(
        &self,
        event: &str,
        trace_id: &str,
        fields: &[(String, String)],
    ) -> Result<()> {
        let text = format!("📈 交易通知\n{}", format_alert(event, trace_id, fields));
        self.send_message(&text).await
    }
}

/// 无 Telegram 配置时的兜底：只打日志
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_system_alert(
        &self,
        event: &str,
        trace_id: &str,
        fields: &[(String, String)],
    ) -> Result<()> {
        info!(alert = "system", "{}", format_alert(event, trace_id, fields));
        Ok(())
    }

    async fn send_trade_alert(
        &self,
        event: &str,
        trace_id: &str,
        fields: &[(String, String)],
    ) -> Result<()> {
        info!(alert = "trade", "{}", format_alert(event, trace_id, fields));
        Ok(())
    }
}

/// 按环境构建：Telegram 配置齐了就用 Telegram，否则日志兜底
pub fn build_notifier() -> std::sync::Arc<dyn Notifier> {
    match TelegramNotifier::from_env() {
        Ok(notifier) => std::sync::Arc::new(notifier),
        Err(_) => {
            info!("Telegram 未配置，告警仅写日志");
            std::sync::Arc::new(LogNotifier)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_injects_common_fields_and_sorts_rest() {
        let text = format_alert(
            "DATA_LAG",
            "trace-1",
            &[
                ("symbol".to_string(), "BTCUSDT".to_string()),
                ("lag_seconds".to_string(), "180".to_string()),
            ],
        );
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "event: DATA_LAG");
        assert_eq!(lines[1], "trace_id: trace-1");
        assert!(lines[2].starts_with("ts_hk: "));
        assert!(lines[3].starts_with("ts_utc: "));
        // 剩余键字典序：lag_seconds 在 symbol 前
        assert!(lines[4].starts_with("lag_seconds: "));
        assert!(lines[5].starts_with("symbol: "));
    }
}
