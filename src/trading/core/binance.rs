//! Binance USDM 合约 REST 客户端
//!
//! 只做一件事：把一次 HTTP 往返翻译为 `(T, ResponseMeta)` 或分类后的
//! `ExchangeError`。限流、重试、审计都在网关层。

use std::env;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use sha2::Sha256;
use tracing::debug;

use crate::trading::core::exchange::{
    AccountSnapshot, Exchange, ExchangeError, ExchangeResult, Kline, OrderRequest, OrderState,
    OrderStatus, OrderType, PositionInfo,
};
use crate::trading::core::rate_limiter::ResponseMeta;

pub struct BinanceUsdmExchange {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

fn to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

impl BinanceUsdmExchange {
    pub fn new(base_url: String, api_key: String, api_secret: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
            api_secret,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = crate::app_config::env::env_or_default(
            "EXCHANGE_BASE_URL",
            "https://fapi.binance.com",
        );
        let api_key = env::var("EXCHANGE_API_KEY")
            .map_err(|_| anyhow::anyhow!("EXCHANGE_API_KEY not set"))?;
        let api_secret = env::var("EXCHANGE_API_SECRET")
            .map_err(|_| anyhow::anyhow!("EXCHANGE_API_SECRET not set"))?;
        Ok(Self::new(base_url, api_key, api_secret))
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(query.as_bytes());
        to_hex(&mac.finalize().into_bytes())
    }

    /// 发送请求并分类失败：429/418 → RateLimited，5xx/网络 → Transient，其余 4xx → Terminal
    async fn send_request(
        &self,
        method: Method,
        path: &str,
        mut query: Vec<(String, String)>,
        signed: bool,
    ) -> Result<(Value, ResponseMeta), ExchangeError> {
        if signed {
            query.push((
                "timestamp".to_string(),
                chrono::Utc::now().timestamp_millis().to_string(),
            ));
            query.push(("recvWindow".to_string(), "5000".to_string()));
            let qs = query
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            let signature = self.sign(&qs);
            query.push(("signature".to_string(), signature));
        }

        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .query(&query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ExchangeError::Transient(e.to_string())
                } else {
                    ExchangeError::Terminal {
                        code: "HTTP".to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let header_pairs: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let meta = ResponseMeta::from_headers(
            status.as_u16(),
            header_pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        );

        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::Transient(e.to_string()))?;
        debug!(path, status = status.as_u16(), "exchange response");

        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            return Err(ExchangeError::RateLimited {
                retry_after_secs: meta.retry_after_secs,
            });
        }
        if status.is_server_error() {
            return Err(ExchangeError::Transient(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
            let code = parsed
                .get("code")
                .map(|c| c.to_string())
                .unwrap_or_else(|| status.as_u16().to_string());
            let message = parsed
                .get("msg")
                .and_then(|m| m.as_str())
                .unwrap_or(&body)
                .to_string();
            return Err(ExchangeError::Terminal { code, message });
        }

        let value: Value =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Transient(e.to_string()))?;
        Ok((value, meta))
    }

    fn parse_order_state(value: &Value) -> OrderState {
        OrderState {
            exchange_order_id: value
                .get("orderId")
                .map(|v| v.to_string().trim_matches('"').to_string()),
            client_order_id: value
                .get("clientOrderId")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            status: OrderStatus::parse(
                value.get("status").and_then(|v| v.as_str()).unwrap_or(""),
            ),
            executed_qty: value
                .get("executedQty")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0),
            avg_price: value
                .get("avgPrice")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|p| *p > 0.0),
            raw: value.clone(),
        }
    }

    fn order_query(req: &OrderRequest) -> Vec<(String, String)> {
        let mut query = vec![
            ("symbol".to_string(), req.symbol.clone()),
            ("side".to_string(), req.side.as_str().to_string()),
            ("type".to_string(), req.order_type.as_str().to_string()),
            ("quantity".to_string(), format!("{}", req.qty)),
            ("newClientOrderId".to_string(), req.client_order_id.clone()),
        ];
        if req.reduce_only {
            query.push(("reduceOnly".to_string(), "true".to_string()));
        }
        if let (OrderType::StopMarket, Some(stop)) = (req.order_type, req.stop_price) {
            query.push(("stopPrice".to_string(), format!("{}", stop)));
        }
        query
    }
}

#[async_trait]
impl Exchange for BinanceUsdmExchange {
    fn name(&self) -> &str {
        "binance-usdm"
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: Option<i64>,
        limit: u32,
    ) -> ExchangeResult<Vec<Kline>> {
        let mut query = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("interval".to_string(), interval.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        if let Some(start) = start_ms {
            query.push(("startTime".to_string(), start.to_string()));
        }
        let (value, meta) = self
            .send_request(Method::GET, "/fapi/v1/klines", query, false)
            .await?;

        let rows = value.as_array().cloned().unwrap_or_default();
        let mut klines = Vec::with_capacity(rows.len());
        for row in rows {
            let cells = match row.as_array() {
                Some(c) if c.len() >= 6 => c.clone(),
                _ => continue,
            };
            let num = |v: &Value| -> f64 {
                v.as_str()
                    .and_then(|s| s.parse().ok())
                    .or_else(|| v.as_f64())
                    .unwrap_or(0.0)
            };
            klines.push(Kline {
                open_time_ms: cells[0].as_i64().unwrap_or(0),
                open: num(&cells[1]),
                high: num(&cells[2]),
                low: num(&cells[3]),
                close: num(&cells[4]),
                volume: num(&cells[5]),
            });
        }
        Ok((klines, meta))
    }

    async fn place_order(&self, req: &OrderRequest) -> ExchangeResult<OrderState> {
        let (value, meta) = self
            .send_request(Method::POST, "/fapi/v1/order", Self::order_query(req), true)
            .await?;
        Ok((Self::parse_order_state(&value), meta))
    }

    async fn cancel_order(&self, symbol: &str, client_order_id: &str) -> ExchangeResult<OrderState> {
        let query = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("origClientOrderId".to_string(), client_order_id.to_string()),
        ];
        let (value, meta) = self
            .send_request(Method::DELETE, "/fapi/v1/order", query, true)
            .await?;
        Ok((Self::parse_order_state(&value), meta))
    }

    async fn get_order(&self, symbol: &str, client_order_id: &str) -> ExchangeResult<OrderState> {
        let query = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("origClientOrderId".to_string(), client_order_id.to_string()),
        ];
        let (value, meta) = self
            .send_request(Method::GET, "/fapi/v1/order", query, true)
            .await?;
        Ok((Self::parse_order_state(&value), meta))
    }

    async fn get_account(&self) -> ExchangeResult<AccountSnapshot> {
        let (value, meta) = self
            .send_request(Method::GET, "/fapi/v2/account", vec![], true)
            .await?;
        let num = |v: Option<&Value>| -> f64 {
            v.and_then(|x| x.as_str())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0)
        };
        let positions = value
            .get("positions")
            .and_then(|p| p.as_array())
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        let qty = num(row.get("positionAmt"));
                        if qty.abs() < f64::EPSILON {
                            return None;
                        }
                        Some(PositionInfo {
                            symbol: row
                                .get("symbol")
                                .and_then(|s| s.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            qty,
                            entry_price: num(row.get("entryPrice")),
                            unrealized_pnl: num(row.get("unrealizedProfit")),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok((
            AccountSnapshot {
                equity_usdt: num(value.get("totalMarginBalance")),
                available_usdt: num(value.get("availableBalance")),
                positions,
            },
            meta,
        ))
    }

    async fn set_stop(&self, req: &OrderRequest) -> ExchangeResult<OrderState> {
        self.place_order(req).await
    }
}
