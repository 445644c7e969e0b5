//! 交易所实例选择：PAPER_TRADING 优先，其次按 EXCHANGE_NAME

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::app_config::settings::Settings;
use crate::trading::core::binance::BinanceUsdmExchange;
use crate::trading::core::exchange::Exchange;
use crate::trading::core::paper_exchange::PaperExchange;

pub fn build_exchange(settings: &Settings) -> Result<Arc<dyn Exchange>> {
    if settings.paper_trading {
        info!("PAPER_TRADING=true，使用模拟盘交易所");
        return Ok(Arc::new(PaperExchange::from_env()));
    }
    match settings.exchange_name.as_str() {
        "binance-usdm" => Ok(Arc::new(BinanceUsdmExchange::from_env()?)),
        other => Err(anyhow::anyhow!("不支持的交易所: {}", other)),
    }
}
