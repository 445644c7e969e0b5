//! 特征集计算
//!
//! 把一段 OHLCV 历史折算成最后一根 bar 的指标集（features_json 的内容）。
//! 字段增删必须伴随 FEATURE_VERSION 升版，老版本缓存行永不覆盖。

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use ta::indicators::{ExponentialMovingAverage, RelativeStrengthIndex, SimpleMovingAverage, TrueRange};
use ta::{DataItem, Next};

use crate::trading::indicator::adx::Adx;
use crate::trading::indicator::squeeze::{SqueezeCalculator, SqueezeConfig, SqueezeState};
use crate::trading::indicator::stat::rolling_correlation;
use crate::trading::model::market::candles::CandleEntity;

/// 计算一组特征至少需要的历史长度
pub const MIN_BARS: usize = 60;

/// BTC 相关性滚动窗口
const BTC_CORR_WINDOW: usize = 96;

/// AI 输入向量维度（to_vector 的长度）
pub const FEATURE_DIM: usize = 8;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FeatureSet {
    pub adx: f64,
    pub di_plus: f64,
    pub di_minus: f64,
    pub ema_21: f64,
    pub ema_55: f64,
    pub squeeze_on: bool,
    pub momentum: f64,
    pub vol_ratio: f64,
    pub rsi: f64,
    pub rsi_slope: f64,
    pub atr: f64,
    /// 与 BTC 的 rolling-96 相关性，尽力而为
    #[serde(default)]
    pub btc_corr: Option<f64>,
}

impl FeatureSet {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("FeatureSet is always serializable")
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// AI 打分的输入向量；顺序就是模型维度，改动即升特征版本
    pub fn to_vector(&self) -> Vec<f64> {
        vec![
            self.adx,
            self.di_plus - self.di_minus,
            self.momentum,
            self.vol_ratio,
            self.rsi,
            self.rsi_slope,
            if self.squeeze_on { 1.0 } else { 0.0 },
            self.btc_corr.unwrap_or(0.0),
        ]
    }
}

pub struct FeatureEngine {
    squeeze_config: SqueezeConfig,
}

impl FeatureEngine {
    pub fn new() -> Self {
        Self {
            squeeze_config: SqueezeConfig::default(),
        }
    }

    fn to_data_items(candles: &[CandleEntity]) -> Result<Vec<DataItem>> {
        candles
            .iter()
            .map(|c| {
                DataItem::builder()
                    .open(c.open_price)
                    .high(c.high_price)
                    .low(c.low_price)
                    .close(c.close_price)
                    .volume(c.volume)
                    .build()
                    .map_err(|e| anyhow!("invalid candle at {}: {:?}", c.open_time_ms, e))
            })
            .collect()
    }

    /// 基于完整历史（时间正序）计算最后一根 bar 的特征。
    /// `btc_closes` 为对齐到同样末端的 BTC 收盘序列，缺失时相关性为 None。
    pub fn compute_last(
        &self,
        candles: &[CandleEntity],
        btc_closes: Option<&[f64]>,
    ) -> Result<FeatureSet> {
        if candles.len() < MIN_BARS {
            return Err(anyhow!(
                "insufficient history: {} bars, need {}",
                candles.len(),
                MIN_BARS
            ));
        }
        let items = Self::to_data_items(candles)?;

        let mut ema21 = ExponentialMovingAverage::new(21)
            .map_err(|e| anyhow!("EMA init: {:?}", e))?;
        let mut ema55 = ExponentialMovingAverage::new(55)
            .map_err(|e| anyhow!("EMA init: {:?}", e))?;
        let mut rsi = RelativeStrengthIndex::new(14).map_err(|e| anyhow!("RSI init: {:?}", e))?;
        let mut atr_sma =
            SimpleMovingAverage::new(20).map_err(|e| anyhow!("SMA init: {:?}", e))?;
        let mut tr = TrueRange::new();
        let mut adx = Adx::new(14);

        let mut ema21_val = 0.0;
        let mut ema55_val = 0.0;
        let mut rsi_prev = 50.0;
        let mut rsi_val = 50.0;
        let mut atr_val = 0.0;
        let mut adx_out = adx.next(
            candles[0].high_price,
            candles[0].low_price,
            candles[0].close_price,
        );

        for (i, candle) in candles.iter().enumerate() {
            let item = &items[i];
            ema21_val = ema21.next(item);
            ema55_val = ema55.next(item);
            rsi_prev = rsi_val;
            rsi_val = rsi.next(item);
            atr_val = atr_sma.next(tr.next(item));
            if i > 0 {
                adx_out = adx.next(candle.high_price, candle.low_price, candle.close_price);
            }
        }

        // 量比：当前量 / 前5根均量（不含当前）
        let last = candles.len() - 1;
        let prev_vol_sum: f64 = candles[last - 5..last].iter().map(|c| c.volume).sum();
        let prev_vol_avg = prev_vol_sum / 5.0;
        let vol_ratio = if prev_vol_avg > 0.0 {
            candles[last].volume / prev_vol_avg
        } else {
            0.0
        };

        let mut squeeze = SqueezeCalculator::new(self.squeeze_config.clone())?;
        let squeeze_out = squeeze.calculate(&items)?;

        let btc_corr = btc_closes.and_then(|btc| {
            let closes: Vec<f64> = candles.iter().map(|c| c.close_price).collect();
            rolling_correlation(&closes, btc, BTC_CORR_WINDOW)
        });

        Ok(FeatureSet {
            adx: adx_out.adx,
            di_plus: adx_out.plus_di,
            di_minus: adx_out.minus_di,
            ema_21: ema21_val,
            ema_55: ema55_val,
            squeeze_on: squeeze_out.squeeze_state == SqueezeState::SqueezeOn,
            momentum: squeeze_out.momentum,
            vol_ratio,
            rsi: rsi_val,
            rsi_slope: rsi_val - rsi_prev,
            atr: atr_val,
            btc_corr,
        })
    }
}

impl Default for FeatureEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(i: usize, close: f64, volume: f64) -> CandleEntity {
        CandleEntity {
            symbol: "BTCUSDT".to_string(),
            timeframe: "15m".to_string(),
            open_time_ms: i as i64 * 900_000,
            open_price: close - 0.5,
            high_price: close + 1.0,
            low_price: close - 1.5,
            close_price: close,
            volume,
        }
    }

    fn trending_series(n: usize) -> Vec<CandleEntity> {
        (0..n)
            .map(|i| candle(i, 100.0 + i as f64 * 0.8, 10.0 + (i % 7) as f64))
            .collect()
    }

    #[test]
    fn test_compute_last_produces_full_set() {
        let candles = trending_series(80);
        let engine = FeatureEngine::new();
        let features = engine.compute_last(&candles, None).unwrap();
        assert!(features.adx > 0.0);
        assert!(features.di_plus > features.di_minus);
        assert!(features.ema_21 > features.ema_55); // 上升趋势里短均线在上
        assert!(features.vol_ratio > 0.0);
        assert!(features.btc_corr.is_none());
    }

    #[test]
    fn test_insufficient_history_is_error() {
        let candles = trending_series(30);
        let engine = FeatureEngine::new();
        assert!(engine.compute_last(&candles, None).is_err());
    }

    #[test]
    fn test_features_json_round_trip() {
        let candles = trending_series(80);
        let engine = FeatureEngine::new();
        let features = engine.compute_last(&candles, None).unwrap();
        let json = features.to_json();
        let parsed = FeatureSet::from_json(&json).unwrap();
        assert_eq!(parsed, features);
    }

    #[test]
    fn test_btc_corr_with_aligned_series() {
        let candles = trending_series(120);
        let btc: Vec<f64> = candles.iter().map(|c| c.close_price * 2.0).collect();
        let engine = FeatureEngine::new();
        let features = engine.compute_last(&candles, Some(&btc)).unwrap();
        let corr = features.btc_corr.unwrap();
        assert!((corr - 1.0).abs() < 1e-6);
    }
}
