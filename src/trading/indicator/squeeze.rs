//! Squeeze Momentum（LazyBear 形态）
//!
//! 布林带收缩进 Keltner 通道内 = 挤压中（SqueezeOn），重新张开 = 释放（SqueezeOff）。
//! 动量 = close 减去 (Donchian 中轨 + SMA)/2 后的线性回归端点值。

use anyhow::Result;
use serde::{Deserialize, Serialize};
use ta::indicators::{BollingerBands, SimpleMovingAverage, TrueRange};
use ta::{Close, DataItem, High, Low, Next};

use crate::trading::indicator::stat::calculate_linreg;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqueezeConfig {
    pub bb_length: usize,
    pub bb_multi: f64,
    pub kc_length: usize,
    pub kc_multi: f64,
}

impl Default for SqueezeConfig {
    fn default() -> Self {
        Self {
            bb_length: 20,
            bb_multi: 2.0,
            kc_length: 20,
            kc_multi: 1.5,
        }
    }
}

#[derive(Debug, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum SqueezeState {
    SqueezeOn,
    SqueezeOff,
    NoSqueeze,
}

#[derive(Debug, Clone)]
pub struct SqueezeOutput {
    pub squeeze_state: SqueezeState,
    pub momentum: f64,
    pub upper_bb: f64,
    pub lower_bb: f64,
    pub upper_kc: f64,
    pub lower_kc: f64,
}

pub struct SqueezeCalculator {
    config: SqueezeConfig,
    bb: BollingerBands,
    ma: SimpleMovingAverage,
    tr: TrueRange,
    range_ma: SimpleMovingAverage,
}

impl SqueezeCalculator {
    pub fn new(config: SqueezeConfig) -> Result<Self> {
        Ok(Self {
            bb: BollingerBands::new(config.bb_length, config.bb_multi)
                .map_err(|e| anyhow::anyhow!("BollingerBands init: {:?}", e))?,
            ma: SimpleMovingAverage::new(config.kc_length)
                .map_err(|e| anyhow::anyhow!("SMA init: {:?}", e))?,
            tr: TrueRange::new(),
            range_ma: SimpleMovingAverage::new(config.kc_length)
                .map_err(|e| anyhow::anyhow!("SMA init: {:?}", e))?,
            config,
        })
    }

    pub fn min_data_length(&self) -> usize {
        self.config.bb_length.max(self.config.kc_length) * 2
    }

    pub fn calculate(&mut self, data: &[DataItem]) -> Result<SqueezeOutput> {
        if data.len() < self.min_data_length() {
            return Err(anyhow::anyhow!("Insufficient data points"));
        }
        let kc_length = self.config.kc_length;

        // 布林带走满整个窗口
        let mut last_bb = None;
        for item in &data[data.len() - self.config.bb_length..] {
            last_bb = Some(self.bb.next(item));
        }
        let bb_val = last_bb.ok_or_else(|| anyhow::anyhow!("Failed to calculate BB"))?;

        // Keltner：SMA(close) ± kc_multi * SMA(TR)
        let mut ma = 0.0;
        let mut range_ma = 0.0;
        for item in &data[data.len() - kc_length..] {
            ma = self.ma.next(item);
            let tr_val = self.tr.next(item);
            range_ma = self.range_ma.next(tr_val);
        }
        let upper_kc = ma + range_ma * self.config.kc_multi;
        let lower_kc = ma - range_ma * self.config.kc_multi;

        // 动量源：close - (Donchian 中轨 + SMA)/2，逐点计算后取回归端点
        let mut momentum_source = Vec::with_capacity(kc_length);
        for end in (data.len() - kc_length)..data.len() {
            let window = &data[end + 1 - kc_length..=end];
            let highest = window
                .iter()
                .map(|d| d.high())
                .fold(f64::MIN, f64::max);
            let lowest = window.iter().map(|d| d.low()).fold(f64::MAX, f64::min);
            let sma: f64 = window.iter().map(|d| d.close()).sum::<f64>() / kc_length as f64;
            let mid = ((highest + lowest) / 2.0 + sma) / 2.0;
            momentum_source.push(data[end].close() - mid);
        }
        let momentum = calculate_linreg(&momentum_source, kc_length, 0).unwrap_or(0.0);

        let squeeze_state = if bb_val.lower > lower_kc && bb_val.upper < upper_kc {
            SqueezeState::SqueezeOn
        } else if bb_val.lower < lower_kc && bb_val.upper > upper_kc {
            SqueezeState::SqueezeOff
        } else {
            SqueezeState::NoSqueeze
        };

        Ok(SqueezeOutput {
            squeeze_state,
            momentum,
            upper_bb: bb_val.upper,
            lower_bb: bb_val.lower,
            upper_kc,
            lower_kc,
        })
    }
}
