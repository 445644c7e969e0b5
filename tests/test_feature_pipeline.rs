//! 特征流水线：合成一段"挤压 → 放量突破"的行情，
//! 验证缓存里相邻两行能表达出挤压释放

use asv8::trading::indicator::feature::{FeatureEngine, FeatureSet};
use asv8::trading::model::market::candles::CandleEntity;

fn candle(i: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> CandleEntity {
    CandleEntity {
        symbol: "BTCUSDT".to_string(),
        timeframe: "15m".to_string(),
        open_time_ms: 1_700_000_000_000 + i as i64 * 900_000,
        open_price: open,
        high_price: high,
        low_price: low,
        close_price: close,
        volume,
    }
}

/// 行情剧本：20 根波动铺底 → 40 根窄幅挤压 → 12 根放量拉升
fn squeeze_release_series() -> Vec<CandleEntity> {
    let mut candles = Vec::new();
    let mut i = 0;
    for k in 0..20 {
        let base = 100.0 + (k % 5) as f64;
        candles.push(candle(i, base, base + 3.0, base - 3.0, base, 10.0));
        i += 1;
    }
    for k in 0..40 {
        let w = if k % 2 == 0 { 0.05 } else { -0.05 };
        candles.push(candle(
            i,
            100.0 + w,
            100.15 + w,
            99.85 + w,
            100.0 + w,
            10.0,
        ));
        i += 1;
    }
    for k in 0..12 {
        let base = 100.0 + (k as f64 + 1.0) * 4.0;
        candles.push(candle(i, base - 4.0, base + 0.5, base - 4.5, base, 35.0));
        i += 1;
    }
    candles
}

#[test]
fn test_squeeze_release_visible_across_consecutive_bars() {
    let candles = squeeze_release_series();
    let engine = FeatureEngine::new();
    let split = 60; // 挤压段最后一根的下标 + 1

    // 挤压末端：squeeze_on
    let at_squeeze = engine.compute_last(&candles[..split], None).unwrap();
    assert!(at_squeeze.squeeze_on, "挤压段末端应处于 squeeze on");

    // 突破若干根后：squeeze 释放、动量转正、量比显著
    let at_breakout = engine.compute_last(&candles, None).unwrap();
    assert!(!at_breakout.squeeze_on, "突破后应 squeeze off");
    assert!(at_breakout.momentum > 0.0);
    assert!(at_breakout.di_plus > at_breakout.di_minus);

    // 缓存行以 JSON 存储，读回后语义不变
    let restored = FeatureSet::from_json(&at_breakout.to_json()).unwrap();
    assert_eq!(restored, at_breakout);
}

#[test]
fn test_breakout_volume_ratio_spikes() {
    let mut candles = squeeze_release_series();
    // 末根量是前 5 根均量（35）的 3 倍
    let last = candles.len() - 1;
    candles[last].volume = 105.0;
    let engine = FeatureEngine::new();
    let features = engine.compute_last(&candles, None).unwrap();
    assert!(features.vol_ratio > 2.5, "vol_ratio={}", features.vol_ratio);
}
