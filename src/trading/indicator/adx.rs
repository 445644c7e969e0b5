//! ADX / +DI / -DI（Wilder），流式计算

use crate::trading::indicator::rma::Rma;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdxOutput {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

#[derive(Debug)]
pub struct Adx {
    tr_rma: Rma,
    plus_dm_rma: Rma,
    minus_dm_rma: Rma,
    dx_rma: Rma,
    prev_high: Option<f64>,
    prev_low: Option<f64>,
    prev_close: Option<f64>,
}

impl Adx {
    pub fn new(period: usize) -> Self {
        Self {
            tr_rma: Rma::new(period),
            plus_dm_rma: Rma::new(period),
            minus_dm_rma: Rma::new(period),
            dx_rma: Rma::new(period),
            prev_high: None,
            prev_low: None,
            prev_close: None,
        }
    }

    pub fn next(&mut self, high: f64, low: f64, close: f64) -> AdxOutput {
        let (plus_dm, minus_dm, tr) = match (self.prev_high, self.prev_low, self.prev_close) {
            (Some(ph), Some(pl), Some(pc)) => {
                let up_move = high - ph;
                let down_move = pl - low;
                let plus_dm = if up_move > down_move && up_move > 0.0 {
                    up_move
                } else {
                    0.0
                };
                let minus_dm = if down_move > up_move && down_move > 0.0 {
                    down_move
                } else {
                    0.0
                };
                let tr = (high - low)
                    .max((high - pc).abs())
                    .max((low - pc).abs());
                (plus_dm, minus_dm, tr)
            }
            _ => (0.0, 0.0, high - low),
        };
        self.prev_high = Some(high);
        self.prev_low = Some(low);
        self.prev_close = Some(close);

        let atr = self.tr_rma.next(tr);
        let plus_smoothed = self.plus_dm_rma.next(plus_dm);
        let minus_smoothed = self.minus_dm_rma.next(minus_dm);

        let (plus_di, minus_di) = if atr > 0.0 {
            (
                100.0 * plus_smoothed / atr,
                100.0 * minus_smoothed / atr,
            )
        } else {
            (0.0, 0.0)
        };

        let di_sum = plus_di + minus_di;
        let dx = if di_sum > 0.0 {
            100.0 * (plus_di - minus_di).abs() / di_sum
        } else {
            0.0
        };
        let adx = self.dx_rma.next(dx);

        AdxOutput {
            adx,
            plus_di,
            minus_di,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uptrend_favors_plus_di() {
        let mut adx = Adx::new(14);
        let mut out = AdxOutput {
            adx: 0.0,
            plus_di: 0.0,
            minus_di: 0.0,
        };
        // 持续单边上涨
        for i in 0..60 {
            let base = 100.0 + i as f64 * 2.0;
            out = adx.next(base + 1.0, base - 1.0, base + 0.8);
        }
        assert!(out.plus_di > out.minus_di);
        assert!(out.adx > 25.0, "trending market should have strong ADX, got {}", out.adx);
    }

    #[test]
    fn test_flat_market_low_adx() {
        let mut adx = Adx::new(14);
        let mut out = AdxOutput {
            adx: 0.0,
            plus_di: 0.0,
            minus_di: 0.0,
        };
        for i in 0..120 {
            // 窄幅震荡
            let wiggle = if i % 2 == 0 { 0.2 } else { -0.2 };
            out = adx.next(100.5 + wiggle, 99.5 + wiggle, 100.0 + wiggle);
        }
        assert!(out.adx < 25.0, "flat market ADX should be weak, got {}", out.adx);
    }
}
