use common::Candle;

/// True range of `candle` given the previous close.
pub fn true_range(prev_close: f64, candle: &Candle) -> f64 {
    let hl = candle.high - candle.low;
    let hc = (candle.high - prev_close).abs();
    let lc = (candle.low - prev_close).abs();
    hl.max(hc).max(lc)
}

/// Wilder-smoothed ATR. Output aligns with the input; the first `period`
/// values carry the running seed average.
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if candles.is_empty() || period == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(candles.len());
    let mut current = candles[0].high - candles[0].low;
    out.push(current);
    for (i, candle) in candles.iter().enumerate().skip(1) {
        let tr = true_range(candles[i - 1].close, candle);
        if i < period {
            // Seed phase: plain running average of TR.
            current = (current * i as f64 + tr) / (i + 1) as f64;
        } else {
            current = (current * (period - 1) as f64 + tr) / period as f64;
        }
        out.push(current);
    }
    out
}

/// Last ATR value, `None` when fewer than `period + 1` candles exist.
pub fn last_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.len() <= period {
        return None;
    }
    atr_series(candles, period).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn bar(low: f64, high: f64, close: f64) -> Candle {
        Candle {
            open_time: DateTime::from_timestamp_millis(0).unwrap(),
            open: close,
            high,
            low,
            close,
            volume: 1.0,
            close_time: DateTime::from_timestamp_millis(1).unwrap(),
            quote_volume: 1.0,
            taker_buy_base: 0.5,
        }
    }

    #[test]
    fn constant_range_bars_give_constant_atr() {
        let candles: Vec<Candle> = (0..40).map(|_| bar(99.0, 101.0, 100.0)).collect();
        let atr = last_atr(&candles, 14).unwrap();
        assert!((atr - 2.0).abs() < 1e-6, "expected 2.0, got {atr}");
    }

    #[test]
    fn gap_bars_widen_true_range() {
        // Close at 100, next bar gaps to 110..112: TR = 112 - 100 = 12.
        let tr = true_range(100.0, &bar(110.0, 112.0, 111.0));
        assert!((tr - 12.0).abs() < 1e-9);
    }

    #[test]
    fn last_atr_requires_enough_bars() {
        let candles: Vec<Candle> = (0..14).map(|_| bar(99.0, 101.0, 100.0)).collect();
        assert!(last_atr(&candles, 14).is_none());
    }
}
