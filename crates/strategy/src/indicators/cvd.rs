use common::{Candle, Direction};

/// Cumulative volume delta: running sum of (taker buy - taker sell)
/// volume per bar. Output aligns with the input.
pub fn cvd_series(candles: &[Candle]) -> Vec<f64> {
    let mut out = Vec::with_capacity(candles.len());
    let mut cum = 0.0;
    for candle in candles {
        cum += candle.taker_buy_base - candle.taker_sell_base();
        out.push(cum);
    }
    out
}

/// Classic price/CVD divergence over the trailing `lookback` bars.
///
/// Bullish (returns `Long`): price prints a lower low while CVD holds a
/// higher low. Bearish (`Short`): price higher high, CVD lower high.
pub fn cvd_divergence(candles: &[Candle], cvd: &[f64], lookback: usize) -> Option<Direction> {
    if candles.len() != cvd.len() || candles.len() < lookback || lookback < 4 {
        return None;
    }
    let start = candles.len() - lookback;
    let half = start + lookback / 2;

    let price_low = |range: std::ops::Range<usize>| {
        candles[range].iter().map(|c| c.low).fold(f64::INFINITY, f64::min)
    };
    let price_high = |range: std::ops::Range<usize>| {
        candles[range]
            .iter()
            .map(|c| c.high)
            .fold(f64::NEG_INFINITY, f64::max)
    };
    let cvd_min = |range: std::ops::Range<usize>| {
        cvd[range].iter().copied().fold(f64::INFINITY, f64::min)
    };
    let cvd_max = |range: std::ops::Range<usize>| {
        cvd[range].iter().copied().fold(f64::NEG_INFINITY, f64::max)
    };

    let older = start..half;
    let newer = half..candles.len();

    if price_low(newer.clone()) < price_low(older.clone())
        && cvd_min(newer.clone()) > cvd_min(older.clone())
    {
        return Some(Direction::Long);
    }
    if price_high(newer.clone()) > price_high(older.clone())
        && cvd_max(newer) < cvd_max(older)
    {
        return Some(Direction::Short);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn bar(price: f64, taker_buy: f64, volume: f64) -> Candle {
        Candle {
            open_time: DateTime::from_timestamp_millis(0).unwrap(),
            open: price,
            high: price + 0.5,
            low: price - 0.5,
            close: price,
            volume,
            close_time: DateTime::from_timestamp_millis(1).unwrap(),
            quote_volume: price * volume,
            taker_buy_base: taker_buy,
        }
    }

    #[test]
    fn cvd_accumulates_signed_flow() {
        // All buying: delta +10 per bar. Then all selling: -10 per bar.
        let candles = vec![bar(100.0, 10.0, 10.0), bar(101.0, 10.0, 10.0), bar(100.5, 0.0, 10.0)];
        let cvd = cvd_series(&candles);
        assert_eq!(cvd.len(), 3);
        assert!((cvd[0] - 10.0).abs() < 1e-9);
        assert!((cvd[1] - 20.0).abs() < 1e-9);
        assert!((cvd[2] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn bullish_divergence_on_lower_low_with_stronger_flow() {
        // Older half: price dips to 95 with heavy selling.
        // Newer half: price dips lower (94) but flow turns net-buying.
        let mut candles = Vec::new();
        for _ in 0..4 {
            candles.push(bar(95.0, 0.0, 10.0)); // selling, CVD falls
        }
        for _ in 0..4 {
            candles.push(bar(94.0, 10.0, 10.0)); // buying, CVD rises
        }
        let cvd = cvd_series(&candles);
        assert_eq!(cvd_divergence(&candles, &cvd, 8), Some(Direction::Long));
    }

    #[test]
    fn no_divergence_when_flow_confirms_price() {
        let mut candles = Vec::new();
        for i in 0..8 {
            candles.push(bar(100.0 + i as f64, 10.0, 10.0)); // rally with buying
        }
        let cvd = cvd_series(&candles);
        assert_eq!(cvd_divergence(&candles, &cvd, 8), None);
    }
}
