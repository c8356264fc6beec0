use common::Candle;

/// Volume-weighted average price over the trailing `window` bars, using
/// the typical price (H+L+C)/3 per bar.
pub fn rolling_vwap(candles: &[Candle], window: usize) -> Option<f64> {
    if candles.is_empty() || window == 0 {
        return None;
    }
    let start = candles.len().saturating_sub(window);
    let tail = &candles[start..];

    let mut pv = 0.0;
    let mut volume = 0.0;
    for candle in tail {
        let typical = (candle.high + candle.low + candle.close) / 3.0;
        pv += typical * candle.volume;
        volume += candle.volume;
    }
    if volume <= 0.0 {
        return None;
    }
    Some(pv / volume)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn bar(price: f64, volume: f64) -> Candle {
        Candle {
            open_time: DateTime::from_timestamp_millis(0).unwrap(),
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
            close_time: DateTime::from_timestamp_millis(1).unwrap(),
            quote_volume: price * volume,
            taker_buy_base: volume / 2.0,
        }
    }

    #[test]
    fn vwap_weights_by_volume() {
        // 100 with volume 1, 200 with volume 3 -> 175.
        let candles = vec![bar(100.0, 1.0), bar(200.0, 3.0)];
        let vwap = rolling_vwap(&candles, 10).unwrap();
        assert!((vwap - 175.0).abs() < 1e-9);
    }

    #[test]
    fn vwap_none_on_zero_volume() {
        let candles = vec![bar(100.0, 0.0)];
        assert!(rolling_vwap(&candles, 10).is_none());
    }
}
