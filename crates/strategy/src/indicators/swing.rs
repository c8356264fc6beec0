use common::Candle;

/// Donchian channel (high, low) over the trailing `window` bars.
pub fn donchian(candles: &[Candle], window: usize) -> Option<(f64, f64)> {
    if candles.len() < window || window == 0 {
        return None;
    }
    let tail = &candles[candles.len() - window..];
    let high = tail.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let low = tail.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    Some((high, low))
}

/// Highest high and lowest low over `lookback` bars, excluding the final
/// bar. This is the reference the sweep detector pricks through.
pub fn recent_extremes(candles: &[Candle], lookback: usize) -> Option<(f64, f64)> {
    if candles.len() < lookback + 1 {
        return None;
    }
    let end = candles.len() - 1;
    let start = end - lookback;
    let window = &candles[start..end];
    let high = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let low = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    Some((high, low))
}

/// The most recent impulse leg within `lookback` bars: (swing_low,
/// swing_high, true when the low came first, i.e. an up-leg).
pub fn last_impulse(candles: &[Candle], lookback: usize) -> Option<(f64, f64, bool)> {
    if candles.len() < lookback {
        return None;
    }
    let tail = &candles[candles.len() - lookback..];

    let (low_idx, low) = tail
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.low.partial_cmp(&b.1.low).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, c)| (i, c.low))?;
    let (high_idx, high) = tail
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.high.partial_cmp(&b.1.high).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, c)| (i, c.high))?;

    if high <= low {
        return None;
    }
    Some((low, high, low_idx < high_idx))
}
