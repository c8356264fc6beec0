use common::Candle;

/// Point of control and 70% value area from a fixed-bin volume profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeProfile {
    pub poc: f64,
    pub vah: f64,
    pub val: f64,
}

/// Histogram of volume by typical price over `candles`, split into
/// `bins`. The value area grows outward from the POC until it covers 70%
/// of total volume.
pub fn volume_profile(candles: &[Candle], bins: usize) -> Option<VolumeProfile> {
    if candles.len() < 2 || bins < 3 {
        return None;
    }

    let low = candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let high = candles.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    if !(high > low) {
        return None;
    }
    let step = (high - low) / bins as f64;

    let mut histogram = vec![0.0_f64; bins];
    let mut total = 0.0;
    for candle in candles {
        let typical = (candle.high + candle.low + candle.close) / 3.0;
        let mut idx = ((typical - low) / step) as usize;
        if idx >= bins {
            idx = bins - 1;
        }
        histogram[idx] += candle.volume;
        total += candle.volume;
    }
    if total <= 0.0 {
        return None;
    }

    let poc_idx = histogram
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?
        .0;

    // Expand from POC, taking the larger neighbor each step.
    let mut lo = poc_idx;
    let mut hi = poc_idx;
    let mut covered = histogram[poc_idx];
    let target = total * 0.70;
    while covered < target && (lo > 0 || hi < bins - 1) {
        let below = if lo > 0 { histogram[lo - 1] } else { -1.0 };
        let above = if hi < bins - 1 { histogram[hi + 1] } else { -1.0 };
        if above >= below {
            hi += 1;
            covered += histogram[hi];
        } else {
            lo -= 1;
            covered += histogram[lo];
        }
    }

    let bin_mid = |i: usize| low + (i as f64 + 0.5) * step;
    Some(VolumeProfile {
        poc: bin_mid(poc_idx),
        vah: low + (hi as f64 + 1.0) * step,
        val: low + lo as f64 * step,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn bar(price: f64, volume: f64) -> Candle {
        Candle {
            open_time: DateTime::from_timestamp_millis(0).unwrap(),
            open: price,
            high: price + 0.5,
            low: price - 0.5,
            close: price,
            volume,
            close_time: DateTime::from_timestamp_millis(1).unwrap(),
            quote_volume: price * volume,
            taker_buy_base: volume / 2.0,
        }
    }

    #[test]
    fn poc_sits_at_the_heaviest_price() {
        // Heavy trade at 105, light wings at 100 and 110.
        let mut candles = vec![bar(100.0, 5.0), bar(110.0, 5.0)];
        for _ in 0..20 {
            candles.push(bar(105.0, 10.0));
        }
        let profile = volume_profile(&candles, 20).unwrap();
        assert!(
            (profile.poc - 105.0).abs() < 1.0,
            "POC should be near 105, got {}",
            profile.poc
        );
        assert!(profile.val <= profile.poc && profile.poc <= profile.vah);
    }

    #[test]
    fn value_area_contains_majority_of_volume() {
        let candles: Vec<Candle> = (0..50).map(|i| bar(100.0 + (i % 10) as f64, 10.0)).collect();
        let profile = volume_profile(&candles, 20).unwrap();
        assert!(profile.vah > profile.val);
    }

    #[test]
    fn degenerate_inputs_yield_none() {
        assert!(volume_profile(&[], 20).is_none());
        let flat = vec![bar(100.0, 0.0), bar(100.0, 0.0)];
        assert!(volume_profile(&flat, 20).is_none());
    }
}
