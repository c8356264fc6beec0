use common::Candle;

use super::atr::last_atr;
use super::ema::last_ema;
use super::mean;

/// Last Bollinger (mid, upper, lower) over `period` closes with `k`
/// standard deviations.
pub fn bollinger(closes: &[f64], period: usize, k: f64) -> Option<(f64, f64, f64)> {
    if closes.len() < period || period == 0 {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let mid = mean(window);
    let variance = window.iter().map(|v| (v - mid).powi(2)).sum::<f64>() / period as f64;
    let sd = variance.sqrt();
    Some((mid, mid + k * sd, mid - k * sd))
}

/// Normalized band width ((upper - lower) / mid) for every index where a
/// full window exists. Output length = closes.len() - period + 1.
pub fn bb_width_series(closes: &[f64], period: usize, k: f64) -> Vec<f64> {
    if closes.len() < period || period == 0 {
        return Vec::new();
    }
    (period..=closes.len())
        .filter_map(|end| {
            let (mid, upper, lower) = bollinger(&closes[..end], period, k)?;
            if mid == 0.0 {
                None
            } else {
                Some((upper - lower) / mid)
            }
        })
        .collect()
}

/// Keltner channel (mid, upper, lower): EMA of closes with ATR envelopes.
pub fn keltner(candles: &[Candle], period: usize, atr_mult: f64) -> Option<(f64, f64, f64)> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let mid = last_ema(&closes, period)?;
    let atr = last_atr(candles, period)?;
    Some((mid, mid + atr_mult * atr, mid - atr_mult * atr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_closes_collapse_bands() {
        let closes = vec![50.0; 30];
        let (mid, upper, lower) = bollinger(&closes, 20, 2.0).unwrap();
        assert!((mid - 50.0).abs() < 1e-9);
        assert!((upper - lower).abs() < 1e-9);
    }

    #[test]
    fn volatile_closes_widen_bands() {
        let calm: Vec<f64> = (0..30).map(|i| 100.0 + (i % 2) as f64 * 0.1).collect();
        let wild: Vec<f64> = (0..30).map(|i| 100.0 + (i % 2) as f64 * 5.0).collect();
        let calm_width = bb_width_series(&calm, 20, 2.0).pop().unwrap();
        let wild_width = bb_width_series(&wild, 20, 2.0).pop().unwrap();
        assert!(wild_width > calm_width * 5.0);
    }

    #[test]
    fn bollinger_requires_full_window() {
        assert!(bollinger(&[1.0; 19], 20, 2.0).is_none());
    }
}
