//! Pure indicator functions over closed candle series (oldest first).
//! Each returns `None` or an empty series when the input is too short.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod cvd;
pub mod ema;
pub mod rsi;
pub mod swing;
pub mod volume_profile;
pub mod vwap;

pub use adx::last_adx;
pub use atr::{atr_series, last_atr};
pub use bollinger::{bb_width_series, bollinger, keltner};
pub use cvd::{cvd_divergence, cvd_series};
pub use ema::{ema_series, last_ema, slope_pct_per_bar};
pub use rsi::rsi;
pub use swing::{donchian, last_impulse, recent_extremes};
pub use volume_profile::{volume_profile, VolumeProfile};
pub use vwap::rolling_vwap;

/// Percentile rank (0..100) of `value` within the trailing `lookback`
/// window of `series`: the share of window values at or below `value`.
pub fn percentile_rank(series: &[f64], value: f64, lookback: usize) -> f64 {
    if series.is_empty() {
        return 50.0;
    }
    let start = series.len().saturating_sub(lookback);
    let window = &series[start..];
    let below = window.iter().filter(|&&v| v <= value).count();
    below as f64 / window.len() as f64 * 100.0
}

/// Arithmetic mean; 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median by sorting a copy; 0.0 for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_rank_of_extremes() {
        let series: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        assert!((percentile_rank(&series, 10.0, 10) - 100.0).abs() < 1e-9);
        assert!((percentile_rank(&series, 1.0, 10) - 10.0).abs() < 1e-9);
        assert!((percentile_rank(&series, 5.0, 10) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn median_even_and_odd() {
        assert!((median(&[3.0, 1.0, 2.0]) - 2.0).abs() < 1e-9);
        assert!((median(&[4.0, 1.0, 3.0, 2.0]) - 2.5).abs() < 1e-9);
    }
}
