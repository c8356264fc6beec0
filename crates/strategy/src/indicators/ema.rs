/// Exponential moving average with alpha = 2 / (period + 1), seeded with
/// the first value. Output length equals input length.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() || period == 0 {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut current = values[0];
    out.push(current);
    for &v in &values[1..] {
        current = alpha * v + (1.0 - alpha) * current;
        out.push(current);
    }
    out
}

/// Last EMA value, or `None` when fewer than `period` inputs exist.
pub fn last_ema(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period {
        return None;
    }
    ema_series(values, period).last().copied()
}

/// Average per-bar slope of the series tail, as a percent of the level:
/// ((last - last_n_bars_ago) / last_n_bars_ago) * 100 / bars.
pub fn slope_pct_per_bar(series: &[f64], bars: usize) -> Option<f64> {
    if bars == 0 || series.len() <= bars {
        return None;
    }
    let last = *series.last()?;
    let past = series[series.len() - 1 - bars];
    if past == 0.0 {
        return None;
    }
    Some((last - past) / past * 100.0 / bars as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_of_constant_series_is_constant() {
        let out = ema_series(&[5.0; 30], 10);
        assert_eq!(out.len(), 30);
        assert!(out.iter().all(|v| (v - 5.0).abs() < 1e-9));
    }

    #[test]
    fn ema_tracks_rising_series_from_below() {
        let values: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let out = ema_series(&values, 10);
        let last = *out.last().unwrap();
        assert!(last < 49.0 && last > 40.0, "ema lags the input: {last}");
    }

    #[test]
    fn last_ema_requires_period_values() {
        assert!(last_ema(&[1.0; 9], 10).is_none());
        assert!(last_ema(&[1.0; 10], 10).is_some());
    }

    #[test]
    fn slope_is_zero_for_flat_and_positive_for_rising() {
        let flat = vec![100.0; 20];
        assert!(slope_pct_per_bar(&flat, 10).unwrap().abs() < 1e-9);

        let rising: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert!(slope_pct_per_bar(&rising, 10).unwrap() > 0.0);
    }
}
