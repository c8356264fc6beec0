use common::{Bias, Regime};

use crate::bundle::IndicatorBundle;

/// Multi-factor regime classifier over the 1h bundle.
///
/// Priority is fixed: TREND, then SQUEEZE, then RANGE, then CHOP. A
/// symbol without enough history never reaches the detector and stays
/// UNDECIDED.
#[derive(Debug, Clone)]
pub struct RegimeDetector {
    pub adx_threshold: f64,
    /// Minimum |EMA200 per-bar slope| in percent to call a trend.
    pub trend_slope_pct: f64,
    /// BB-width percentile below which a squeeze is possible.
    pub squeeze_percentile: f64,
    /// EMA20/EMA50 per-bar slope in percent under which they count as
    /// flat.
    pub flat_slope_pct: f64,
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self {
            adx_threshold: 20.0,
            trend_slope_pct: 0.01,
            squeeze_percentile: 25.0,
            flat_slope_pct: 0.05,
        }
    }
}

impl RegimeDetector {
    /// Classify the regime and a confidence in [0, 1].
    pub fn detect(&self, bundle: &IndicatorBundle) -> (Regime, f64) {
        if bundle.adx >= self.adx_threshold
            && bundle.ema200_slope_pct.abs() >= self.trend_slope_pct
        {
            let confidence = (bundle.adx / 40.0).min(1.0);
            return (Regime::Trend, confidence);
        }

        if bundle.bb_width_pct_rank < self.squeeze_percentile && bundle.squeeze_contained {
            let confidence = 1.0 - bundle.bb_width_pct_rank / self.squeeze_percentile;
            return (Regime::Squeeze, confidence.clamp(0.0, 1.0));
        }

        if bundle.ema20_slope_pct.abs() < self.flat_slope_pct
            && bundle.ema50_slope_pct.abs() < self.flat_slope_pct
        {
            let confidence = (1.0 - bundle.adx / self.adx_threshold).clamp(0.0, 1.0);
            return (Regime::Range, confidence);
        }

        let confidence = (1.0 - bundle.adx / self.adx_threshold).clamp(0.0, 1.0);
        (Regime::Chop, confidence)
    }

    /// Higher-timeframe bias from the 4h bundle: bullish iff close sits
    /// above an upward-stacked EMA50/EMA200, mirrored for bearish.
    pub fn bias(&self, bundle: &IndicatorBundle) -> Bias {
        if bundle.last_close > bundle.ema50 && bundle.ema50 > bundle.ema200 {
            Bias::Bullish
        } else if bundle.last_close < bundle.ema50 && bundle.ema50 < bundle.ema200 {
            Bias::Bearish
        } else {
            Bias::Neutral
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bundle() -> IndicatorBundle {
        IndicatorBundle {
            newest_close_time: Utc::now(),
            last_close: 100.0,
            atr: 1.0,
            atr_pct_rank: 50.0,
            atr_mean_recent: 1.0,
            adx: 10.0,
            ema20: 100.0,
            ema50: 100.0,
            ema200: 100.0,
            ema20_slope_pct: 0.0,
            ema50_slope_pct: 0.0,
            ema200_slope_pct: 0.0,
            bb_mid: 100.0,
            bb_upper: 102.0,
            bb_lower: 98.0,
            bb_width_pct_rank: 60.0,
            squeeze_contained: false,
            donchian_high: 105.0,
            donchian_low: 95.0,
            rsi: 50.0,
            vol_mean20: 100.0,
            vol_median20: 100.0,
            last_volume: 100.0,
            vwap: 100.0,
        }
    }

    #[test]
    fn trend_detected_on_adx_and_slope() {
        let mut b = bundle();
        b.adx = 28.0;
        b.ema200_slope_pct = 0.05;
        let (regime, confidence) = RegimeDetector::default().detect(&b);
        assert_eq!(regime, Regime::Trend);
        assert!(confidence > 0.0 && confidence <= 1.0);
    }

    #[test]
    fn trend_outranks_squeeze_when_both_hold() {
        // Tie-break order: a bundle satisfying TREND and SQUEEZE inputs
        // must classify as TREND.
        let mut b = bundle();
        b.adx = 30.0;
        b.ema200_slope_pct = 0.05;
        b.bb_width_pct_rank = 5.0;
        b.squeeze_contained = true;
        let (regime, _) = RegimeDetector::default().detect(&b);
        assert_eq!(regime, Regime::Trend);
    }

    #[test]
    fn squeeze_outranks_range() {
        let mut b = bundle();
        b.bb_width_pct_rank = 10.0;
        b.squeeze_contained = true;
        // Flat EMAs would also satisfy RANGE.
        b.ema20_slope_pct = 0.0;
        b.ema50_slope_pct = 0.0;
        let (regime, _) = RegimeDetector::default().detect(&b);
        assert_eq!(regime, Regime::Squeeze);
    }

    #[test]
    fn flat_emas_without_squeeze_are_range() {
        let b = bundle();
        let (regime, _) = RegimeDetector::default().detect(&b);
        assert_eq!(regime, Regime::Range);
    }

    #[test]
    fn sloped_emas_with_low_adx_are_chop() {
        let mut b = bundle();
        b.ema20_slope_pct = 0.2;
        let (regime, _) = RegimeDetector::default().detect(&b);
        assert_eq!(regime, Regime::Chop);
    }

    #[test]
    fn bias_requires_stacked_emas() {
        let detector = RegimeDetector::default();
        let mut b = bundle();
        b.last_close = 110.0;
        b.ema50 = 105.0;
        b.ema200 = 100.0;
        assert_eq!(detector.bias(&b), Bias::Bullish);

        b.last_close = 90.0;
        b.ema50 = 95.0;
        b.ema200 = 100.0;
        assert_eq!(detector.bias(&b), Bias::Bearish);

        b.last_close = 101.0;
        b.ema50 = 95.0;
        assert_eq!(detector.bias(&b), Bias::Neutral);
    }
}
