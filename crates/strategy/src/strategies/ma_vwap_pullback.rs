use common::{Bias, Direction, FactorFlags, Proposal, Regime, StrategyCategory, Timeframe};

use crate::indicators::last_impulse;
use crate::{EvalContext, Strategy};

/// 4h trend-continuation entry: a pullback into the EMA20/VWAP band that
/// retraces a Fibonacci share of the last impulse and rejects back in the
/// trend direction.
pub struct MaVwapPullback {
    fib_min: f64,
    fib_max: f64,
    band_tolerance_atr: f64,
    impulse_lookback: usize,
    sl_buffer_atr: f64,
}

impl Default for MaVwapPullback {
    fn default() -> Self {
        Self {
            fib_min: 0.382,
            fib_max: 0.618,
            band_tolerance_atr: 0.25,
            impulse_lookback: 40,
            sl_buffer_atr: 0.5,
        }
    }
}

impl Strategy for MaVwapPullback {
    fn name(&self) -> &'static str {
        "MA/VWAP Pullback"
    }

    fn timeframe(&self) -> Timeframe {
        Timeframe::H4
    }

    fn category(&self) -> StrategyCategory {
        StrategyCategory::Pullback
    }

    fn evaluate(&self, ctx: &EvalContext) -> Option<Proposal> {
        if ctx.regime != Regime::Trend {
            return None;
        }
        let bundle = ctx.bundle_4h?;
        let candles = ctx.candles_4h;
        let last = candles.last()?;
        let atr = bundle.atr;
        if atr <= 0.0 {
            return None;
        }

        let band_low = bundle.ema20.min(bundle.vwap);
        let band_high = bundle.ema20.max(bundle.vwap);
        let tolerance = self.band_tolerance_atr * atr;

        let (swing_low, swing_high, up_leg) = last_impulse(candles, self.impulse_lookback)?;
        let leg = swing_high - swing_low;
        if leg <= 0.0 {
            return None;
        }

        if ctx.bias == Bias::Bullish && up_leg && bundle.ema20 > bundle.ema50 {
            let retrace = (swing_high - last.low) / leg;
            let touched =
                last.low <= band_high + tolerance && last.low >= band_low - tolerance;
            let rejected = last.close > band_high && last.is_bullish();
            if (self.fib_min..=self.fib_max).contains(&retrace) && touched && rejected {
                let entry = last.close;
                let sl = last.low - self.sl_buffer_atr * atr;
                let risk = entry - sl;
                let proposal = Proposal {
                    strategy: self.name(),
                    category: self.category(),
                    timeframe: self.timeframe(),
                    direction: Direction::Long,
                    entry,
                    sl,
                    tp1: swing_high,
                    tp2: Some(entry + 2.0 * risk),
                    tp3: None,
                    base_score: 3.0,
                    factors: FactorFlags {
                        pattern: true,
                        zone_confluence: ctx
                            .zones
                            .confluence_within(Timeframe::H4, entry, 0.5 * atr)
                            .is_some(),
                        volume_surge: last.volume > bundle.vol_mean20,
                    },
                };
                if proposal.levels_ordered() {
                    return Some(proposal);
                }
            }
        }

        if ctx.bias == Bias::Bearish && !up_leg && bundle.ema20 < bundle.ema50 {
            let retrace = (last.high - swing_low) / leg;
            let touched =
                last.high >= band_low - tolerance && last.high <= band_high + tolerance;
            let rejected = last.close < band_low && !last.is_bullish();
            if (self.fib_min..=self.fib_max).contains(&retrace) && touched && rejected {
                let entry = last.close;
                let sl = last.high + self.sl_buffer_atr * atr;
                let risk = sl - entry;
                let proposal = Proposal {
                    strategy: self.name(),
                    category: self.category(),
                    timeframe: self.timeframe(),
                    direction: Direction::Short,
                    entry,
                    sl,
                    tp1: swing_low,
                    tp2: Some(entry - 2.0 * risk),
                    tp3: None,
                    base_score: 3.0,
                    factors: FactorFlags {
                        pattern: true,
                        zone_confluence: ctx
                            .zones
                            .confluence_within(Timeframe::H4, entry, 0.5 * atr)
                            .is_some(),
                        volume_surge: last.volume > bundle.vol_mean20,
                    },
                };
                if proposal.levels_ordered() {
                    return Some(proposal);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::IndicatorBundle;
    use crate::strategies::testutil::{bar_at, flat_series, rising_series, Fixture};

    /// Rising 4h series whose final bar dips into the EMA20 region and
    /// closes back above it.
    fn pullback_fixture() -> Fixture {
        let mut candles_4h = rising_series(300, 100.0, 0.5);
        let n = candles_4h.len();
        let peak = 100.0 + (n - 2) as f64 * 0.5 + 0.6; // prior bar high

        let bundle = IndicatorBundle::compute(&candles_4h).unwrap();
        // Swing leg spans the impulse lookback; 0.4 retrace of the last
        // ~20-point leg lands a dip of ~8 below the peak.
        let dip = peak - 8.0;
        let close = bundle.ema20.max(bundle.vwap) + 0.5;
        candles_4h[n - 1] = bar_at(n - 1, close - 1.5, close + 0.3, dip, close, 150.0);

        let mut fixture = Fixture::new(flat_series(300, close)).with_candles_4h(candles_4h);
        fixture.regime = Regime::Trend;
        fixture.bias = Bias::Bullish;
        fixture
    }

    #[test]
    fn pullback_into_band_continues_long() {
        let fixture = pullback_fixture();
        let proposal = MaVwapPullback::default()
            .evaluate(&fixture.ctx())
            .expect("trend pullback should propose");
        assert_eq!(proposal.direction, Direction::Long);
        assert_eq!(proposal.timeframe, Timeframe::H4);
        assert!(proposal.levels_ordered());
        assert!(proposal.tp1 > proposal.entry);
    }

    #[test]
    fn requires_trend_regime_and_bias() {
        let mut fixture = pullback_fixture();
        fixture.regime = Regime::Range;
        assert!(MaVwapPullback::default().evaluate(&fixture.ctx()).is_none());

        let mut fixture = pullback_fixture();
        fixture.bias = Bias::Neutral;
        assert!(MaVwapPullback::default().evaluate(&fixture.ctx()).is_none());
    }

    #[test]
    fn shallow_retrace_is_not_a_pullback() {
        let mut fixture = pullback_fixture();
        let n = fixture.candles_4h.len();
        let last = fixture.candles_4h[n - 1].clone();
        // Barely off the highs: retrace under 38.2%.
        fixture.candles_4h[n - 1] =
            bar_at(n - 1, last.open, last.high, last.close - 1.0, last.close, 150.0);
        fixture.bundle_4h = IndicatorBundle::compute(&fixture.candles_4h);
        assert!(MaVwapPullback::default().evaluate(&fixture.ctx()).is_none());
    }
}
