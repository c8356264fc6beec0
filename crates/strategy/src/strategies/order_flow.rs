use common::{Direction, FactorFlags, Proposal, Regime, StrategyCategory, Timeframe};

use crate::indicators::volume_profile;
use crate::{EvalContext, Strategy};

/// Sustained depth imbalance with CVD agreement near a value-area edge,
/// inside a squeeze. Smart-money accumulation ahead of the expansion.
pub struct OrderFlow {
    imbalance_long_max: f64,
    imbalance_short_min: f64,
    va_tolerance_atr: f64,
    profile_bars: usize,
    bins: usize,
}

impl Default for OrderFlow {
    fn default() -> Self {
        Self {
            imbalance_long_max: 0.90,
            imbalance_short_min: 1.10,
            va_tolerance_atr: 0.25,
            profile_bars: 96,
            bins: 24,
        }
    }
}

impl Strategy for OrderFlow {
    fn name(&self) -> &'static str {
        "Order Flow"
    }

    fn timeframe(&self) -> Timeframe {
        Timeframe::M15
    }

    fn category(&self) -> StrategyCategory {
        StrategyCategory::Breakout
    }

    fn evaluate(&self, ctx: &EvalContext) -> Option<Proposal> {
        if ctx.regime != Regime::Squeeze {
            return None;
        }
        let imbalance = ctx.depth_imbalance?;
        let cvd = ctx.cvd?;

        let candles = ctx.candles_15m;
        let last = candles.last()?;
        let atr = ctx.bundle_15m.atr;
        let tail_start = candles.len().saturating_sub(self.profile_bars);
        let profile = volume_profile(&candles[tail_start..], self.bins)?;

        let tolerance = self.va_tolerance_atr * atr;

        // Bid-side pressure + positive delta at the value-area low.
        if imbalance <= self.imbalance_long_max
            && cvd.last > 0.0
            && (last.close - profile.val).abs() <= tolerance
        {
            let entry = last.close;
            let proposal = Proposal {
                strategy: self.name(),
                category: self.category(),
                timeframe: self.timeframe(),
                direction: Direction::Long,
                entry,
                sl: profile.val - 0.75 * atr,
                tp1: profile.poc,
                tp2: Some(profile.vah),
                tp3: None,
                base_score: 2.5,
                factors: FactorFlags {
                    pattern: false,
                    zone_confluence: false,
                    volume_surge: last.volume > ctx.bundle_15m.vol_mean20,
                },
            };
            if proposal.levels_ordered() {
                return Some(proposal);
            }
        }

        // Ask-side pressure + negative delta at the value-area high.
        if imbalance >= self.imbalance_short_min
            && cvd.last < 0.0
            && (last.close - profile.vah).abs() <= tolerance
        {
            let entry = last.close;
            let proposal = Proposal {
                strategy: self.name(),
                category: self.category(),
                timeframe: self.timeframe(),
                direction: Direction::Short,
                entry,
                sl: profile.vah + 0.75 * atr,
                tp1: profile.poc,
                tp2: Some(profile.val),
                tp3: None,
                base_score: 2.5,
                factors: FactorFlags {
                    pattern: false,
                    zone_confluence: false,
                    volume_surge: last.volume > ctx.bundle_15m.vol_mean20,
                },
            };
            if proposal.levels_ordered() {
                return Some(proposal);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::testutil::{bar_at, Fixture};
    use crate::CvdFacts;

    /// Value builds around 105 with wings at 100/110; price sits near the
    /// lower edge of the value area on the final bar.
    fn squeeze_fixture() -> Fixture {
        let mut candles = Vec::new();
        for i in 0..300usize {
            let price = match i % 10 {
                0 => 100.0,
                1 | 2 => 103.5,
                9 => 110.0,
                _ => 105.0,
            };
            let volume = if price == 105.0 { 200.0 } else { 50.0 };
            candles.push(bar_at(i, price, price + 0.5, price - 0.5, price, volume));
        }
        // Final bar at the value-area low.
        let n = candles.len();
        candles[n - 1] = bar_at(n - 1, 103.6, 104.0, 103.2, 103.6, 220.0);
        let mut fixture = Fixture::new(candles);
        fixture.rebuild_bundle();
        fixture.regime = Regime::Squeeze;
        fixture.depth_imbalance = Some(0.8);
        fixture.cvd = Some(CvdFacts {
            last: 500.0,
            divergence_15m: None,
            divergence_1h: None,
        });
        fixture
    }

    #[test]
    fn bid_pressure_at_val_goes_long() {
        let mut fixture = squeeze_fixture();
        // Pin the final close onto the value-area low the strategy will
        // see. One relaxation pass is enough: the close only moves the
        // histogram within its own bin.
        for _ in 0..3 {
            let n = fixture.candles_15m.len();
            let profile = volume_profile(&fixture.candles_15m[n - 96..], 24).unwrap();
            let val = profile.val;
            fixture.candles_15m[n - 1] = bar_at(n - 1, val, val + 0.4, val - 0.4, val, 220.0);
        }
        fixture.rebuild_bundle();

        let proposal = OrderFlow::default()
            .evaluate(&fixture.ctx())
            .expect("imbalance + CVD at VAL should propose");
        assert_eq!(proposal.direction, Direction::Long);
        assert!(proposal.levels_ordered());
        assert!(proposal.tp1 > proposal.entry, "TP1 targets the POC above");
    }

    #[test]
    fn requires_squeeze_regime() {
        let mut fixture = squeeze_fixture();
        fixture.regime = Regime::Trend;
        assert!(OrderFlow::default().evaluate(&fixture.ctx()).is_none());
    }

    #[test]
    fn requires_order_book_and_flow_facts() {
        let mut fixture = squeeze_fixture();
        fixture.depth_imbalance = None;
        assert!(OrderFlow::default().evaluate(&fixture.ctx()).is_none());

        let mut fixture = squeeze_fixture();
        fixture.cvd = None;
        assert!(OrderFlow::default().evaluate(&fixture.ctx()).is_none());
    }

    #[test]
    fn ask_dominance_against_longs_is_rejected() {
        let mut fixture = squeeze_fixture();
        fixture.depth_imbalance = Some(1.05); // neither side dominates
        assert!(OrderFlow::default().evaluate(&fixture.ctx()).is_none());
    }
}
