use common::{Direction, FactorFlags, Proposal, Regime, StrategyCategory, Timeframe};

use crate::indicators::{atr_series, median};
use crate::{EvalContext, Strategy};

/// Impulse continuation: a bar whose body clears a multiple of the median
/// ATR, confirmed by a follow-through close in the same direction.
pub struct AtrMomentum {
    impulse_mult: f64,
    atr_median_bars: usize,
    volume_mult: f64,
}

impl Default for AtrMomentum {
    fn default() -> Self {
        Self {
            impulse_mult: 1.4,
            atr_median_bars: 20,
            volume_mult: 1.5,
        }
    }
}

impl Strategy for AtrMomentum {
    fn name(&self) -> &'static str {
        "ATR Momentum"
    }

    fn timeframe(&self) -> Timeframe {
        Timeframe::M15
    }

    fn category(&self) -> StrategyCategory {
        StrategyCategory::Momentum
    }

    fn evaluate(&self, ctx: &EvalContext) -> Option<Proposal> {
        if ctx.regime != Regime::Trend {
            return None;
        }
        let candles = ctx.candles_15m;
        if candles.len() < self.atr_median_bars + 2 {
            return None;
        }
        let impulse = &candles[candles.len() - 2];
        let follow = candles.last()?;
        let atr = ctx.bundle_15m.atr;

        let series = atr_series(candles, 14);
        let tail = &series[series.len() - self.atr_median_bars..];
        let median_atr = median(tail);
        if median_atr <= 0.0 || impulse.body() < self.impulse_mult * median_atr {
            return None;
        }

        let direction = if impulse.is_bullish() {
            Direction::Long
        } else {
            Direction::Short
        };
        let followed_through = match direction {
            Direction::Long => follow.close > impulse.close && follow.is_bullish(),
            Direction::Short => follow.close < impulse.close && !follow.is_bullish(),
        };
        if !followed_through {
            return None;
        }

        let entry = follow.close;
        // The impulse midpoint is the line momentum must defend.
        let midpoint = (impulse.open + impulse.close) / 2.0;
        let sl = midpoint;
        let proposal = Proposal {
            strategy: self.name(),
            category: self.category(),
            timeframe: self.timeframe(),
            direction,
            entry,
            sl,
            tp1: entry + direction.sign() * 1.5 * atr,
            tp2: Some(entry + direction.sign() * 3.0 * atr),
            tp3: None,
            base_score: 2.8,
            factors: FactorFlags {
                pattern: true,
                zone_confluence: false,
                volume_surge: impulse.volume > self.volume_mult * ctx.bundle_15m.vol_median20,
            },
        };
        proposal.levels_ordered().then_some(proposal)
    }
}
