use common::{Direction, FactorFlags, Proposal, Regime, StrategyCategory, Timeframe, Zone};

use crate::{EvalContext, Strategy};

/// Body break of an S/R zone followed by a return to the zone and a
/// rejection in the break direction. Runs only where breakouts carry:
/// TREND and SQUEEZE.
pub struct BreakRetest {
    break_lookback: usize,
    buffer_atr: f64,
    volume_mult: f64,
}

impl Default for BreakRetest {
    fn default() -> Self {
        Self {
            break_lookback: 10,
            buffer_atr: 0.25,
            volume_mult: 1.2,
        }
    }
}

impl BreakRetest {
    /// Index of the bar (within the retest window, excluding the last
    /// bar) whose body first closed beyond the zone in `direction`.
    fn find_break(
        &self,
        candles: &[common::Candle],
        zone: &Zone,
        direction: Direction,
    ) -> Option<usize> {
        let end = candles.len().checked_sub(1)?;
        let start = end.saturating_sub(self.break_lookback);
        for i in start.max(1)..end {
            let crossed = match direction {
                Direction::Long => {
                    candles[i].close > zone.high && candles[i - 1].close <= zone.high
                }
                Direction::Short => {
                    candles[i].close < zone.low && candles[i - 1].close >= zone.low
                }
            };
            if crossed {
                return Some(i);
            }
        }
        None
    }

    fn propose(
        &self,
        ctx: &EvalContext,
        zone: &Zone,
        direction: Direction,
    ) -> Option<Proposal> {
        let candles = ctx.candles_15m;
        let last = candles.last()?;
        let atr = ctx.bundle_15m.atr;

        self.find_break(candles, zone, direction)?;

        let rejected = match direction {
            // Former resistance retested as support.
            Direction::Long => {
                last.low <= zone.high && last.close > zone.high && last.is_bullish()
            }
            // Former support retested as resistance.
            Direction::Short => {
                last.high >= zone.low && last.close < zone.low && !last.is_bullish()
            }
        };
        if !rejected {
            return None;
        }

        let entry = last.close;
        let sl = match direction {
            Direction::Long => zone.low - self.buffer_atr * atr,
            Direction::Short => zone.high + self.buffer_atr * atr,
        };
        let risk = (entry - sl).abs();
        if risk <= 0.0 {
            return None;
        }
        let tp1 = entry + direction.sign() * risk;
        let tp2 = entry + direction.sign() * 2.0 * risk;

        let proposal = Proposal {
            strategy: self.name(),
            category: self.category(),
            timeframe: self.timeframe(),
            direction,
            entry,
            sl,
            tp1,
            tp2: Some(tp2),
            tp3: None,
            base_score: 3.0,
            factors: FactorFlags {
                pattern: true,
                zone_confluence: true,
                volume_surge: last.volume > self.volume_mult * ctx.bundle_15m.vol_mean20,
            },
        };
        proposal.levels_ordered().then_some(proposal)
    }
}

impl Strategy for BreakRetest {
    fn name(&self) -> &'static str {
        "Break & Retest"
    }

    fn timeframe(&self) -> Timeframe {
        Timeframe::M15
    }

    fn category(&self) -> StrategyCategory {
        StrategyCategory::Breakout
    }

    fn evaluate(&self, ctx: &EvalContext) -> Option<Proposal> {
        if !matches!(ctx.regime, Regime::Trend | Regime::Squeeze) {
            return None;
        }

        let zones = ctx
            .zones
            .m15
            .iter()
            .chain(ctx.zones.h1.iter());
        for zone in zones {
            if let Some(p) = self.propose(ctx, zone, Direction::Long) {
                return Some(p);
            }
            if let Some(p) = self.propose(ctx, zone, Direction::Short) {
                return Some(p);
            }
        }
        None
    }
}
