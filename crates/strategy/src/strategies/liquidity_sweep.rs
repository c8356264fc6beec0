use common::{Direction, FactorFlags, Proposal, StrategyCategory, Timeframe};

use crate::indicators::recent_extremes;
use crate::{EvalContext, Strategy};

/// Stop-hunt fade: a wick pricks a recent extreme and the bar closes back
/// inside on elevated volume. The fade targets a return to the swept
/// level and beyond.
pub struct LiquiditySweep {
    lookback: usize,
    sweep_min_atr: f64,
    sweep_max_atr: f64,
    sweep_min_pct: f64,
    sweep_max_pct: f64,
    volume_mult: f64,
    wick_buffer_atr: f64,
}

impl Default for LiquiditySweep {
    fn default() -> Self {
        Self {
            lookback: 50,
            sweep_min_atr: 0.1,
            sweep_max_atr: 0.3,
            sweep_min_pct: 0.001,
            sweep_max_pct: 0.002,
            volume_mult: 1.5,
            wick_buffer_atr: 0.25,
        }
    }
}

impl LiquiditySweep {
    fn prick_in_band(&self, prick: f64, level: f64, atr: f64) -> bool {
        if prick <= 0.0 || level <= 0.0 {
            return false;
        }
        let in_atr = prick >= self.sweep_min_atr * atr && prick <= self.sweep_max_atr * atr;
        let pct = prick / level;
        let in_pct = pct >= self.sweep_min_pct && pct <= self.sweep_max_pct;
        in_atr || in_pct
    }
}

impl Strategy for LiquiditySweep {
    fn name(&self) -> &'static str {
        "Liquidity Sweep"
    }

    fn timeframe(&self) -> Timeframe {
        Timeframe::M15
    }

    fn category(&self) -> StrategyCategory {
        StrategyCategory::MeanReversion
    }

    fn evaluate(&self, ctx: &EvalContext) -> Option<Proposal> {
        let candles = ctx.candles_15m;
        let last = candles.last()?;
        let atr = ctx.bundle_15m.atr;
        if atr <= 0.0 {
            return None;
        }
        let (recent_high, recent_low) = recent_extremes(candles, self.lookback)?;

        let volume_ok = last.volume > self.volume_mult * ctx.bundle_15m.vol_median20;
        if !volume_ok {
            return None;
        }

        // Sweep of the high with a reclaim back below: fade SHORT.
        let prick_up = last.high - recent_high;
        if self.prick_in_band(prick_up, recent_high, atr) && last.close < recent_high {
            let entry = last.close;
            let proposal = Proposal {
                strategy: self.name(),
                category: self.category(),
                timeframe: self.timeframe(),
                direction: Direction::Short,
                entry,
                sl: last.high + self.wick_buffer_atr * atr,
                tp1: recent_high - 0.5 * atr,
                tp2: Some(recent_high - 1.5 * atr),
                tp3: None,
                base_score: 2.5,
                factors: FactorFlags {
                    pattern: true,
                    volume_surge: true,
                    zone_confluence: ctx
                        .zones
                        .confluence_within(Timeframe::M15, recent_high, 0.5 * atr)
                        .is_some(),
                },
            };
            if proposal.levels_ordered() {
                return Some(proposal);
            }
        }

        // Sweep of the low with a reclaim back above: fade LONG.
        let prick_down = recent_low - last.low;
        if self.prick_in_band(prick_down, recent_low, atr) && last.close > recent_low {
            let entry = last.close;
            let proposal = Proposal {
                strategy: self.name(),
                category: self.category(),
                timeframe: self.timeframe(),
                direction: Direction::Long,
                entry,
                sl: last.low - self.wick_buffer_atr * atr,
                tp1: recent_low + 0.5 * atr,
                tp2: Some(recent_low + 1.5 * atr),
                tp3: None,
                base_score: 2.5,
                factors: FactorFlags {
                    pattern: true,
                    volume_surge: true,
                    zone_confluence: ctx
                        .zones
                        .confluence_within(Timeframe::M15, recent_low, 0.5 * atr)
                        .is_some(),
                },
            };
            if proposal.levels_ordered() {
                return Some(proposal);
            }
        }

        None
    }
}
