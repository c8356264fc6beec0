use common::{Candle, Direction, FactorFlags, Proposal, StrategyCategory, Timeframe};

use crate::indicators::{volume_profile, VolumeProfile};
use crate::{EvalContext, Strategy};

/// Value-area plays from a rolling volume profile: fade a rejection at
/// VAH/VAL back toward the POC, or join an acceptance breakout once
/// consecutive closes hold beyond the area.
pub struct VolumeProfileStrategy {
    profile_bars: usize,
    bins: usize,
    /// Minimum rejection wick as a fraction of the bar range.
    wick_frac: f64,
    accept_closes: usize,
    sl_buffer_atr: f64,
}

impl Default for VolumeProfileStrategy {
    fn default() -> Self {
        Self {
            profile_bars: 96,
            bins: 24,
            wick_frac: 0.3,
            accept_closes: 2,
            sl_buffer_atr: 0.25,
        }
    }
}

impl VolumeProfileStrategy {
    fn fade(&self, ctx: &EvalContext, profile: &VolumeProfile, last: &Candle) -> Option<Proposal> {
        let atr = ctx.bundle_15m.atr;
        let range = last.range();
        if range <= 0.0 {
            return None;
        }

        // Rejection at the value-area high: wick above, close back inside.
        if last.high >= profile.vah
            && last.close < profile.vah
            && last.upper_wick() >= self.wick_frac * range
        {
            let proposal = Proposal {
                strategy: self.name(),
                category: self.category(),
                timeframe: self.timeframe(),
                direction: Direction::Short,
                entry: last.close,
                sl: last.high + self.sl_buffer_atr * atr,
                tp1: profile.poc,
                tp2: Some(profile.val),
                tp3: None,
                base_score: 2.5,
                factors: FactorFlags {
                    pattern: true,
                    zone_confluence: false,
                    volume_surge: last.volume > ctx.bundle_15m.vol_mean20,
                },
            };
            if proposal.levels_ordered() {
                return Some(proposal);
            }
        }

        // Rejection at the value-area low.
        if last.low <= profile.val
            && last.close > profile.val
            && last.lower_wick() >= self.wick_frac * range
        {
            let proposal = Proposal {
                strategy: self.name(),
                category: self.category(),
                timeframe: self.timeframe(),
                direction: Direction::Long,
                entry: last.close,
                sl: last.low - self.sl_buffer_atr * atr,
                tp1: profile.poc,
                tp2: Some(profile.vah),
                tp3: None,
                base_score: 2.5,
                factors: FactorFlags {
                    pattern: true,
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

    fn acceptance(
        &self,
        ctx: &EvalContext,
        profile: &VolumeProfile,
        candles: &[Candle],
    ) -> Option<Proposal> {
        let atr = ctx.bundle_15m.atr;
        let last = candles.last()?;
        if candles.len() < self.accept_closes {
            return None;
        }
        let tail = &candles[candles.len() - self.accept_closes..];

        let direction = if tail.iter().all(|c| c.close > profile.vah) {
            Direction::Long
        } else if tail.iter().all(|c| c.close < profile.val) {
            Direction::Short
        } else {
            return None;
        };

        let entry = last.close;
        let sl = match direction {
            Direction::Long => profile.vah - self.sl_buffer_atr * atr,
            Direction::Short => profile.val + self.sl_buffer_atr * atr,
        };
        let risk = (entry - sl).abs();
        if risk <= 0.0 {
            return None;
        }

        let proposal = Proposal {
            strategy: self.name(),
            category: self.category(),
            timeframe: self.timeframe(),
            direction,
            entry,
            sl,
            tp1: entry + direction.sign() * risk,
            tp2: Some(entry + direction.sign() * 2.0 * risk),
            tp3: None,
            base_score: 2.5,
            factors: FactorFlags {
                pattern: false,
                zone_confluence: false,
                volume_surge: last.volume > ctx.bundle_15m.vol_mean20,
            },
        };
        proposal.levels_ordered().then_some(proposal)
    }
}

impl Strategy for VolumeProfileStrategy {
    fn name(&self) -> &'static str {
        "Volume Profile"
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
        let tail_start = candles.len().saturating_sub(self.profile_bars);
        let profile = volume_profile(&candles[tail_start..], self.bins)?;

        self.fade(ctx, &profile, last)
            .or_else(|| self.acceptance(ctx, &profile, candles))
    }
}
