use serde::Serialize;
use tracing::debug;

use common::config::ScorerSettings;
use common::{Direction, Proposal, Regime, StrategyCategory};

use crate::EvalContext;

/// One scoring decision, journaled whether the proposal survived or not.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreDecision {
    pub symbol: String,
    pub strategy: String,
    pub direction: Direction,
    pub factor_count: u8,
    pub regime: Regime,
    pub regime_weight: f64,
    pub base_score: f64,
    pub final_score: f64,
    pub accepted: bool,
    pub reject_reason: Option<String>,
}

/// A proposal that cleared every gate, with its final score.
#[derive(Debug, Clone)]
pub struct ScoredProposal {
    pub proposal: Proposal,
    pub final_score: f64,
    pub factor_count: u8,
}

/// Converts the cycle's raw proposals for one symbol into at most one
/// committed candidate per (direction, strategy).
pub struct SignalScorer {
    cfg: ScorerSettings,
}

impl SignalScorer {
    pub fn new(cfg: ScorerSettings) -> Self {
        SignalScorer { cfg }
    }

    /// Per-(regime, strategy) multiplier. Below 0.5 the strategy is
    /// blocked outright in that regime.
    pub fn regime_weight(regime: Regime, strategy: &str) -> f64 {
        match regime {
            Regime::Trend => match strategy {
                "Break & Retest" => 1.5,
                "MA/VWAP Pullback" => 1.3,
                "ATR Momentum" => 1.3,
                "Volume Profile" => 0.8,
                "Liquidity Sweep" => 0.9,
                _ => 1.0,
            },
            Regime::Range => match strategy {
                "Volume Profile" => 1.5,
                "Liquidity Sweep" => 1.3,
                "Break & Retest" => 0.8,
                "MA/VWAP Pullback" => 0.9,
                "ATR Momentum" => 0.7,
                _ => 1.0,
            },
            Regime::Squeeze => match strategy {
                "Order Flow" => 1.5,
                "Break & Retest" => 1.2,
                "MA/VWAP Pullback" => 0.9,
                "ATR Momentum" => 0.9,
                _ => 1.0,
            },
            Regime::Chop => match strategy {
                "Volume Profile" => 0.8,
                _ => 0.6,
            },
            Regime::Undecided => 1.0,
        }
    }

    /// Volume bar a confirming bar must clear, per regime.
    fn volume_mult(regime: Regime) -> f64 {
        match regime {
            Regime::Trend => 1.5,
            Regime::Squeeze => 1.2,
            Regime::Range => 1.3,
            Regime::Chop | Regime::Undecided => 1.5,
        }
    }

    fn category_matches(regime: Regime, category: StrategyCategory) -> bool {
        matches!(
            (regime, category),
            (Regime::Trend, StrategyCategory::Momentum)
                | (Regime::Trend, StrategyCategory::Pullback)
                | (Regime::Squeeze, StrategyCategory::Breakout)
                | (Regime::Range, StrategyCategory::MeanReversion)
        )
    }

    /// Count confirming factors: the proposal itself, HTF EMA alignment,
    /// volume, flow agreement (CVD or ΔOI), the price-action pattern
    /// flag, and S/R confluence.
    fn factor_count(&self, ctx: &EvalContext, proposal: &Proposal) -> u8 {
        let mut count: u8 = 1; // the proposal itself

        let long = proposal.direction == Direction::Long;
        let htf_aligned = ctx
            .bundle_4h
            .or(ctx.bundle_1h)
            .map(|b| b.ema_aligned(long))
            .unwrap_or(false);
        if htf_aligned {
            count += 1;
        }

        let trigger_bundle = ctx.bundle(proposal.timeframe).unwrap_or(ctx.bundle_15m);
        let volume_ok = proposal.factors.volume_surge
            || trigger_bundle.last_volume
                >= Self::volume_mult(ctx.regime) * trigger_bundle.vol_mean20;
        if volume_ok {
            count += 1;
        }

        let flow_ok = ctx
            .cvd
            .map(|c| (long && c.last > 0.0) || (!long && c.last < 0.0))
            .unwrap_or(false)
            || ctx
                .oi_delta_pct
                .map(|doi| (1.0..=3.0).contains(&doi.abs()) && doi > 0.0)
                .unwrap_or(false);
        if flow_ok {
            count += 1;
        }

        if proposal.factors.pattern {
            count += 1;
        }

        let zone_ok = proposal.factors.zone_confluence
            || ctx
                .zones
                .confluence_within(
                    proposal.timeframe,
                    proposal.entry,
                    0.5 * trigger_bundle.atr,
                )
                .is_some();
        if zone_ok {
            count += 1;
        }

        count
    }

    /// Run the full pipeline for one proposal. The decision carries the
    /// outcome either way.
    pub fn score_one(&self, ctx: &EvalContext, proposal: &Proposal) -> ScoreDecision {
        let mut decision = ScoreDecision {
            symbol: ctx.symbol.to_string(),
            strategy: proposal.strategy.to_string(),
            direction: proposal.direction,
            factor_count: 0,
            regime: ctx.regime,
            regime_weight: 0.0,
            base_score: proposal.base_score,
            final_score: 0.0,
            accepted: false,
            reject_reason: None,
        };

        // 1. Multi-factor gate.
        let factors = self.factor_count(ctx, proposal);
        decision.factor_count = factors;
        if factors < self.cfg.min_factors {
            decision.reject_reason = Some(format!(
                "factors {factors} below minimum {}",
                self.cfg.min_factors
            ));
            return decision;
        }

        // 2. Regime weighting.
        let weight = Self::regime_weight(ctx.regime, proposal.strategy);
        decision.regime_weight = weight;
        if weight < 0.5 {
            decision.reject_reason =
                Some(format!("regime weight {weight:.2} blocks strategy"));
            return decision;
        }
        let mut score = proposal.base_score * weight;

        // 3. BTC filter: penalize fighting the majors.
        if let Some(btc_dir) = ctx.btc.direction(self.cfg.btc_noise_pct) {
            if btc_dir == proposal.direction.opposite() {
                score -= self.cfg.btc_penalty;
            }
        }

        // 4. CVD divergence bonus (15m + 1h agreement pays the most).
        if let Some(cvd) = ctx.cvd {
            let d15 = cvd.divergence_15m == Some(proposal.direction);
            let d1h = cvd.divergence_1h == Some(proposal.direction);
            score += match (d15, d1h) {
                (true, true) => 0.8,
                (true, false) | (false, true) => 0.3,
                (false, false) => 0.0,
            };
        }

        // 5. ADX / RSI / volatility refinements.
        if ctx.regime == Regime::Trend {
            let adx = ctx.bundle_1h.map(|b| b.adx).unwrap_or(ctx.bundle_15m.adx);
            if adx > 30.0 {
                score += 1.0;
            }
        }
        if proposal.category == StrategyCategory::MeanReversion {
            let rsi = ctx.bundle_15m.rsi;
            let extreme_reversal = (proposal.direction == Direction::Long && rsi <= 30.0)
                || (proposal.direction == Direction::Short && rsi >= 70.0);
            if extreme_reversal {
                score += 0.5;
            }
        }
        if Self::category_matches(ctx.regime, proposal.category) {
            score += 1.0;
        }
        if ctx.bundle_15m.atr > 2.0 * ctx.bundle_15m.atr_mean_recent {
            score -= 0.5;
        }

        decision.final_score = score;

        // 6. Entry threshold.
        if score < self.cfg.enter_threshold {
            decision.reject_reason = Some(format!(
                "score {score:.2} below threshold {:.2}",
                self.cfg.enter_threshold
            ));
            return decision;
        }

        decision.accepted = true;
        decision
    }

    /// Score every proposal of the cycle and resolve conflicts: within
    /// (direction, strategy) only the highest-scored survivor commits.
    /// Different strategies win independently; LONG and SHORT coexist.
    pub fn score_cycle(
        &self,
        ctx: &EvalContext,
        proposals: Vec<Proposal>,
    ) -> (Vec<ScoredProposal>, Vec<ScoreDecision>) {
        let mut decisions = Vec::with_capacity(proposals.len());
        let mut winners: Vec<ScoredProposal> = Vec::new();

        for proposal in proposals {
            let decision = self.score_one(ctx, &proposal);
            debug!(
                symbol = %decision.symbol,
                strategy = %decision.strategy,
                direction = %decision.direction,
                factors = decision.factor_count,
                score = decision.final_score,
                accepted = decision.accepted,
                "scoring decision"
            );
            if decision.accepted {
                let scored = ScoredProposal {
                    final_score: decision.final_score,
                    factor_count: decision.factor_count,
                    proposal,
                };
                let key = (scored.proposal.direction, scored.proposal.strategy);
                match winners
                    .iter_mut()
                    .find(|w| (w.proposal.direction, w.proposal.strategy) == key)
                {
                    Some(existing) if existing.final_score < scored.final_score => {
                        *existing = scored;
                    }
                    Some(_) => {}
                    None => winners.push(scored),
                }
            }
            decisions.push(decision);
        }

        (winners, decisions)
    }
}
