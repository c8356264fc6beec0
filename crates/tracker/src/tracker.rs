use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use common::config::{ActionPriceSettings, TrackerSettings};
use common::{Candle, ExitReason, MarkPriceSource, Result, Signal, SignalStatus};
use data::CandleStore;

use crate::journal::SignalJournal;
use crate::lock::LockManager;
use crate::store::SignalStore;

/// Below this initial risk the R-based MFE/MAE update is skipped to
/// avoid division by zero.
const RISK_EPSILON: f64 = 1e-9;

/// Position fractions of the 3-tier exit schedule.
#[derive(Debug, Clone, Copy)]
pub struct ExitSchedule {
    pub tp1_size: f64,
    pub tp2_size: f64,
    pub trail_size: f64,
}

impl From<&ActionPriceSettings> for ExitSchedule {
    fn from(cfg: &ActionPriceSettings) -> Self {
        ExitSchedule {
            tp1_size: cfg.tp1_size,
            tp2_size: cfg.tp2_size,
            trail_size: cfg.trail_size,
        }
    }
}

impl Default for ExitSchedule {
    fn default() -> Self {
        ExitSchedule {
            tp1_size: 0.30,
            tp2_size: 0.40,
            trail_size: 0.30,
        }
    }
}

/// One price observation. A mark price collapses to a point; a closed
/// candle contributes its full range.
#[derive(Debug, Clone, Copy)]
pub struct PriceView {
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl PriceView {
    pub fn mark(price: f64) -> Self {
        PriceView {
            high: price,
            low: price,
            close: price,
        }
    }

    pub fn candle(candle: &Candle) -> Self {
        PriceView {
            high: candle.high,
            low: candle.low,
            close: candle.close,
        }
    }
}

/// What a single check did to a signal.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Tp1Hit { price: f64, pnl_pct: f64 },
    Tp2Hit { price: f64, pnl_pct: f64 },
    Closed {
        reason: ExitReason,
        exit_price: f64,
        final_pnl_pct: f64,
    },
}

#[derive(Debug, Default)]
pub struct CheckOutcome {
    pub changed: bool,
    pub events: Vec<TrackerEvent>,
}

impl CheckOutcome {
    pub fn closed(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, TrackerEvent::Closed { .. }))
    }
}

/// Resolve one price observation against one signal. Pure: all decisions
/// and mutations happen here; persistence and lock release are the async
/// loop's business.
///
/// Applying a check to an already-terminal signal is a no-op.
pub fn apply_check(
    signal: &mut Signal,
    view: &PriceView,
    now: DateTime<Utc>,
    cfg: &TrackerSettings,
    schedule: &ExitSchedule,
) -> CheckOutcome {
    let mut outcome = CheckOutcome::default();
    if signal.is_terminal() {
        return outcome;
    }

    let sign = signal.direction.sign();
    // Favorable extreme of this observation (highest for LONG, lowest
    // for SHORT); adverse is the mirror.
    let favorable = if sign > 0.0 { view.high } else { view.low };
    let adverse = if sign > 0.0 { view.low } else { view.high };

    update_excursions(signal, favorable, adverse, &mut outcome);

    if signal.trailing_active {
        resolve_trailing(signal, view, favorable, now, cfg, schedule, &mut outcome);
        return outcome;
    }

    if !signal.tp1_hit {
        // Stop first: a bar that touches both is counted against us.
        if sign * (adverse - signal.stop_loss) <= 0.0 {
            let final_pnl = signal.return_pct(signal.stop_loss);
            close_signal(
                signal,
                ExitReason::StopLoss,
                signal.stop_loss,
                final_pnl,
                now,
                &mut outcome,
            );
            return outcome;
        }

        // Straight through both targets in one observation: TP1 and TP2
        // fire in sequence so tp2_hit always implies tp1_hit.
        if let Some(tp2) = signal.tp2 {
            if sign * (view.close - tp2) >= 0.0 {
                fire_tp1(signal, now, schedule, &mut outcome);
                fire_tp2(signal, favorable, now, schedule, &mut outcome);
                return outcome;
            }
        }

        // Exactly at TP1 counts as hit.
        if sign * (view.close - signal.tp1) >= 0.0 {
            match signal.tp2 {
                Some(_) => fire_tp1(signal, now, schedule, &mut outcome),
                // No second target: the full position exits at TP1.
                None => {
                    let final_pnl = signal.return_pct(signal.tp1);
                    close_signal(
                        signal,
                        ExitReason::Tp1,
                        signal.tp1,
                        final_pnl,
                        now,
                        &mut outcome,
                    );
                }
            }
            return outcome;
        }

        // Time stop fires on the bar whose index equals the budget.
        if signal.bars_since_entry(now) >= cfg.time_stop_bars {
            let final_pnl = signal.return_pct(view.close);
            close_signal(
                signal,
                ExitReason::TimeStop,
                view.close,
                final_pnl,
                now,
                &mut outcome,
            );
        }
        return outcome;
    }

    // TP1 banked, TP2 still open.
    if let Some(tp2) = signal.tp2 {
        if sign * (view.close - tp2) >= 0.0 {
            fire_tp2(signal, favorable, now, schedule, &mut outcome);
            return outcome;
        }
        // The stop now sits at entry: giving it back closes the
        // remainder at breakeven, keeping the banked TP1 partial.
        if sign * (adverse - signal.entry) <= 0.0 {
            let final_pnl = signal.tp1_pnl_pct.unwrap_or(0.0);
            close_signal(
                signal,
                ExitReason::Breakeven,
                signal.entry,
                final_pnl,
                now,
                &mut outcome,
            );
        }
    }

    outcome
}

fn update_excursions(
    signal: &mut Signal,
    favorable: f64,
    adverse: f64,
    outcome: &mut CheckOutcome,
) {
    if signal.initial_risk < RISK_EPSILON {
        return;
    }
    let sign = signal.direction.sign();
    let mfe = (sign * (favorable - signal.entry) / signal.initial_risk).max(0.0);
    let mae = (sign * (signal.entry - adverse) / signal.initial_risk).max(0.0);
    if mfe > signal.mfe_r {
        signal.mfe_r = mfe;
        outcome.changed = true;
    }
    if mae > signal.mae_r {
        signal.mae_r = mae;
        outcome.changed = true;
    }
}

fn fire_tp1(
    signal: &mut Signal,
    now: DateTime<Utc>,
    schedule: &ExitSchedule,
    outcome: &mut CheckOutcome,
) {
    let pnl = signal.return_pct(signal.tp1) * schedule.tp1_size;
    signal.tp1_hit = true;
    signal.tp1_closed_at = Some(now);
    signal.tp1_pnl_pct = Some(pnl);
    // Breakeven: the stop moves to entry and never back.
    signal.stop_loss = signal.entry;
    outcome.changed = true;
    outcome.events.push(TrackerEvent::Tp1Hit {
        price: signal.tp1,
        pnl_pct: pnl,
    });
}

fn fire_tp2(
    signal: &mut Signal,
    favorable: f64,
    now: DateTime<Utc>,
    schedule: &ExitSchedule,
    outcome: &mut CheckOutcome,
) {
    let tp2 = match signal.tp2 {
        Some(tp2) => tp2,
        None => return,
    };
    let sign = signal.direction.sign();
    let pnl = signal.return_pct(tp2) * schedule.tp2_size;
    signal.tp2_hit = true;
    signal.tp2_closed_at = Some(now);
    signal.tp2_pnl_pct = Some(pnl);
    // The remaining fraction becomes a trailing runner anchored at the
    // best price seen so far.
    signal.trailing_active = true;
    let seed = if sign * (favorable - tp2) >= 0.0 { favorable } else { tp2 };
    signal.trailing_peak = Some(seed);
    outcome.changed = true;
    outcome.events.push(TrackerEvent::Tp2Hit {
        price: tp2,
        pnl_pct: pnl,
    });
}

#[allow(clippy::too_many_arguments)]
fn resolve_trailing(
    signal: &mut Signal,
    view: &PriceView,
    favorable: f64,
    now: DateTime<Utc>,
    cfg: &TrackerSettings,
    schedule: &ExitSchedule,
    outcome: &mut CheckOutcome,
) {
    let sign = signal.direction.sign();
    let peak = signal.trailing_peak.unwrap_or(favorable);

    // The peak only ever moves in the favorable direction.
    let new_peak = if sign * (favorable - peak) > 0.0 {
        favorable
    } else {
        peak
    };
    if new_peak != peak {
        signal.trailing_peak = Some(new_peak);
        outcome.changed = true;
    }

    // Retracement exactly equal to the trail distance closes.
    let retracement = sign * (new_peak - view.close);
    if retracement >= cfg.trail_atr_mult * signal.atr_at_entry {
        let runner_pnl = signal.return_pct(view.close) * schedule.trail_size;
        let final_pnl = signal.tp1_pnl_pct.unwrap_or(0.0)
            + signal.tp2_pnl_pct.unwrap_or(0.0)
            + runner_pnl;
        close_signal(
            signal,
            ExitReason::Trailing,
            view.close,
            final_pnl,
            now,
            outcome,
        );
        return;
    }

    // Stale runners are cleaned up after the post-TP2 horizon.
    if let Some(tp2_at) = signal.tp2_closed_at {
        let stale_after = chrono::Duration::hours(cfg.post_tp2_time_stop_hours);
        if now - tp2_at >= stale_after {
            let runner_pnl = signal.return_pct(view.close) * schedule.trail_size;
            let final_pnl = signal.tp1_pnl_pct.unwrap_or(0.0)
                + signal.tp2_pnl_pct.unwrap_or(0.0)
                + runner_pnl;
            close_signal(
                signal,
                ExitReason::TimeStop,
                view.close,
                final_pnl,
                now,
                outcome,
            );
        }
    }
}

fn close_signal(
    signal: &mut Signal,
    reason: ExitReason,
    exit_price: f64,
    final_pnl_pct: f64,
    now: DateTime<Utc>,
    outcome: &mut CheckOutcome,
) {
    signal.status = SignalStatus::Closed;
    signal.exit_reason = Some(reason);
    signal.exit_price = Some(exit_price);
    signal.final_pnl_pct = Some(final_pnl_pct);
    signal.closed_at = Some(now);
    signal.bars_to_exit = Some(signal.bars_since_entry(now));
    outcome.changed = true;
    outcome.events.push(TrackerEvent::Closed {
        reason,
        exit_price,
        final_pnl_pct,
    });
}

/// Drives every ACTIVE signal to a terminal state and frees its lock.
/// Runs on its own cadence; overlapping ticks are dropped, not queued.
pub struct PerformanceTracker {
    store: SignalStore,
    locks: LockManager,
    journal: Arc<SignalJournal>,
    price_source: Arc<dyn MarkPriceSource>,
    candles: CandleStore,
    cfg: TrackerSettings,
    schedule: ExitSchedule,
    busy: AtomicBool,
}

impl PerformanceTracker {
    pub fn new(
        store: SignalStore,
        locks: LockManager,
        journal: Arc<SignalJournal>,
        price_source: Arc<dyn MarkPriceSource>,
        candles: CandleStore,
        cfg: TrackerSettings,
        schedule: ExitSchedule,
    ) -> Self {
        PerformanceTracker {
            store,
            locks,
            journal,
            price_source,
            candles,
            cfg,
            schedule,
            busy: AtomicBool::new(false),
        }
    }

    /// Run the tracker loop until shutdown. A final pass flushes
    /// in-flight transitions before returning.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(cadence_sec = self.cfg.cadence_sec, "performance tracker running");
        let mut ticker = tokio::time::interval(Duration::from_secs(self.cfg.cadence_sec));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("performance tracker shutting down, flushing transitions");
                    self.check_once().await;
                    return;
                }
                _ = ticker.tick() => {
                    self.check_once().await;
                }
            }
        }
    }

    /// One full pass over the active signals. If the previous pass is
    /// still running the tick is dropped and logged, never queued.
    pub async fn check_once(&self) {
        if self.busy.swap(true, Ordering::SeqCst) {
            warn!("tracker tick dropped: previous pass still running");
            return;
        }
        if let Err(e) = self.check_active_signals().await {
            error!(error = %e, "tracker pass failed");
        }
        self.busy.store(false, Ordering::SeqCst);
    }

    async fn check_active_signals(&self) -> Result<()> {
        let signals = self.store.active_signals().await?;
        if signals.is_empty() {
            return Ok(());
        }
        debug!(count = signals.len(), "checking active signals");

        for mut signal in signals {
            // Per-signal isolation: a failing signal never takes down
            // the pass, and prior commits are preserved.
            if let Err(e) = self.check_signal(&mut signal).await {
                error!(id = %signal.id, symbol = %signal.symbol, error = %e, "signal check failed");
            }
        }
        Ok(())
    }

    async fn check_signal(&self, signal: &mut Signal) -> Result<()> {
        let view = match self.price_source.mark_price(&signal.symbol).await {
            Ok(price) => PriceView::mark(price),
            Err(e) => {
                debug!(symbol = %signal.symbol, error = %e, "mark price unavailable, using last closed candle");
                match self
                    .candles
                    .latest_closed_candle(&signal.symbol, signal.timeframe, Utc::now())
                    .await?
                {
                    Some(candle) => PriceView::candle(&candle),
                    None => return Ok(()),
                }
            }
        };

        let outcome = apply_check(signal, &view, Utc::now(), &self.cfg, &self.schedule);
        if outcome.changed {
            self.store.update(signal).await?;
        }

        for event in &outcome.events {
            match event {
                TrackerEvent::Tp1Hit { price, pnl_pct } => {
                    info!(
                        id = %signal.id,
                        symbol = %signal.symbol,
                        direction = %signal.direction,
                        price,
                        pnl_pct,
                        "TP1 hit, stop moved to breakeven"
                    );
                }
                TrackerEvent::Tp2Hit { price, pnl_pct } => {
                    info!(
                        id = %signal.id,
                        symbol = %signal.symbol,
                        direction = %signal.direction,
                        price,
                        pnl_pct,
                        "TP2 hit, trailing runner active"
                    );
                }
                TrackerEvent::Closed {
                    reason,
                    exit_price,
                    final_pnl_pct,
                } => {
                    info!(
                        id = %signal.id,
                        symbol = %signal.symbol,
                        direction = %signal.direction,
                        reason = %reason,
                        exit_price,
                        final_pnl_pct,
                        "signal closed"
                    );
                    self.locks.release(&signal.lock_key()).await?;
                    self.journal.signal_closed(signal).await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Direction, FactorFlags, Proposal, Regime, StrategyCategory, Timeframe};

    fn dt(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn cfg() -> TrackerSettings {
        TrackerSettings::default()
    }

    fn schedule() -> ExitSchedule {
        ExitSchedule::default()
    }

    fn make_signal(
        direction: Direction,
        entry: f64,
        sl: f64,
        tp1: f64,
        tp2: Option<f64>,
        atr: f64,
    ) -> Signal {
        let proposal = Proposal {
            strategy: "test",
            category: StrategyCategory::Breakout,
            timeframe: Timeframe::M15,
            direction,
            entry,
            sl,
            tp1,
            tp2,
            tp3: None,
            base_score: 3.0,
            factors: FactorFlags::default(),
        };
        Signal::from_proposal("BTCUSDT", &proposal, Regime::Trend, 3.0, atr, dt(0))
    }

    fn check(signal: &mut Signal, price: f64, at: DateTime<Utc>) -> CheckOutcome {
        apply_check(signal, &PriceView::mark(price), at, &cfg(), &schedule())
    }

    /// S1: LONG 100/98/102/104. Marks 103, 101.5, 100 -> TP1 then
    /// breakeven; the banked +0.60% is the final PnL.
    #[test]
    fn scenario_long_tp1_then_breakeven() {
        let mut s = make_signal(Direction::Long, 100.0, 98.0, 102.0, Some(104.0), 1.0);

        let outcome = check(&mut s, 103.0, dt(60_000));
        assert!(s.tp1_hit);
        assert!((s.tp1_pnl_pct.unwrap() - 0.60).abs() < 1e-9);
        assert!((s.stop_loss - 100.0).abs() < 1e-9, "stop moved to entry");
        assert!(!outcome.closed());

        let outcome = check(&mut s, 101.5, dt(120_000));
        assert!(!outcome.closed());

        let outcome = check(&mut s, 100.0, dt(180_000));
        assert!(outcome.closed());
        assert_eq!(s.exit_reason, Some(ExitReason::Breakeven));
        assert!((s.final_pnl_pct.unwrap() - 0.60).abs() < 1e-9);
        assert_eq!(s.status, SignalStatus::Closed);
    }

    /// S2: SHORT scalp 50/51/49/48.5 with ATR 0.2. Marks 48.8, 48.4,
    /// 48.6, 48.8 -> TP1 +0.60, TP2 +1.20, trailing close +0.72, total
    /// +2.52.
    #[test]
    fn scenario_short_scalp_full_ladder() {
        let mut s = make_signal(Direction::Short, 50.0, 51.0, 49.0, Some(48.5), 0.2);

        check(&mut s, 48.8, dt(60_000));
        assert!(s.tp1_hit && !s.tp2_hit);
        assert!((s.tp1_pnl_pct.unwrap() - 0.60).abs() < 1e-9);

        check(&mut s, 48.4, dt(120_000));
        assert!(s.tp2_hit && s.trailing_active);
        assert!((s.tp2_pnl_pct.unwrap() - 1.20).abs() < 1e-9);
        assert!((s.trailing_peak.unwrap() - 48.4).abs() < 1e-9);

        // Retracement 0.2 < 1.2 * ATR (0.24): hold.
        let outcome = check(&mut s, 48.6, dt(180_000));
        assert!(!outcome.closed());
        assert!((s.trailing_peak.unwrap() - 48.4).abs() < 1e-9, "peak is monotonic");

        // Retracement 0.4 >= 0.24: trailing exit at 48.8.
        let outcome = check(&mut s, 48.8, dt(240_000));
        assert!(outcome.closed());
        assert_eq!(s.exit_reason, Some(ExitReason::Trailing));
        assert!((s.final_pnl_pct.unwrap() - 2.52).abs() < 1e-9);
    }

    /// S3: LONG 10/9/11/12, first candle low 8.9 -> full stop at 9.
    #[test]
    fn scenario_stop_loss_full_position() {
        let mut s = make_signal(Direction::Long, 10.0, 9.0, 11.0, Some(12.0), 0.5);
        let view = PriceView {
            high: 10.2,
            low: 8.9,
            close: 9.1,
        };
        let outcome = apply_check(&mut s, &view, dt(900_000), &cfg(), &schedule());
        assert!(outcome.closed());
        assert_eq!(s.exit_reason, Some(ExitReason::StopLoss));
        assert!((s.exit_price.unwrap() - 9.0).abs() < 1e-9);
        assert!((s.final_pnl_pct.unwrap() + 10.0).abs() < 1e-9);
    }

    /// S4: LONG 100/99/101 with no TP2; 13 bars later and no TP1, the
    /// time stop closes at the mark.
    #[test]
    fn scenario_time_stop_after_budget() {
        let mut s = make_signal(Direction::Long, 100.0, 99.0, 101.0, None, 0.5);
        let bar_ms = Timeframe::M15.millis();

        // One bar in: no exit.
        let outcome = check(&mut s, 100.3, dt(bar_ms));
        assert!(!outcome.closed());

        let outcome = check(&mut s, 100.3, dt(13 * bar_ms));
        assert!(outcome.closed());
        assert_eq!(s.exit_reason, Some(ExitReason::TimeStop));
        assert!((s.final_pnl_pct.unwrap() - 0.30).abs() < 1e-9);
    }

    #[test]
    fn time_stop_fires_exactly_at_budget_bars() {
        let mut s = make_signal(Direction::Long, 100.0, 99.0, 101.0, None, 0.5);
        let bar_ms = Timeframe::M15.millis();

        let outcome = check(&mut s, 100.1, dt(12 * bar_ms - 1));
        assert!(!outcome.closed(), "bar 11 must not fire");

        let outcome = check(&mut s, 100.1, dt(12 * bar_ms));
        assert!(outcome.closed(), "bar 12 fires the time stop");
    }

    #[test]
    fn exactly_at_tp1_counts_as_hit() {
        let mut s = make_signal(Direction::Long, 100.0, 98.0, 102.0, Some(104.0), 1.0);
        check(&mut s, 102.0, dt(60_000));
        assert!(s.tp1_hit);
    }

    #[test]
    fn straight_through_tp2_fires_both_tiers() {
        let mut s = make_signal(Direction::Long, 100.0, 98.0, 102.0, Some(104.0), 1.0);
        let outcome = check(&mut s, 104.5, dt(60_000));
        assert!(s.tp1_hit && s.tp2_hit, "tp2_hit implies tp1_hit");
        assert!(s.trailing_active);
        assert!((s.stop_loss - 100.0).abs() < 1e-9);
        assert_eq!(outcome.events.len(), 2);
        // Peak seeds at the observed favorable extreme beyond TP2.
        assert!((s.trailing_peak.unwrap() - 104.5).abs() < 1e-9);
    }

    #[test]
    fn tp1_without_tp2_closes_the_whole_position() {
        let mut s = make_signal(Direction::Long, 100.0, 99.0, 101.0, None, 0.5);
        let outcome = check(&mut s, 101.2, dt(60_000));
        assert!(outcome.closed());
        assert_eq!(s.exit_reason, Some(ExitReason::Tp1));
        assert!((s.final_pnl_pct.unwrap() - 1.0).abs() < 1e-9, "full position at +1%");
    }

    #[test]
    fn trailing_retracement_exactly_at_threshold_closes() {
        let mut s = make_signal(Direction::Long, 100.0, 98.0, 102.0, Some(104.0), 1.0);
        check(&mut s, 104.0, dt(60_000)); // both tiers, peak 104
        assert!(s.trailing_active);

        // 1.2 * ATR = 1.2 exactly.
        let outcome = check(&mut s, 102.8, dt(120_000));
        assert!(outcome.closed());
        assert_eq!(s.exit_reason, Some(ExitReason::Trailing));
    }

    #[test]
    fn terminal_signal_is_a_no_op() {
        let mut s = make_signal(Direction::Long, 100.0, 98.0, 102.0, Some(104.0), 1.0);
        check(&mut s, 97.0, dt(60_000));
        assert_eq!(s.status, SignalStatus::Closed);
        let before = s.clone();

        let outcome = check(&mut s, 110.0, dt(120_000));
        assert!(!outcome.changed);
        assert!(outcome.events.is_empty());
        assert_eq!(s.exit_reason, before.exit_reason);
        assert_eq!(s.final_pnl_pct, before.final_pnl_pct);
    }

    #[test]
    fn stale_runner_closes_after_post_tp2_horizon() {
        let mut s = make_signal(Direction::Long, 100.0, 98.0, 102.0, Some(104.0), 1.0);
        check(&mut s, 104.0, dt(60_000));
        assert!(s.trailing_active);

        // Drifts sideways for 72h: the runner is cleaned up.
        let later = dt(60_000) + chrono::Duration::hours(72);
        let outcome = check(&mut s, 104.2, later);
        assert!(outcome.closed());
        assert_eq!(s.exit_reason, Some(ExitReason::TimeStop));
        let expected = s.tp1_pnl_pct.unwrap() + s.tp2_pnl_pct.unwrap() + 4.2 * 0.30;
        assert!((s.final_pnl_pct.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn mfe_mae_recorded_in_r_multiples() {
        let mut s = make_signal(Direction::Long, 100.0, 98.0, 102.0, Some(104.0), 1.0);
        let view = PriceView {
            high: 101.0,
            low: 99.0,
            close: 100.5,
        };
        apply_check(&mut s, &view, dt(60_000), &cfg(), &schedule());
        assert!((s.mfe_r - 0.5).abs() < 1e-9);
        assert!((s.mae_r - 0.5).abs() < 1e-9);
    }

    #[test]
    fn zero_risk_skips_excursion_updates() {
        let mut s = make_signal(Direction::Long, 100.0, 100.0, 101.0, None, 0.5);
        assert!(s.initial_risk < RISK_EPSILON);
        let view = PriceView {
            high: 105.0,
            low: 95.0,
            close: 100.0,
        };
        apply_check(&mut s, &view, dt(60_000), &cfg(), &schedule());
        assert!((s.mfe_r - 0.0).abs() < 1e-12);
        assert!((s.mae_r - 0.0).abs() < 1e-12);
    }
}
