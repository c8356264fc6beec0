use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use actionprice::{ActionPriceEngine, ApProposal};
use common::config::Settings;
use common::{
    Bias, BtcTrend, Candle, FactorFlags, Proposal, Regime, Result, Signal, StrategyCategory,
    Timeframe,
};
use data::{build_zones, DataLoader, ZoneBuilderConfig, ZoneRegistry};
use exchange::BinanceFutures;
use strategy::indicators::{cvd_divergence, cvd_series, last_atr};
use strategy::{
    core_strategies, CvdFacts, EvalContext, IndicatorCache, RegimeDetector, SignalScorer,
    Strategy, ZoneView,
};
use tracker::{LockManager, SignalJournal, SignalStore};

const SERIES_DEPTH: u32 = 300;
const DIVERGENCE_LOOKBACK: usize = 20;
const DEPTH_LEVELS: u32 = 100;

/// What one refresh → analyze → score → emit pass did.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleReport {
    pub symbols_ok: usize,
    pub symbols_failed: usize,
    pub signals_created: usize,
}

/// Runs one full pipeline pass per candle close. Owns the per-symbol
/// zone registries (single writer per symbol: the analysis task that
/// currently holds the registry).
pub struct CycleRunner {
    api: Arc<BinanceFutures>,
    loader: Arc<DataLoader>,
    cache: Arc<IndicatorCache>,
    detector: RegimeDetector,
    scorer: SignalScorer,
    strategies: Vec<Box<dyn Strategy>>,
    ap_engine: ActionPriceEngine,
    signals: SignalStore,
    locks: LockManager,
    journal: Arc<SignalJournal>,
    zone_cfg: ZoneBuilderConfig,
    zones: Mutex<HashMap<String, ZoneRegistry>>,
    last_open_interest: Mutex<HashMap<String, f64>>,
    settings: Settings,
}

impl CycleRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: Arc<BinanceFutures>,
        loader: Arc<DataLoader>,
        cache: Arc<IndicatorCache>,
        signals: SignalStore,
        locks: LockManager,
        journal: Arc<SignalJournal>,
        settings: Settings,
    ) -> Self {
        CycleRunner {
            api,
            loader,
            cache,
            detector: RegimeDetector::default(),
            scorer: SignalScorer::new(settings.scorer.clone()),
            strategies: core_strategies(),
            ap_engine: ActionPriceEngine::new(settings.action_price.clone()),
            signals,
            locks,
            journal,
            zone_cfg: ZoneBuilderConfig::default(),
            zones: Mutex::new(HashMap::new()),
            last_open_interest: Mutex::new(HashMap::new()),
            settings,
        }
    }

    pub fn signal_store(&self) -> &SignalStore {
        &self.signals
    }

    /// One full cycle: refresh all symbols through a bounded worker
    /// pool, analyze each as soon as its refresh lands, emit survivors.
    /// Per-symbol failures are isolated; the cycle proceeds.
    pub async fn run_cycle(
        self: Arc<Self>,
        symbols: &[String],
        timeframes: &[Timeframe],
        now: DateTime<Utc>,
    ) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();

        // BTC leads: its 1h trend is an input to every other symbol.
        let btc = self.btc_trend(now).await.unwrap_or_else(|e| {
            warn!(error = %e, "BTC trend unavailable, treating as flat");
            BtcTrend::default()
        });

        let refresh_pool = Arc::new(Semaphore::new(self.settings.loader.parallel_max));
        let analysis_pool = Arc::new(Semaphore::new(
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
        ));
        let (ready_tx, mut ready_rx) = mpsc::channel::<(String, bool)>(symbols.len().max(1));

        for symbol in symbols {
            let runner = Arc::clone(&self);
            let pool = Arc::clone(&refresh_pool);
            let tx = ready_tx.clone();
            let symbol = symbol.clone();
            let tfs = timeframes.to_vec();
            tokio::spawn(async move {
                let _permit = pool.acquire_owned().await.ok();
                let ok = match runner.loader.refresh_recent(&symbol, &tfs, now).await {
                    Ok(outcome) => {
                        debug!(
                            symbol = %symbol,
                            calls = outcome.api_calls,
                            rows = outcome.rows_upserted,
                            "refreshed"
                        );
                        true
                    }
                    Err(e) => {
                        warn!(symbol = %symbol, error = %e, "refresh failed, symbol unhealthy for this cycle");
                        false
                    }
                };
                let _ = tx.send((symbol, ok)).await;
            });
        }
        drop(ready_tx);

        // Analysis starts per symbol as soon as its refresh completes.
        let budget = Duration::from_secs(self.settings.loader.symbol_budget_sec);
        let mut analyses: JoinSet<(String, Result<usize>)> = JoinSet::new();
        while let Some((symbol, refresh_ok)) = ready_rx.recv().await {
            if !refresh_ok {
                report.symbols_failed += 1;
                continue;
            }
            let runner = Arc::clone(&self);
            let pool = Arc::clone(&analysis_pool);
            analyses.spawn(async move {
                let _permit = pool.acquire_owned().await.ok();
                let result = tokio::time::timeout(budget, runner.analyze_symbol(&symbol, btc, now))
                    .await
                    .unwrap_or_else(|_| {
                        Err(common::Error::Stale(format!(
                            "analysis of {symbol} exceeded the cycle budget"
                        )))
                    });
                (symbol, result)
            });
        }

        while let Some(joined) = analyses.join_next().await {
            match joined {
                Ok((_, Ok(created))) => {
                    report.symbols_ok += 1;
                    report.signals_created += created;
                }
                Ok((symbol, Err(e))) => {
                    report.symbols_failed += 1;
                    warn!(symbol = %symbol, error = %e, "symbol analysis failed");
                }
                Err(e) => {
                    report.symbols_failed += 1;
                    error!(error = %e, "analysis task panicked");
                }
            }
        }

        info!(
            ok = report.symbols_ok,
            failed = report.symbols_failed,
            signals = report.signals_created,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cycle complete"
        );
        report
    }

    /// BTC 1h percent move over a 3-bar lookback.
    async fn btc_trend(&self, now: DateTime<Utc>) -> Result<BtcTrend> {
        self.loader
            .refresh_recent("BTCUSDT", &[Timeframe::H1], now)
            .await?;
        let candles = self
            .loader
            .recent_candles("BTCUSDT", Timeframe::H1, 5, now)
            .await?;
        if candles.len() < 4 {
            return Ok(BtcTrend::default());
        }
        let last = candles[candles.len() - 1].close;
        let past = candles[candles.len() - 4].close;
        if past <= 0.0 {
            return Ok(BtcTrend::default());
        }
        Ok(BtcTrend {
            pct_3bar: (last - past) / past * 100.0,
        })
    }

    /// Analyze one symbol over a consistent snapshot: series, bundles,
    /// zones, regime, then strategies, scorer and the Action Price
    /// recognizer. Returns how many signals were committed.
    async fn analyze_symbol(
        &self,
        symbol: &str,
        btc: BtcTrend,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let candles_15m = self
            .loader
            .recent_candles(symbol, Timeframe::M15, SERIES_DEPTH, now)
            .await?;
        if candles_15m.len() < 210 {
            return Err(common::Error::Stale(format!(
                "{symbol}: only {} closed 15m candles",
                candles_15m.len()
            )));
        }
        let candles_1h = self
            .loader
            .recent_candles(symbol, Timeframe::H1, SERIES_DEPTH, now)
            .await?;
        let candles_4h = self
            .loader
            .recent_candles(symbol, Timeframe::H4, SERIES_DEPTH, now)
            .await?;
        let candles_1d = self
            .loader
            .recent_candles(symbol, Timeframe::D1, SERIES_DEPTH, now)
            .await?;

        let bundle_15m = self
            .cache
            .get_or_compute(symbol, Timeframe::M15, &candles_15m)
            .ok_or_else(|| common::Error::Stale(format!("{symbol}: 15m bundle unavailable")))?;
        let bundle_1h = self.cache.get_or_compute(symbol, Timeframe::H1, &candles_1h);
        let bundle_4h = self.cache.get_or_compute(symbol, Timeframe::H4, &candles_4h);

        let (regime, regime_confidence) = match bundle_1h.as_deref() {
            Some(bundle) => self.detector.detect(bundle),
            None => (Regime::Undecided, 0.0),
        };
        let bias = bundle_4h
            .as_deref()
            .map(|b| self.detector.bias(b))
            .unwrap_or(Bias::Neutral);
        debug!(symbol, %regime, confidence = regime_confidence, ?bias, "regime classified");

        // Take this symbol's registry out of the shared map: the task
        // becomes the single writer for the duration of the analysis.
        let mut registry = {
            let mut map = self.zones.lock().await;
            map.remove(symbol).unwrap_or_default()
        };
        self.rebuild_zones(&mut registry, Timeframe::M15, &candles_15m);
        self.rebuild_zones(&mut registry, Timeframe::H1, &candles_1h);
        self.rebuild_zones(&mut registry, Timeframe::H4, &candles_4h);
        self.rebuild_zones(&mut registry, Timeframe::D1, &candles_1d);

        let mark_price = {
            let deadline = Instant::now() + Duration::from_secs(20);
            match self.api.mark_price_raw(symbol, deadline).await {
                Ok(price) => price,
                Err(e) => {
                    debug!(symbol, error = %e, "mark price unavailable, using last close");
                    bundle_15m.last_close
                }
            }
        };

        // The order book is only consulted where Order Flow can act.
        let depth_imbalance = if regime == Regime::Squeeze {
            let deadline = Instant::now() + Duration::from_secs(20);
            match self.api.depth(symbol, DEPTH_LEVELS, deadline).await {
                Ok(depth) => depth.imbalance(10),
                Err(e) => {
                    debug!(symbol, error = %e, "depth unavailable");
                    None
                }
            }
        } else {
            None
        };

        let cvd = Some(self.cvd_facts(&candles_15m, &candles_1h));
        let oi_delta_pct = self.open_interest_delta(symbol).await;

        let created = {
            let zone_view = ZoneView {
                m15: registry.zones(Timeframe::M15),
                h1: registry.zones(Timeframe::H1),
                h4: registry.zones(Timeframe::H4),
                d1: registry.zones(Timeframe::D1),
            };
            let ctx = EvalContext {
                symbol,
                candles_15m: &candles_15m,
                candles_1h: &candles_1h,
                candles_4h: &candles_4h,
                bundle_15m: &bundle_15m,
                bundle_1h: bundle_1h.as_deref(),
                bundle_4h: bundle_4h.as_deref(),
                zones: zone_view,
                regime,
                bias,
                mark_price,
                btc,
                depth_imbalance,
                cvd,
                oi_delta_pct,
            };

            let proposals: Vec<Proposal> = self
                .strategies
                .iter()
                .filter_map(|s| s.evaluate(&ctx))
                .collect();
            let (winners, decisions) = self.scorer.score_cycle(&ctx, proposals);
            for decision in &decisions {
                if let Err(e) = self.journal.record("score_decision", decision).await {
                    warn!(symbol, error = %e, "failed to journal scoring decision");
                }
            }

            let mut created = 0usize;
            for winner in winners {
                let atr = ctx
                    .bundle(winner.proposal.timeframe)
                    .map(|b| b.atr)
                    .unwrap_or(bundle_15m.atr);
                let signal = Signal::from_proposal(
                    symbol,
                    &winner.proposal,
                    regime,
                    winner.final_score,
                    atr,
                    now,
                );
                if self.commit_signal(signal).await? {
                    created += 1;
                }
            }

            // Action Price runs beside the scored portfolio with its own
            // threshold; it shares the lock table.
            if let Some(ap) = self.ap_engine.evaluate(symbol, &candles_15m) {
                if let Some(signal) = self.ap_signal(symbol, ap, regime, now) {
                    if self.commit_signal(signal).await? {
                        created += 1;
                    }
                }
            }
            created
        };

        // Put the registry back for the next cycle's writer.
        self.zones.lock().await.insert(symbol.to_string(), registry);
        Ok(created)
    }

    fn rebuild_zones(&self, registry: &mut ZoneRegistry, timeframe: Timeframe, candles: &[Candle]) {
        let Some(newest) = candles.last().map(|c| c.close_time) else {
            return;
        };
        if !registry.needs_rebuild(timeframe, newest) {
            return;
        }
        let Some(atr) = last_atr(candles, 14) else {
            return;
        };
        let zones = build_zones(candles, timeframe, atr, &self.zone_cfg);
        registry.update(timeframe, zones, newest);
    }

    fn cvd_facts(&self, candles_15m: &[Candle], candles_1h: &[Candle]) -> CvdFacts {
        let cvd_15m = cvd_series(candles_15m);
        let cvd_1h = cvd_series(candles_1h);
        CvdFacts {
            last: cvd_15m.last().copied().unwrap_or(0.0),
            divergence_15m: cvd_divergence(candles_15m, &cvd_15m, DIVERGENCE_LOOKBACK),
            divergence_1h: cvd_divergence(candles_1h, &cvd_1h, DIVERGENCE_LOOKBACK),
        }
    }

    /// Percent change of open interest since the previous observation of
    /// this symbol. The first observation yields `None`.
    async fn open_interest_delta(&self, symbol: &str) -> Option<f64> {
        let deadline = Instant::now() + Duration::from_secs(20);
        let current = match self.api.open_interest(symbol, deadline).await {
            Ok(oi) => oi,
            Err(e) => {
                debug!(symbol, error = %e, "open interest unavailable");
                return None;
            }
        };
        let mut map = self.last_open_interest.lock().await;
        let previous = map.insert(symbol.to_string(), current);
        match previous {
            Some(prev) if prev > 0.0 => Some((current - prev) / prev * 100.0),
            _ => None,
        }
    }

    fn ap_signal(
        &self,
        symbol: &str,
        ap: ApProposal,
        regime: Regime,
        now: DateTime<Utc>,
    ) -> Option<Signal> {
        let proposal = Proposal {
            strategy: ActionPriceEngine::STRATEGY_NAME,
            category: StrategyCategory::Breakout,
            timeframe: Timeframe::M15,
            direction: ap.direction,
            entry: ap.entry,
            sl: ap.sl,
            tp1: ap.tp1,
            tp2: Some(ap.tp2),
            tp3: None,
            base_score: ap.score_total,
            factors: FactorFlags::default(),
        };
        if !proposal.levels_ordered() {
            warn!(symbol, "action price levels out of order, dropping");
            return None;
        }
        let mut signal =
            Signal::from_proposal(symbol, &proposal, regime, ap.score_total, ap.atr, now);
        signal.ap = Some(ap.context);
        Some(signal)
    }

    /// Lock, persist and journal one signal. Returns false when the
    /// (symbol, direction, strategy) lock is already held.
    async fn commit_signal(&self, signal: Signal) -> Result<bool> {
        if !signal.levels_consistent() {
            return Err(common::Error::Invariant(format!(
                "{} {} {}: price levels out of order",
                signal.symbol, signal.strategy, signal.direction
            )));
        }
        if !self.locks.try_acquire(&signal.lock_key()).await? {
            debug!(
                symbol = %signal.symbol,
                strategy = %signal.strategy,
                direction = %signal.direction,
                "signal suppressed: lock held"
            );
            return Ok(false);
        }

        if let Err(e) = self.signals.insert(&signal).await {
            // Never leave a lock behind for a signal that was not
            // persisted.
            self.locks.release(&signal.lock_key()).await?;
            return Err(e);
        }
        self.journal.signal_opened(&signal).await?;
        info!(
            id = %signal.id,
            symbol = %signal.symbol,
            strategy = %signal.strategy,
            direction = %signal.direction,
            entry = signal.entry,
            sl = signal.stop_loss,
            tp1 = signal.tp1,
            score = signal.confidence_score,
            "signal created"
        );
        Ok(true)
    }
}
