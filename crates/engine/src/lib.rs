pub mod cycle;
pub mod scheduler;

pub use cycle::{CycleReport, CycleRunner};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use common::config::{Config, Settings};
use common::{MarkPriceSource, Result, Timeframe};
use data::{CandleStore, DataLoader, RefreshOutcome};
use exchange::{BinanceFutures, CloseHint, KlineHintStream, RateLimiter, RateUsage};
use strategy::IndicatorCache;
use tracker::{ExitSchedule, LockManager, PerformanceTracker, SignalJournal, SignalStore};

/// Snapshot for the `health` command.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub rate: RateUsage,
    pub symbols_tracked: usize,
    pub active_signals: usize,
    pub locks_held: i64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// Wires every subsystem together and drives the candle-close-aligned
/// main loop.
pub struct Engine {
    api: Arc<BinanceFutures>,
    runner: Arc<CycleRunner>,
    tracker: Arc<PerformanceTracker>,
    loader: Arc<DataLoader>,
    signals: SignalStore,
    locks: LockManager,
    settings: Settings,
    ws_base: String,
    symbols: RwLock<Vec<String>>,
    cycle_in_progress: Arc<AtomicBool>,
    last_cycle_at: RwLock<Option<DateTime<Utc>>>,
    hint_tx: broadcast::Sender<CloseHint>,
}

impl Engine {
    /// Build the full stack over an open database pool.
    pub fn bootstrap(config: &Config, settings: Settings, pool: SqlitePool) -> Result<Arc<Engine>> {
        let limiter = Arc::new(RateLimiter::new(&settings.rate));
        let api = Arc::new(BinanceFutures::new(&config.rest_base_url, limiter)?);

        let candle_store = CandleStore::new(pool.clone());
        let loader = Arc::new(DataLoader::new(
            Arc::clone(&api),
            candle_store.clone(),
            settings.loader.clone(),
        ));
        let cache = Arc::new(IndicatorCache::new());

        let signals = SignalStore::new(pool.clone());
        let locks = LockManager::new(pool, settings.tracker.lock_ttl_sec);
        let journal = Arc::new(SignalJournal::open(std::path::Path::new(
            &config.journal_dir,
        ))?);

        let runner = Arc::new(CycleRunner::new(
            Arc::clone(&api),
            Arc::clone(&loader),
            cache,
            signals.clone(),
            locks.clone(),
            Arc::clone(&journal),
            settings.clone(),
        ));

        let price_source: Arc<dyn MarkPriceSource> = api.clone();
        let tracker = Arc::new(PerformanceTracker::new(
            signals.clone(),
            locks.clone(),
            journal,
            price_source,
            candle_store,
            settings.tracker.clone(),
            ExitSchedule::from(&settings.action_price),
        ));

        let (hint_tx, _) = broadcast::channel(1024);

        Ok(Arc::new(Engine {
            api,
            runner,
            tracker,
            loader,
            signals,
            locks,
            settings,
            ws_base: config.ws_base_url.clone(),
            symbols: RwLock::new(Vec::new()),
            cycle_in_progress: Arc::new(AtomicBool::new(false)),
            last_cycle_at: RwLock::new(None),
            hint_tx,
        }))
    }

    /// Discover the symbol universe, rebuild locks from active signals,
    /// then run cycles until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        self.restore_ban_state().await?;
        self.discover_universe().await?;

        // Restart safety: active signals reacquire their locks so the
        // next cycle cannot duplicate-emit.
        let active = self.signals.active_signals().await?;
        self.locks.rebuild(&active).await?;

        // Mirror ban episodes into the rate ledger so a restart does not
        // forget an active ban.
        {
            let mut bans = self.api.limiter().subscribe_bans();
            let pool = self.signals.pool().clone();
            tokio::spawn(async move {
                while let Ok(notice) = bans.recv().await {
                    if let Err(e) = persist_ban(&pool, notice.until).await {
                        warn!(error = %e, "failed to persist ban to the rate ledger");
                    }
                }
            });
        }

        tokio::spawn(Arc::clone(&self.tracker).run(shutdown.clone()));
        self.spawn_close_hint_streams().await;

        let settle = Duration::from_secs(self.settings.loader.settle_delay_sec);
        let mut hint_rx = self.hint_tx.subscribe();

        info!("engine running, waiting for the next 15m close");
        loop {
            let now = Utc::now();
            let next = scheduler::next_cycle_time(now, settle);
            let sleep_for = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("engine shutting down, waiting for in-flight cycle");
                    self.await_cycle_end().await;
                    return Ok(());
                }
                hint = hint_rx.recv() => {
                    if let Ok(hint) = hint {
                        tracing::debug!(
                            symbol = %hint.symbol,
                            close = %hint.close_time,
                            "close hint observed"
                        );
                    }
                    continue;
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }

            // Overlap guard: if the previous cycle still runs when this
            // tick fires, the tick is dropped, never queued.
            if self.cycle_in_progress.swap(true, Ordering::SeqCst) {
                warn!("cycle tick dropped: previous cycle still in progress");
                continue;
            }

            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                let boundary = scheduler::cycle_boundary(Utc::now());
                let timeframes = scheduler::timeframes_closing_at(boundary);
                let symbols = engine.symbols.read().await.clone();
                let report = Arc::clone(&engine.runner)
                    .run_cycle(&symbols, &timeframes, Utc::now())
                    .await;
                *engine.last_cycle_at.write().await = Some(Utc::now());
                engine.cycle_in_progress.store(false, Ordering::SeqCst);
                info!(
                    ok = report.symbols_ok,
                    failed = report.symbols_failed,
                    signals = report.signals_created,
                    "cycle report"
                );
            });
        }
    }

    async fn discover_universe(&self) -> Result<()> {
        let universe = &self.settings.universe;
        let symbols = if universe.fetch_all {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
            match self.api.universe(universe.min_quote_volume_24h, deadline).await {
                Ok(found) if !found.is_empty() => found,
                Ok(_) | Err(_) => {
                    warn!("universe discovery failed or empty, using configured symbols");
                    universe.symbols.clone()
                }
            }
        } else {
            universe.symbols.clone()
        };

        info!(count = symbols.len(), "symbol universe selected");
        *self.symbols.write().await = symbols;
        Ok(())
    }

    async fn spawn_close_hint_streams(&self) {
        let symbols = self.symbols.read().await.clone();
        for symbol in symbols {
            let stream = KlineHintStream::new(
                &self.ws_base,
                symbol,
                Timeframe::M15,
                self.hint_tx.clone(),
            );
            tokio::spawn(stream.run());
        }
    }

    async fn await_cycle_end(&self) {
        // Cap the wait at one cycle budget.
        let budget = Duration::from_secs(self.settings.loader.symbol_budget_sec * 2);
        let waited = tokio::time::timeout(budget, async {
            while self.cycle_in_progress.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        })
        .await;
        if waited.is_err() {
            warn!("in-flight cycle exceeded the shutdown budget, abandoning");
        }
    }

    /// CLI surface: force-refresh one symbol (or the whole universe)
    /// over a horizon in days.
    pub async fn refresh(&self, symbol: Option<String>, days: Option<i64>) -> Result<RefreshOutcome> {
        let now = Utc::now();
        let symbols = match symbol {
            Some(s) => vec![s],
            None => {
                self.discover_universe().await?;
                self.symbols.read().await.clone()
            }
        };

        let mut outcome = RefreshOutcome::default();
        for symbol in &symbols {
            outcome += self
                .loader
                .refresh_recent(symbol, &Timeframe::ALL, now)
                .await?;
            if let Some(days) = days {
                for tf in Timeframe::ALL {
                    let from = now - chrono::Duration::days(days);
                    outcome += self.loader.backfill_gap(symbol, tf, from, now).await?;
                }
            }
            for tf in Timeframe::ALL {
                outcome += self.loader.ensure_dense(symbol, tf, now).await?;
            }
        }
        info!(
            symbols = symbols.len(),
            calls = outcome.api_calls,
            rows = outcome.rows_upserted,
            "manual refresh complete"
        );
        Ok(outcome)
    }

    async fn restore_ban_state(&self) -> Result<()> {
        let ban_until: Option<Option<i64>> =
            sqlx::query_scalar("SELECT ban_until FROM rate_ledger WHERE id = 1")
                .fetch_optional(self.signals.pool())
                .await?;
        if let Some(Some(ms)) = ban_until {
            if let Some(until) = DateTime::from_timestamp_millis(ms) {
                if until > Utc::now() {
                    warn!(until = %until, "restoring exchange ban from the rate ledger");
                    self.api.limiter().trip_ban(until).await;
                }
            }
        }
        Ok(())
    }

    pub async fn health(&self) -> Result<HealthReport> {
        Ok(HealthReport {
            rate: self.api.limiter().usage().await,
            symbols_tracked: self.symbols.read().await.len(),
            active_signals: self.signals.active_signals().await?.len(),
            locks_held: self.locks.held_count().await?,
            last_cycle_at: *self.last_cycle_at.read().await,
        })
    }
}

async fn persist_ban(pool: &SqlitePool, until: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "INSERT INTO rate_ledger (id, bucket_start, weight_used, ban_until, reset_observed_at) \
         VALUES (1, ?1, 0, ?2, NULL) \
         ON CONFLICT (id) DO UPDATE SET ban_until = excluded.ban_until",
    )
    .bind(Utc::now().timestamp_millis())
    .bind(until.timestamp_millis())
    .execute(pool)
    .await?;
    Ok(())
}
