use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use common::config::LoaderSettings;
use common::{Candle, Result, Timeframe};
use exchange::BinanceFutures;

use crate::store::CandleStore;

/// Exchange page cap for a single klines request.
const PAGE_LIMIT: u32 = 1500;

/// What a refresh pass actually did, so callers (and the freshness test)
/// can assert on issued API calls.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub api_calls: u32,
    pub rows_upserted: usize,
}

impl AddAssign for RefreshOutcome {
    fn add_assign(&mut self, rhs: RefreshOutcome) {
        self.api_calls += rhs.api_calls;
        self.rows_upserted += rhs.rows_upserted;
    }
}

/// Keeps per-(symbol, timeframe) candle series fresh and gap-free.
pub struct DataLoader {
    api: Arc<BinanceFutures>,
    store: CandleStore,
    cfg: LoaderSettings,
}

/// True when the series needs an API call: the newest stored close does
/// not yet cover the most recently completed bar. Pure so the freshness
/// short-circuit is testable without a network.
pub fn needs_refresh(
    last_close: Option<DateTime<Utc>>,
    timeframe: Timeframe,
    now: DateTime<Utc>,
) -> bool {
    let Some(last_close) = last_close else {
        return true;
    };
    // The latest completed bar closes at the current boundary minus 1ms;
    // allow a second of slack for exchange timestamp jitter.
    let boundary_ms = timeframe.align(now).timestamp_millis();
    last_close.timestamp_millis() < boundary_ms - 1000
}

/// Scan a series tail for missing bars. Returns (gap_start_open_time,
/// gap_end_open_time) pairs, exclusive of the candles on both sides.
pub fn detect_gaps(candles: &[Candle], timeframe: Timeframe) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let step = timeframe.millis();
    let mut gaps = Vec::new();
    for pair in candles.windows(2) {
        let delta = pair[1].open_time.timestamp_millis() - pair[0].open_time.timestamp_millis();
        if delta > step {
            gaps.push((
                pair[0].open_time + timeframe.duration(),
                pair[1].open_time,
            ));
        }
    }
    gaps
}

impl DataLoader {
    pub fn new(api: Arc<BinanceFutures>, store: CandleStore, cfg: LoaderSettings) -> Self {
        DataLoader { api, store, cfg }
    }

    pub fn store(&self) -> &CandleStore {
        &self.store
    }

    /// Bring the given timeframes of one symbol up to date. Skips
    /// timeframes whose stored series already covers the current period.
    pub async fn refresh_recent(
        &self,
        symbol: &str,
        timeframes: &[Timeframe],
        now: DateTime<Utc>,
    ) -> Result<RefreshOutcome> {
        let mut outcome = RefreshOutcome::default();
        for &tf in timeframes {
            outcome += self.refresh_timeframe(symbol, tf, now).await?;
        }
        Ok(outcome)
    }

    async fn refresh_timeframe(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<RefreshOutcome> {
        let last_close = self.store.latest_close_time(symbol, timeframe).await?;
        if !needs_refresh(last_close, timeframe, now) {
            debug!(symbol, tf = %timeframe, "series fresh, skipping API call");
            return Ok(RefreshOutcome::default());
        }

        let start = match last_close {
            // Refetch from the last stored bar so a revised just-closed
            // candle gets replaced.
            Some(close) => close - timeframe.duration(),
            None => now - chrono::Duration::days(self.cfg.warm_up_days),
        };

        let gap_bars =
            (now.timestamp_millis() - start.timestamp_millis()) / timeframe.millis() + 1;
        if gap_bars > PAGE_LIMIT as i64 {
            return self.backfill_gap(symbol, timeframe, start, now).await;
        }

        let limit = (gap_bars.max(2) as u32).min(PAGE_LIMIT);
        let deadline = Instant::now() + Duration::from_secs(self.cfg.symbol_budget_sec);
        let fetched = self
            .api
            .klines(
                symbol,
                timeframe,
                limit,
                Some(start.timestamp_millis()),
                None,
                deadline,
            )
            .await?;

        let closed: Vec<Candle> = fetched.into_iter().filter(|c| c.is_closed(now)).collect();
        let rows = self.store.upsert_candles(symbol, timeframe, &closed).await?;
        debug!(symbol, tf = %timeframe, rows, "refreshed");
        Ok(RefreshOutcome {
            api_calls: 1,
            rows_upserted: rows,
        })
    }

    /// Fill [from, to) page by page, respecting the per-request cap and
    /// the rate budget (each page reserves weight inside the client).
    pub async fn backfill_gap(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<RefreshOutcome> {
        let mut outcome = RefreshOutcome::default();
        let mut cursor = from;
        let now = Utc::now();

        while cursor < to {
            let deadline = Instant::now() + Duration::from_secs(self.cfg.symbol_budget_sec);
            let fetched = self
                .api
                .klines(
                    symbol,
                    timeframe,
                    PAGE_LIMIT,
                    Some(cursor.timestamp_millis()),
                    Some(to.timestamp_millis()),
                    deadline,
                )
                .await?;
            outcome.api_calls += 1;

            if fetched.is_empty() {
                break;
            }
            let last_open = fetched.last().map(|c| c.open_time).unwrap_or(to);
            let closed: Vec<Candle> = fetched.into_iter().filter(|c| c.is_closed(now)).collect();
            outcome.rows_upserted += self.store.upsert_candles(symbol, timeframe, &closed).await?;

            let next = last_open + timeframe.duration();
            if next <= cursor {
                break;
            }
            cursor = next;
        }

        info!(
            symbol,
            tf = %timeframe,
            calls = outcome.api_calls,
            rows = outcome.rows_upserted,
            "backfill complete"
        );
        Ok(outcome)
    }

    /// Detect and repair gaps in the stored tail that are younger than
    /// the refresh horizon.
    pub async fn ensure_dense(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<RefreshOutcome> {
        let tail = self
            .store
            .recent_candles(symbol, timeframe, 300, now)
            .await?;
        let horizon = now - chrono::Duration::days(self.cfg.refresh_horizon_days);

        let mut outcome = RefreshOutcome::default();
        for (gap_from, gap_to) in detect_gaps(&tail, timeframe) {
            if gap_to < horizon {
                debug!(symbol, tf = %timeframe, "gap older than horizon, leaving as is");
                continue;
            }
            warn!(symbol, tf = %timeframe, from = %gap_from, to = %gap_to, "repairing gap");
            outcome += self.backfill_gap(symbol, timeframe, gap_from, gap_to).await?;
        }
        Ok(outcome)
    }

    /// Most recent `n` closed candles, oldest first.
    pub async fn recent_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        self.store.recent_candles(symbol, timeframe, n, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn candle_at(tf: Timeframe, open_ms: i64) -> Candle {
        Candle {
            open_time: dt(open_ms),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 10.0,
            close_time: dt(open_ms + tf.millis() - 1),
            quote_volume: 1000.0,
            taker_buy_base: 5.0,
        }
    }

    #[test]
    fn needs_refresh_true_without_history() {
        assert!(needs_refresh(None, Timeframe::M15, Utc::now()));
    }

    #[test]
    fn freshness_short_circuit_when_current_period_covered() {
        let tf = Timeframe::M15;
        let boundary = 1_700_000_100_000 / tf.millis() * tf.millis();
        let now = dt(boundary + 35_000); // 35s into the current bar
        let last_close = dt(boundary - 1); // previous bar fully stored

        assert!(!needs_refresh(Some(last_close), tf, now));
        // One bar behind: refresh required.
        let stale_close = dt(boundary - tf.millis() - 1);
        assert!(needs_refresh(Some(stale_close), tf, now));
    }

    #[test]
    fn detect_gaps_finds_missing_bars() {
        let tf = Timeframe::M15;
        let base = 1_700_000_100_000 / tf.millis() * tf.millis();
        let series = vec![
            candle_at(tf, base),
            candle_at(tf, base + tf.millis()),
            // two bars missing here
            candle_at(tf, base + 4 * tf.millis()),
        ];
        let gaps = detect_gaps(&series, tf);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].0.timestamp_millis(), base + 2 * tf.millis());
        assert_eq!(gaps[0].1.timestamp_millis(), base + 4 * tf.millis());
    }

    #[test]
    fn dense_series_has_no_gaps() {
        let tf = Timeframe::H1;
        let base = 1_700_000_000_000 / tf.millis() * tf.millis();
        let series: Vec<Candle> = (0..10).map(|i| candle_at(tf, base + i * tf.millis())).collect();
        assert!(detect_gaps(&series, tf).is_empty());
    }
}
