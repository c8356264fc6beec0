use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use common::config::RateSettings;
use common::{Error, Result};

/// Proof that weight was admitted into the current minute bucket. The
/// weight stays consumed for the rest of the window; there is nothing to
/// release.
#[derive(Debug, Clone, Copy)]
pub struct Permit {
    pub weight: u32,
}

/// Emitted exactly once per ban episode.
#[derive(Debug, Clone)]
pub struct BanNotice {
    pub until: DateTime<Utc>,
}

/// Snapshot of the ledger for health reporting.
#[derive(Debug, Clone, Copy)]
pub struct RateUsage {
    pub weight_used: u32,
    pub threshold: u32,
    pub hard_limit: u32,
    pub banned: bool,
    /// Whether the counter has ever been reconciled against a server
    /// response.
    pub reconciled: bool,
}

impl RateUsage {
    pub fn percent_of_hard_limit(&self) -> f64 {
        self.weight_used as f64 / self.hard_limit as f64 * 100.0
    }
}

struct Ledger {
    bucket_start: Instant,
    weight_used: u32,
    ban_until: Option<Instant>,
    ban_until_wall: Option<DateTime<Utc>>,
    ban_notified: bool,
    reset_observed_at: Option<Instant>,
}

/// Minute-bucket weight ledger mirroring the exchange's request-weight
/// counter. All outbound requests must pass through [`reserve`] before
/// hitting the wire; skipping it is a programming error.
///
/// [`reserve`]: RateLimiter::reserve
pub struct RateLimiter {
    threshold: u32,
    hard_limit: u32,
    window: Duration,
    ban_grace: Duration,
    state: Mutex<Ledger>,
    ban_tx: broadcast::Sender<BanNotice>,
}

impl RateLimiter {
    pub fn new(cfg: &RateSettings) -> Self {
        let (ban_tx, _) = broadcast::channel(8);
        RateLimiter {
            threshold: cfg.threshold(),
            hard_limit: cfg.hard_limit_per_min,
            window: Duration::from_millis(cfg.minute_window_ms),
            ban_grace: Duration::from_millis(cfg.ban_grace_ms),
            state: Mutex::new(Ledger {
                bucket_start: Instant::now(),
                weight_used: 0,
                ban_until: None,
                ban_until_wall: None,
                ban_notified: false,
                reset_observed_at: None,
            }),
            ban_tx,
        }
    }

    /// Subscribe to ban notifications. One notice per ban episode;
    /// duplicates are suppressed until the ban clears.
    pub fn subscribe_bans(&self) -> broadcast::Receiver<BanNotice> {
        self.ban_tx.subscribe()
    }

    /// Atomically admit `weight` into the current minute bucket.
    ///
    /// Suspends until the bucket resets when the projected usage would
    /// reach the threshold. Fails fast with `RateCapped` when the bucket
    /// cannot reset before `deadline`, and with `Banned` while a ban is
    /// in force past the deadline.
    pub async fn reserve(&self, weight: u32, deadline: Instant) -> Result<Permit> {
        loop {
            let wait_until = {
                let mut s = self.state.lock().await;
                let now = Instant::now();

                if let Some(until) = s.ban_until {
                    if now >= until {
                        s.ban_until = None;
                        s.ban_until_wall = None;
                        s.ban_notified = false;
                        debug!("ban cleared, resuming reservations");
                    } else if until > deadline {
                        return Err(Error::Banned {
                            until: s.ban_until_wall.unwrap_or_else(Utc::now),
                        });
                    } else {
                        drop(s);
                        tokio::time::sleep_until(until).await;
                        continue;
                    }
                }

                if now.duration_since(s.bucket_start) >= self.window {
                    s.bucket_start = now;
                    s.weight_used = 0;
                }

                // The threshold is a safety margin below the hard limit;
                // projected usage reaching it exactly already defers.
                if s.weight_used + weight < self.threshold {
                    s.weight_used += weight;
                    return Ok(Permit { weight });
                }

                let reset_at = s.bucket_start + self.window;
                if reset_at > deadline {
                    return Err(Error::RateCapped);
                }
                warn!(
                    used = s.weight_used,
                    weight,
                    threshold = self.threshold,
                    "weight bucket full, deferring until reset"
                );
                reset_at
            };
            tokio::time::sleep_until(wait_until).await;
        }
    }

    /// Reconcile the local counter with the weight the exchange reports
    /// on every response. A server value below ours means the server has
    /// rolled into a new minute; resync without accumulating drift.
    pub async fn observe_used(&self, server_used: u32) {
        let mut s = self.state.lock().await;
        let now = Instant::now();
        if server_used < s.weight_used {
            s.bucket_start = now;
        }
        s.weight_used = server_used;
        s.reset_observed_at = Some(now);
    }

    /// Block all reservations until `until` (plus the configured grace).
    /// The first trip of an episode broadcasts a notice; repeats while
    /// the ban is in force are silent.
    pub async fn trip_ban(&self, until: DateTime<Utc>) {
        let mut s = self.state.lock().await;
        let now_wall = Utc::now();
        let remaining = (until - now_wall)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .saturating_add(self.ban_grace);
        let instant = Instant::now() + remaining;

        let extends = match s.ban_until {
            Some(existing) => instant > existing,
            None => true,
        };
        if extends {
            s.ban_until = Some(instant);
            s.ban_until_wall = Some(until);
        }
        if !s.ban_notified {
            s.ban_notified = true;
            warn!(until = %until, "exchange ban tripped, blocking all requests");
            let _ = self.ban_tx.send(BanNotice { until });
        }
    }

    pub async fn usage(&self) -> RateUsage {
        let mut s = self.state.lock().await;
        let now = Instant::now();
        if now.duration_since(s.bucket_start) >= self.window {
            s.bucket_start = now;
            s.weight_used = 0;
        }
        RateUsage {
            weight_used: s.weight_used,
            threshold: self.threshold,
            hard_limit: self.hard_limit,
            banned: s.ban_until.is_some_and(|u| u > now),
            reconciled: s.reset_observed_at.is_some(),
        }
    }
}
