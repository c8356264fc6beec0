use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use common::{LockKey, Result, Signal};

/// DB-backed keyed mutex over (symbol, direction, strategy).
///
/// At most one non-expired row per triple; acquisition is one atomic
/// conditional insert. Locks expire on TTL or explicit release.
#[derive(Clone)]
pub struct LockManager {
    pool: SqlitePool,
    ttl_sec: i64,
}

impl LockManager {
    pub fn new(pool: SqlitePool, ttl_sec: i64) -> Self {
        LockManager { pool, ttl_sec }
    }

    /// Try to take the lock. Returns false when a live lock exists.
    pub async fn try_acquire(&self, key: &LockKey) -> Result<bool> {
        self.try_acquire_at(key, Utc::now()).await
    }

    pub async fn try_acquire_at(&self, key: &LockKey, now: DateTime<Utc>) -> Result<bool> {
        let now_ms = now.timestamp_millis();

        // Clear an expired holder first so the insert below stays a
        // single atomic conditional.
        sqlx::query(
            "DELETE FROM signal_locks \
             WHERE symbol = ?1 AND direction = ?2 AND strategy = ?3 \
               AND acquired_at + ttl_sec * 1000 <= ?4",
        )
        .bind(&key.symbol)
        .bind(key.direction)
        .bind(&key.strategy)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO signal_locks \
             (symbol, direction, strategy, acquired_at, ttl_sec) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&key.symbol)
        .bind(key.direction)
        .bind(&key.strategy)
        .bind(now_ms)
        .bind(self.ttl_sec)
        .execute(&self.pool)
        .await?;

        let acquired = result.rows_affected() == 1;
        if acquired {
            debug!(key = %key, ttl_sec = self.ttl_sec, "lock acquired");
        } else {
            warn!(key = %key, "lock denied: already held");
        }
        Ok(acquired)
    }

    pub async fn release(&self, key: &LockKey) -> Result<()> {
        sqlx::query(
            "DELETE FROM signal_locks WHERE symbol = ?1 AND direction = ?2 AND strategy = ?3",
        )
        .bind(&key.symbol)
        .bind(key.direction)
        .bind(&key.strategy)
        .execute(&self.pool)
        .await?;
        debug!(key = %key, "lock released");
        Ok(())
    }

    /// Rebuild locks from the ACTIVE signals at process start so a
    /// restart cannot duplicate-emit. Missing locks are recreated from
    /// the signal's triple.
    pub async fn rebuild(&self, active: &[Signal]) -> Result<()> {
        let mut recreated = 0u32;
        for signal in active {
            if self.try_acquire(&signal.lock_key()).await? {
                recreated += 1;
            }
        }
        info!(
            active = active.len(),
            recreated, "signal locks rebuilt from active signals"
        );
        Ok(())
    }

    pub async fn held_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM signal_locks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Direction;

    async fn manager(ttl_sec: i64) -> LockManager {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("../../migrations").run(&pool).await.unwrap();
        LockManager::new(pool, ttl_sec)
    }

    fn key(symbol: &str, direction: Direction, strategy: &str) -> LockKey {
        LockKey {
            symbol: symbol.to_string(),
            direction,
            strategy: strategy.to_string(),
        }
    }

    #[tokio::test]
    async fn second_acquire_of_same_key_is_denied() {
        let locks = manager(3600).await;
        let k = key("BTCUSDT", Direction::Long, "Break & Retest");
        assert!(locks.try_acquire(&k).await.unwrap());
        assert!(!locks.try_acquire(&k).await.unwrap());
    }

    #[tokio::test]
    async fn different_strategies_lock_independently() {
        // Two strategies may both go LONG BTC in the same cycle; each
        // holds its own lock.
        let locks = manager(3600).await;
        assert!(locks
            .try_acquire(&key("BTCUSDT", Direction::Long, "Break & Retest"))
            .await
            .unwrap());
        assert!(locks
            .try_acquire(&key("BTCUSDT", Direction::Long, "Liquidity Sweep"))
            .await
            .unwrap());
        assert_eq!(locks.held_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn long_and_short_use_different_locks() {
        let locks = manager(3600).await;
        assert!(locks
            .try_acquire(&key("BTCUSDT", Direction::Long, "Break & Retest"))
            .await
            .unwrap());
        assert!(locks
            .try_acquire(&key("BTCUSDT", Direction::Short, "Break & Retest"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn release_frees_the_key() {
        let locks = manager(3600).await;
        let k = key("ETHUSDT", Direction::Short, "ATR Momentum");
        assert!(locks.try_acquire(&k).await.unwrap());
        locks.release(&k).await.unwrap();
        assert!(locks.try_acquire(&k).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_is_reclaimable() {
        let locks = manager(60).await;
        let k = key("ETHUSDT", Direction::Long, "Order Flow");
        let t0 = Utc::now();
        assert!(locks.try_acquire_at(&k, t0).await.unwrap());

        // Within TTL: denied. After TTL: reclaimed.
        let t1 = t0 + chrono::Duration::seconds(59);
        assert!(!locks.try_acquire_at(&k, t1).await.unwrap());
        let t2 = t0 + chrono::Duration::seconds(60);
        assert!(locks.try_acquire_at(&k, t2).await.unwrap());
    }
}
