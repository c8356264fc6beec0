use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use common::{Candle, Error, Result, Timeframe};

/// Candle persistence over the `candles` table. Timestamps are stored as
/// epoch milliseconds; the unique key is (symbol, timeframe, open_time).
#[derive(Clone)]
pub struct CandleStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct CandleRow {
    open_time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    close_time: i64,
    quote_volume: f64,
    taker_buy_base: f64,
}

impl CandleRow {
    fn into_candle(self) -> Result<Candle> {
        Ok(Candle {
            open_time: ms_to_datetime(self.open_time)?,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            close_time: ms_to_datetime(self.close_time)?,
            quote_volume: self.quote_volume,
            taker_buy_base: self.taker_buy_base,
        })
    }
}

fn ms_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::Invariant(format!("stored timestamp {ms} out of range")))
}

impl CandleStore {
    pub fn new(pool: SqlitePool) -> Self {
        CandleStore { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upsert a batch; rows with an existing (symbol, timeframe,
    /// open_time) are fully replaced, since the exchange may revise a
    /// just-closed candle for several seconds.
    pub async fn upsert_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for candle in candles {
            sqlx::query(
                r#"
                INSERT INTO candles
                    (symbol, timeframe, open_time, open, high, low, close,
                     volume, close_time, quote_volume, taker_buy_base)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT (symbol, timeframe, open_time) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    close_time = excluded.close_time,
                    quote_volume = excluded.quote_volume,
                    taker_buy_base = excluded.taker_buy_base
                "#,
            )
            .bind(symbol)
            .bind(timeframe)
            .bind(candle.open_time.timestamp_millis())
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .bind(candle.close_time.timestamp_millis())
            .bind(candle.quote_volume)
            .bind(candle.taker_buy_base)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(candles.len())
    }

    /// Close time of the newest stored candle, if any.
    pub async fn latest_close_time(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<DateTime<Utc>>> {
        let row: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(close_time) FROM candles WHERE symbol = ?1 AND timeframe = ?2",
        )
        .bind(symbol)
        .bind(timeframe)
        .fetch_optional(&self.pool)
        .await?
        .flatten();

        row.map(ms_to_datetime).transpose()
    }

    /// The most recent `n` candles whose close_time <= `now`, oldest
    /// first.
    pub async fn recent_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let rows: Vec<CandleRow> = sqlx::query_as(
            r#"
            SELECT open_time, open, high, low, close, volume, close_time,
                   quote_volume, taker_buy_base
            FROM candles
            WHERE symbol = ?1 AND timeframe = ?2 AND close_time <= ?3
            ORDER BY open_time DESC
            LIMIT ?4
            "#,
        )
        .bind(symbol)
        .bind(timeframe)
        .bind(now.timestamp_millis())
        .bind(n)
        .fetch_all(&self.pool)
        .await?;

        let mut candles: Vec<Candle> = rows
            .into_iter()
            .map(CandleRow::into_candle)
            .collect::<Result<_>>()?;
        candles.reverse();
        Ok(candles)
    }

    /// Newest closed candle as of `now`.
    pub async fn latest_closed_candle(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<Option<Candle>> {
        let mut candles = self.recent_candles(symbol, timeframe, 1, now).await?;
        Ok(candles.pop())
    }

    pub async fn count(&self, symbol: &str, timeframe: Timeframe) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM candles WHERE symbol = ?1 AND timeframe = ?2")
                .bind(symbol)
                .bind(timeframe)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> CandleStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("../../migrations").run(&pool).await.unwrap();
        CandleStore::new(pool)
    }

    fn candle_on(tf: Timeframe, open_ms: i64, close: f64) -> Candle {
        Candle {
            open_time: DateTime::from_timestamp_millis(open_ms).unwrap(),
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
            close_time: DateTime::from_timestamp_millis(open_ms + tf.millis() - 1).unwrap(),
            quote_volume: 1000.0,
            taker_buy_base: 60.0,
        }
    }

    fn candle(open_ms: i64, close: f64) -> Candle {
        candle_on(Timeframe::M15, open_ms, close)
    }

    #[tokio::test]
    async fn upsert_replaces_existing_rows() {
        let store = test_store().await;
        let base = 1_700_000_100_000 / Timeframe::M15.millis() * Timeframe::M15.millis();

        store
            .upsert_candles("BTCUSDT", Timeframe::M15, &[candle(base, 100.0)])
            .await
            .unwrap();
        store
            .upsert_candles("BTCUSDT", Timeframe::M15, &[candle(base, 105.0)])
            .await
            .unwrap();

        assert_eq!(store.count("BTCUSDT", Timeframe::M15).await.unwrap(), 1);
        let now = DateTime::from_timestamp_millis(base + Timeframe::M15.millis()).unwrap();
        let candles = store
            .recent_candles("BTCUSDT", Timeframe::M15, 10, now)
            .await
            .unwrap();
        assert_eq!(candles.len(), 1);
        assert!((candles[0].close - 105.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn recent_candles_excludes_unclosed_and_orders_ascending() {
        let store = test_store().await;
        let tf_ms = Timeframe::M15.millis();
        let base = 1_700_000_100_000 / tf_ms * tf_ms;

        let batch: Vec<Candle> = (0..4).map(|i| candle(base + i * tf_ms, 100.0 + i as f64)).collect();
        store
            .upsert_candles("ETHUSDT", Timeframe::M15, &batch)
            .await
            .unwrap();

        // `now` inside the fourth bar: only three have closed.
        let now = DateTime::from_timestamp_millis(base + 3 * tf_ms + 60_000).unwrap();
        let candles = store
            .recent_candles("ETHUSDT", Timeframe::M15, 10, now)
            .await
            .unwrap();
        assert_eq!(candles.len(), 3);
        assert!(candles.windows(2).all(|w| w[0].open_time < w[1].open_time));
    }

    #[tokio::test]
    async fn latest_close_time_roundtrips() {
        let store = test_store().await;
        let tf_ms = Timeframe::H1.millis();
        let base = 1_700_000_000_000 / tf_ms * tf_ms;

        assert!(store
            .latest_close_time("BTCUSDT", Timeframe::H1)
            .await
            .unwrap()
            .is_none());

        store
            .upsert_candles("BTCUSDT", Timeframe::H1, &[candle_on(Timeframe::H1, base, 50.0)])
            .await
            .unwrap();
        let latest = store
            .latest_close_time("BTCUSDT", Timeframe::H1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.timestamp_millis(), base + tf_ms - 1);
    }
}
