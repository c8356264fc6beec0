use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use common::{
    ActionPriceContext, ApMode, Direction, Error, ExitReason, Regime, Result, Signal,
    SignalStatus, Timeframe,
};

/// Signal persistence over the `signals` and `action_price_signals`
/// tables. The two share the lifecycle skeleton; the Action Price table
/// adds the body-cross context columns.
#[derive(Clone)]
pub struct SignalStore {
    pool: SqlitePool,
}

/// Aggregate performance for the stats surface. Win rate counts by
/// terminal exit reason only.
#[derive(Debug, Clone, Default)]
pub struct PerfStats {
    pub total: u32,
    pub closed: u32,
    pub active: u32,
    pub wins: u32,
    pub losses: u32,
    pub time_stops: u32,
    pub win_rate: f64,
    pub total_pnl_pct: f64,
    pub avg_pnl_pct: f64,
    pub by_exit_reason: BTreeMap<String, u32>,
}

fn table_for(signal: &Signal) -> &'static str {
    if signal.ap.is_some() {
        "action_price_signals"
    } else {
        "signals"
    }
}

fn ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn opt_ms(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp_millis())
}

fn from_ms(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::Invariant(format!("stored timestamp {ms} out of range")))
}

fn opt_from_ms(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_ms).transpose()
}

impl SignalStore {
    pub fn new(pool: SqlitePool) -> Self {
        SignalStore { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist a new signal into the table matching its kind.
    pub async fn insert(&self, signal: &Signal) -> Result<()> {
        let meta = match &signal.meta {
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        };

        let common_cols = "id, symbol, strategy, direction, timeframe, entry, stop_loss, \
             initial_risk, tp1, tp2, tp3, atr_at_entry, tp1_hit, tp1_closed_at, tp1_pnl_pct, \
             tp2_hit, tp2_closed_at, tp2_pnl_pct, trailing_active, trailing_peak, status, \
             exit_reason, exit_price, final_pnl_pct, created_at, closed_at, bars_to_exit, \
             mfe_r, mae_r, market_regime, confidence_score, meta";

        if let Some(ap) = &signal.ap {
            let sql = format!(
                "INSERT INTO action_price_signals ({common_cols}, mode, score_total, \
                 score_components, initiator_time, confirm_open, confirm_high, confirm_low, \
                 confirm_close, ema200_at_entry) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
                 ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, \
                 ?33, ?34, ?35, ?36, ?37, ?38, ?39, ?40, ?41)"
            );
            self.bind_common(sqlx::query(&sql), signal, meta)
                .bind(ap.mode)
                .bind(ap.score_total)
                .bind(serde_json::to_string(&ap.components)?)
                .bind(ms(ap.initiator_time))
                .bind(ap.confirm_open)
                .bind(ap.confirm_high)
                .bind(ap.confirm_low)
                .bind(ap.confirm_close)
                .bind(ap.ema200_at_entry)
                .execute(&self.pool)
                .await?;
        } else {
            let sql = format!(
                "INSERT INTO signals ({common_cols}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
                 ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32)"
            );
            self.bind_common(sqlx::query(&sql), signal, meta)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    fn bind_common<'q>(
        &self,
        query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        signal: &'q Signal,
        meta: Option<String>,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        query
            .bind(&signal.id)
            .bind(&signal.symbol)
            .bind(&signal.strategy)
            .bind(signal.direction)
            .bind(signal.timeframe)
            .bind(signal.entry)
            .bind(signal.stop_loss)
            .bind(signal.initial_risk)
            .bind(signal.tp1)
            .bind(signal.tp2)
            .bind(signal.tp3)
            .bind(signal.atr_at_entry)
            .bind(signal.tp1_hit)
            .bind(opt_ms(signal.tp1_closed_at))
            .bind(signal.tp1_pnl_pct)
            .bind(signal.tp2_hit)
            .bind(opt_ms(signal.tp2_closed_at))
            .bind(signal.tp2_pnl_pct)
            .bind(signal.trailing_active)
            .bind(signal.trailing_peak)
            .bind(signal.status)
            .bind(signal.exit_reason)
            .bind(signal.exit_price)
            .bind(signal.final_pnl_pct)
            .bind(ms(signal.created_at))
            .bind(opt_ms(signal.closed_at))
            .bind(signal.bars_to_exit)
            .bind(signal.mfe_r)
            .bind(signal.mae_r)
            .bind(signal.market_regime)
            .bind(signal.confidence_score)
            .bind(meta)
    }

    /// Persist a tracker transition. Only lifecycle fields change after
    /// creation.
    pub async fn update(&self, signal: &Signal) -> Result<()> {
        let table = table_for(signal);
        let sql = format!(
            "UPDATE {table} SET stop_loss = ?1, tp1_hit = ?2, tp1_closed_at = ?3, \
             tp1_pnl_pct = ?4, tp2_hit = ?5, tp2_closed_at = ?6, tp2_pnl_pct = ?7, \
             trailing_active = ?8, trailing_peak = ?9, status = ?10, exit_reason = ?11, \
             exit_price = ?12, final_pnl_pct = ?13, closed_at = ?14, bars_to_exit = ?15, \
             mfe_r = ?16, mae_r = ?17 WHERE id = ?18"
        );
        sqlx::query(&sql)
            .bind(signal.stop_loss)
            .bind(signal.tp1_hit)
            .bind(opt_ms(signal.tp1_closed_at))
            .bind(signal.tp1_pnl_pct)
            .bind(signal.tp2_hit)
            .bind(opt_ms(signal.tp2_closed_at))
            .bind(signal.tp2_pnl_pct)
            .bind(signal.trailing_active)
            .bind(signal.trailing_peak)
            .bind(signal.status)
            .bind(signal.exit_reason)
            .bind(signal.exit_price)
            .bind(signal.final_pnl_pct)
            .bind(opt_ms(signal.closed_at))
            .bind(signal.bars_to_exit)
            .bind(signal.mfe_r)
            .bind(signal.mae_r)
            .bind(&signal.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All non-terminal signals from both tables.
    pub async fn active_signals(&self) -> Result<Vec<Signal>> {
        let mut signals = Vec::new();
        for table in ["signals", "action_price_signals"] {
            let sql = format!(
                "SELECT * FROM {table} WHERE status IN ('PENDING', 'ACTIVE') ORDER BY created_at"
            );
            let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
            for row in rows {
                signals.push(row_to_signal(&row, table == "action_price_signals")?);
            }
        }
        Ok(signals)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Signal>> {
        for table in ["signals", "action_price_signals"] {
            let sql = format!("SELECT * FROM {table} WHERE id = ?1");
            if let Some(row) = sqlx::query(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
            {
                return Ok(Some(row_to_signal(&row, table == "action_price_signals")?));
            }
        }
        Ok(None)
    }

    /// Performance over the trailing `days`, optionally for one
    /// strategy. Wins and losses count by terminal exit reason.
    pub async fn performance(&self, days: i64, strategy: Option<&str>) -> Result<PerfStats> {
        let since = (Utc::now() - chrono::Duration::days(days)).timestamp_millis();
        let mut signals = Vec::new();
        for table in ["signals", "action_price_signals"] {
            let sql = match strategy {
                Some(_) => format!(
                    "SELECT * FROM {table} WHERE created_at >= ?1 AND strategy = ?2"
                ),
                None => format!("SELECT * FROM {table} WHERE created_at >= ?1"),
            };
            let mut query = sqlx::query(&sql).bind(since);
            if let Some(name) = strategy {
                query = query.bind(name);
            }
            for row in query.fetch_all(&self.pool).await? {
                signals.push(row_to_signal(&row, table == "action_price_signals")?);
            }
        }

        let mut stats = PerfStats {
            total: signals.len() as u32,
            ..PerfStats::default()
        };
        let mut pnl_sum = 0.0;
        let mut pnl_count = 0u32;
        for signal in &signals {
            if !signal.is_terminal() {
                stats.active += 1;
                continue;
            }
            stats.closed += 1;
            if let Some(reason) = signal.exit_reason {
                *stats.by_exit_reason.entry(reason.to_string()).or_default() += 1;
                match reason {
                    ExitReason::Tp1
                    | ExitReason::Tp2
                    | ExitReason::Trailing
                    | ExitReason::Breakeven => stats.wins += 1,
                    ExitReason::StopLoss => stats.losses += 1,
                    ExitReason::TimeStop => stats.time_stops += 1,
                }
            }
            if let Some(pnl) = signal.final_pnl_pct {
                pnl_sum += pnl;
                pnl_count += 1;
            }
        }
        stats.total_pnl_pct = pnl_sum;
        if pnl_count > 0 {
            stats.avg_pnl_pct = pnl_sum / pnl_count as f64;
        }
        if stats.closed > 0 {
            stats.win_rate = stats.wins as f64 / stats.closed as f64 * 100.0;
        }
        Ok(stats)
    }
}

fn row_to_signal(row: &SqliteRow, is_ap: bool) -> Result<Signal> {
    let ap = if is_ap {
        let components: BTreeMap<String, f64> =
            serde_json::from_str(row.try_get::<String, _>("score_components")?.as_str())?;
        Some(ActionPriceContext {
            mode: row.try_get::<ApMode, _>("mode")?,
            score_total: row.try_get("score_total")?,
            components,
            initiator_time: from_ms(row.try_get("initiator_time")?)?,
            confirm_open: row.try_get("confirm_open")?,
            confirm_high: row.try_get("confirm_high")?,
            confirm_low: row.try_get("confirm_low")?,
            confirm_close: row.try_get("confirm_close")?,
            ema200_at_entry: row.try_get("ema200_at_entry")?,
        })
    } else {
        None
    };

    let meta = match row.try_get::<Option<String>, _>("meta")? {
        Some(text) => serde_json::from_str(&text)?,
        None => serde_json::Value::Null,
    };

    Ok(Signal {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        strategy: row.try_get("strategy")?,
        direction: row.try_get::<Direction, _>("direction")?,
        timeframe: row.try_get::<Timeframe, _>("timeframe")?,
        entry: row.try_get("entry")?,
        stop_loss: row.try_get("stop_loss")?,
        initial_risk: row.try_get("initial_risk")?,
        tp1: row.try_get("tp1")?,
        tp2: row.try_get("tp2")?,
        tp3: row.try_get("tp3")?,
        atr_at_entry: row.try_get("atr_at_entry")?,
        tp1_hit: row.try_get("tp1_hit")?,
        tp1_closed_at: opt_from_ms(row.try_get("tp1_closed_at")?)?,
        tp1_pnl_pct: row.try_get("tp1_pnl_pct")?,
        tp2_hit: row.try_get("tp2_hit")?,
        tp2_closed_at: opt_from_ms(row.try_get("tp2_closed_at")?)?,
        tp2_pnl_pct: row.try_get("tp2_pnl_pct")?,
        trailing_active: row.try_get("trailing_active")?,
        trailing_peak: row.try_get("trailing_peak")?,
        status: row.try_get::<SignalStatus, _>("status")?,
        exit_reason: row.try_get::<Option<ExitReason>, _>("exit_reason")?,
        exit_price: row.try_get("exit_price")?,
        final_pnl_pct: row.try_get("final_pnl_pct")?,
        created_at: from_ms(row.try_get("created_at")?)?,
        closed_at: opt_from_ms(row.try_get("closed_at")?)?,
        bars_to_exit: row.try_get("bars_to_exit")?,
        mfe_r: row.try_get("mfe_r")?,
        mae_r: row.try_get("mae_r")?,
        market_regime: row.try_get::<Regime, _>("market_regime")?,
        confidence_score: row.try_get("confidence_score")?,
        meta,
        ap,
    })
}
