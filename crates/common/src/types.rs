use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Candle timeframes the engine trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
pub enum Timeframe {
    #[serde(rename = "15m")]
    #[sqlx(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    #[sqlx(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    #[sqlx(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    #[sqlx(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1];

    /// Canonical bar duration.
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M15 => Duration::from_secs(15 * 60),
            Timeframe::H1 => Duration::from_secs(60 * 60),
            Timeframe::H4 => Duration::from_secs(4 * 60 * 60),
            Timeframe::D1 => Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn millis(&self) -> i64 {
        self.duration().as_millis() as i64
    }

    /// Binance kline interval string.
    pub fn interval(&self) -> &'static str {
        match self {
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Open time of the bar containing `ts`, aligned to the UTC grid.
    pub fn align(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let ms = self.millis();
        let aligned = ts.timestamp_millis() / ms * ms;
        DateTime::from_timestamp_millis(aligned).unwrap_or(ts)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.interval())
    }
}

impl FromStr for Timeframe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(Error::Config(format!("unknown timeframe '{other}'"))),
        }
    }
}

/// Trade direction of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for LONG, -1 for SHORT.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// Signed return in percent from `entry` to `exit` for this direction.
    pub fn return_pct(&self, entry: f64, exit: f64) -> f64 {
        if entry == 0.0 {
            return 0.0;
        }
        self.sign() * (exit - entry) / entry * 100.0
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Signal lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum SignalStatus {
    Pending,
    Active,
    Closed,
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalStatus::Pending => write!(f, "PENDING"),
            SignalStatus::Active => write!(f, "ACTIVE"),
            SignalStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Why a signal reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
pub enum ExitReason {
    #[serde(rename = "TP1")]
    #[sqlx(rename = "TP1")]
    Tp1,
    #[serde(rename = "TP2")]
    #[sqlx(rename = "TP2")]
    Tp2,
    #[serde(rename = "TRAILING")]
    #[sqlx(rename = "TRAILING")]
    Trailing,
    #[serde(rename = "STOP_LOSS")]
    #[sqlx(rename = "STOP_LOSS")]
    StopLoss,
    #[serde(rename = "BREAKEVEN")]
    #[sqlx(rename = "BREAKEVEN")]
    Breakeven,
    #[serde(rename = "TIME_STOP")]
    #[sqlx(rename = "TIME_STOP")]
    TimeStop,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::Tp1 => "TP1",
            ExitReason::Tp2 => "TP2",
            ExitReason::Trailing => "TRAILING",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::Breakeven => "BREAKEVEN",
            ExitReason::TimeStop => "TIME_STOP",
        };
        f.write_str(s)
    }
}

/// Discrete market-state label from the regime detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum Regime {
    Trend,
    Squeeze,
    Range,
    Chop,
    Undecided,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Regime::Trend => "TREND",
            Regime::Squeeze => "SQUEEZE",
            Regime::Range => "RANGE",
            Regime::Chop => "CHOP",
            Regime::Undecided => "UNDECIDED",
        };
        f.write_str(s)
    }
}

/// Higher-timeframe directional bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

impl Bias {
    pub fn agrees_with(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Bias::Bullish, Direction::Long) | (Bias::Bearish, Direction::Short)
        )
    }
}

/// Strategy category used by the scorer's regime-affinity refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyCategory {
    Breakout,
    Pullback,
    MeanReversion,
    Momentum,
}

/// One OHLCV bar. Symbol and timeframe are carried by the series, not the
/// bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: DateTime<Utc>,
    pub quote_volume: f64,
    pub taker_buy_base: f64,
}

impl Candle {
    /// A candle participates in evaluation only once fully closed.
    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        now >= self.close_time
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.close.max(self.open)
    }

    pub fn lower_wick(&self) -> f64 {
        self.close.min(self.open) - self.low
    }

    /// Taker sell volume derived from total and taker-buy volume.
    pub fn taker_sell_base(&self) -> f64 {
        (self.volume - self.taker_buy_base).max(0.0)
    }
}

/// Support or resistance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneKind {
    Support,
    Resistance,
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneKind::Support => write!(f, "S"),
            ZoneKind::Resistance => write!(f, "R"),
        }
    }
}

/// An S/R zone owned by the per-symbol zone registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub timeframe: Timeframe,
    pub kind: ZoneKind,
    pub low: f64,
    pub high: f64,
    /// Touch count weighted by recency.
    pub strength: f64,
    pub touches: Vec<DateTime<Utc>>,
    /// Reaction magnitudes (in price units) observed at each touch.
    pub reactions: Vec<f64>,
    /// 1.0 = freshly touched, decays toward 0 as the zone ages.
    pub freshness: f64,
    /// True once price traded through and the zone changed polarity.
    pub flipped: bool,
}

impl Zone {
    pub fn mid(&self) -> f64 {
        (self.low + self.high) / 2.0
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.low && price <= self.high
    }

    /// Distance from `price` to the nearest zone edge; 0 inside the zone.
    pub fn distance_to(&self, price: f64) -> f64 {
        if self.contains(price) {
            0.0
        } else if price < self.low {
            self.low - price
        } else {
            price - self.high
        }
    }
}

/// Confirming factors a strategy can assert about its own proposal. The
/// scorer combines these with exogenous factors for the multi-factor gate.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FactorFlags {
    /// Trigger bar shows a recognizable price-action pattern.
    pub pattern: bool,
    /// Entry sits in confluence with an S/R zone.
    pub zone_confluence: bool,
    /// Trigger volume cleared the strategy's own volume bar.
    pub volume_surge: bool,
}

/// A strategy's raw output for one (symbol, cycle), before scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub strategy: &'static str,
    pub category: StrategyCategory,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub entry: f64,
    pub sl: f64,
    pub tp1: f64,
    pub tp2: Option<f64>,
    pub tp3: Option<f64>,
    pub base_score: f64,
    pub factors: FactorFlags,
}

impl Proposal {
    /// Level-ordering invariant: sl < entry < tp1 < tp2 < tp3 for LONG,
    /// mirrored for SHORT.
    pub fn levels_ordered(&self) -> bool {
        let seq = [
            Some(self.sl),
            Some(self.entry),
            Some(self.tp1),
            self.tp2,
            self.tp3,
        ];
        let mut prev: Option<f64> = None;
        for level in seq.into_iter().flatten() {
            if let Some(p) = prev {
                let ok = match self.direction {
                    Direction::Long => p < level,
                    Direction::Short => p > level,
                };
                if !ok {
                    return false;
                }
            }
            prev = Some(level);
        }
        true
    }
}

/// Action Price entry mode chosen from the total score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum ApMode {
    Standard,
    Scalp,
}

impl fmt::Display for ApMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApMode::Standard => write!(f, "STANDARD"),
            ApMode::Scalp => write!(f, "SCALP"),
        }
    }
}

/// Body-cross context persisted alongside an Action Price signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPriceContext {
    pub mode: ApMode,
    pub score_total: f64,
    pub components: BTreeMap<String, f64>,
    pub initiator_time: DateTime<Utc>,
    pub confirm_open: f64,
    pub confirm_high: f64,
    pub confirm_low: f64,
    pub confirm_close: f64,
    pub ema200_at_entry: f64,
}

/// Key of the per-strategy signal lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub symbol: String,
    pub direction: Direction,
    pub strategy: String,
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.symbol, self.direction, self.strategy)
    }
}

/// A tracked signal. The performance tracker is the only mutator of the
/// lifecycle fields once the signal is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub strategy: String,
    pub direction: Direction,
    pub timeframe: Timeframe,

    pub entry: f64,
    pub stop_loss: f64,
    /// |entry - sl at creation|. Fixed for the signal's life; MFE/MAE are
    /// expressed in multiples of this.
    pub initial_risk: f64,
    pub tp1: f64,
    pub tp2: Option<f64>,
    pub tp3: Option<f64>,
    pub atr_at_entry: f64,

    pub tp1_hit: bool,
    pub tp1_closed_at: Option<DateTime<Utc>>,
    pub tp1_pnl_pct: Option<f64>,
    pub tp2_hit: bool,
    pub tp2_closed_at: Option<DateTime<Utc>>,
    pub tp2_pnl_pct: Option<f64>,
    pub trailing_active: bool,
    pub trailing_peak: Option<f64>,

    pub status: SignalStatus,
    pub exit_reason: Option<ExitReason>,
    pub exit_price: Option<f64>,
    pub final_pnl_pct: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub bars_to_exit: Option<i64>,
    pub mfe_r: f64,
    pub mae_r: f64,

    pub market_regime: Regime,
    pub confidence_score: f64,
    pub meta: serde_json::Value,

    /// Present iff this is an Action Price signal.
    pub ap: Option<ActionPriceContext>,
}

impl Signal {
    /// Build a new ACTIVE signal from a scored proposal.
    #[allow(clippy::too_many_arguments)]
    pub fn from_proposal(
        symbol: &str,
        proposal: &Proposal,
        regime: Regime,
        confidence_score: f64,
        atr_at_entry: f64,
        created_at: DateTime<Utc>,
    ) -> Signal {
        Signal {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            strategy: proposal.strategy.to_string(),
            direction: proposal.direction,
            timeframe: proposal.timeframe,
            entry: proposal.entry,
            stop_loss: proposal.sl,
            initial_risk: (proposal.entry - proposal.sl).abs(),
            tp1: proposal.tp1,
            tp2: proposal.tp2,
            tp3: proposal.tp3,
            atr_at_entry,
            tp1_hit: false,
            tp1_closed_at: None,
            tp1_pnl_pct: None,
            tp2_hit: false,
            tp2_closed_at: None,
            tp2_pnl_pct: None,
            trailing_active: false,
            trailing_peak: None,
            status: SignalStatus::Active,
            exit_reason: None,
            exit_price: None,
            final_pnl_pct: None,
            created_at,
            closed_at: None,
            bars_to_exit: None,
            mfe_r: 0.0,
            mae_r: 0.0,
            market_regime: regime,
            confidence_score,
            meta: serde_json::Value::Null,
            ap: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status == SignalStatus::Closed
    }

    pub fn lock_key(&self) -> LockKey {
        LockKey {
            symbol: self.symbol.clone(),
            direction: self.direction,
            strategy: self.strategy.clone(),
        }
    }

    /// Signed return in percent from entry to `price`.
    pub fn return_pct(&self, price: f64) -> f64 {
        self.direction.return_pct(self.entry, price)
    }

    /// Level-ordering invariant at creation time: sl < entry < tp1 <
    /// tp2 < tp3 for LONG, mirrored for SHORT.
    pub fn levels_consistent(&self) -> bool {
        let seq = [
            Some(self.stop_loss),
            Some(self.entry),
            Some(self.tp1),
            self.tp2,
            self.tp3,
        ];
        let mut prev: Option<f64> = None;
        for level in seq.into_iter().flatten() {
            if let Some(p) = prev {
                let ok = match self.direction {
                    Direction::Long => p < level,
                    Direction::Short => p > level,
                };
                if !ok {
                    return false;
                }
            }
            prev = Some(level);
        }
        true
    }

    /// Bars elapsed since creation on the signal's timeframe.
    pub fn bars_since_entry(&self, now: DateTime<Utc>) -> i64 {
        let elapsed_ms = (now - self.created_at).num_milliseconds();
        if elapsed_ms <= 0 {
            return 0;
        }
        elapsed_ms / self.timeframe.millis()
    }
}

/// Exogenous BTC trend fact handed to strategies and the scorer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BtcTrend {
    /// Percent change of BTC 1h close over a 3-bar lookback.
    pub pct_3bar: f64,
}

impl BtcTrend {
    /// Direction of the BTC move when it exceeds `noise_pct`, else None.
    pub fn direction(&self, noise_pct: f64) -> Option<Direction> {
        if self.pct_3bar > noise_pct {
            Some(Direction::Long)
        } else if self.pct_3bar < -noise_pct {
            Some(Direction::Short)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_align_snaps_to_grid() {
        let ts = DateTime::from_timestamp_millis(1_700_000_123_456).unwrap();
        let aligned = Timeframe::M15.align(ts);
        assert_eq!(aligned.timestamp_millis() % Timeframe::M15.millis(), 0);
        assert!(aligned <= ts);
        assert!(ts.timestamp_millis() - aligned.timestamp_millis() < Timeframe::M15.millis());
    }

    #[test]
    fn direction_return_pct_is_signed() {
        assert!((Direction::Long.return_pct(100.0, 102.0) - 2.0).abs() < 1e-9);
        assert!((Direction::Short.return_pct(50.0, 48.5) - 3.0).abs() < 1e-9);
        assert!((Direction::Short.return_pct(50.0, 51.0) + 2.0).abs() < 1e-9);
    }

    #[test]
    fn proposal_level_ordering_long_and_short() {
        let mut p = Proposal {
            strategy: "test",
            category: StrategyCategory::Breakout,
            timeframe: Timeframe::M15,
            direction: Direction::Long,
            entry: 100.0,
            sl: 98.0,
            tp1: 102.0,
            tp2: Some(104.0),
            tp3: None,
            base_score: 2.0,
            factors: FactorFlags::default(),
        };
        assert!(p.levels_ordered());

        p.tp2 = Some(101.0); // out of order
        assert!(!p.levels_ordered());

        let s = Proposal {
            direction: Direction::Short,
            entry: 50.0,
            sl: 51.0,
            tp1: 49.0,
            tp2: Some(48.5),
            ..p.clone()
        };
        assert!(s.levels_ordered());
    }

    #[test]
    fn btc_trend_direction_respects_noise_band() {
        let t = BtcTrend { pct_3bar: 0.2 };
        assert_eq!(t.direction(0.3), None);
        let t = BtcTrend { pct_3bar: 0.5 };
        assert_eq!(t.direction(0.3), Some(Direction::Long));
        let t = BtcTrend { pct_3bar: -0.4 };
        assert_eq!(t.direction(0.3), Some(Direction::Short));
    }

    #[test]
    fn bars_since_entry_uses_timeframe_duration() {
        let created = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let mut sig = Signal::from_proposal(
            "BTCUSDT",
            &Proposal {
                strategy: "test",
                category: StrategyCategory::Breakout,
                timeframe: Timeframe::M15,
                direction: Direction::Long,
                entry: 100.0,
                sl: 99.0,
                tp1: 101.0,
                tp2: None,
                tp3: None,
                base_score: 2.0,
                factors: FactorFlags::default(),
            },
            Regime::Trend,
            3.0,
            0.5,
            created,
        );
        sig.created_at = created;
        let now = created + chrono::Duration::minutes(15 * 12);
        assert_eq!(sig.bars_since_entry(now), 12);
        let now = created + chrono::Duration::minutes(15 * 12 - 1);
        assert_eq!(sig.bars_since_entry(now), 11);
    }
}
