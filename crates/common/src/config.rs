use serde::Deserialize;

use crate::error::{Error, Result};

/// Process configuration from environment variables, loaded once at
/// startup. Missing required variables cause an immediate panic with a
/// clear message; everything after startup uses typed errors.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Path to the TOML settings file.
    pub settings_path: String,
    /// Directory for the append-only JSONL signal journal.
    pub journal_dir: String,
    /// Exchange REST base URL. Overridable for tests.
    pub rest_base_url: String,
    /// Exchange WebSocket base URL.
    pub ws_base_url: String,
}

impl Config {
    /// Load from environment variables, reading `.env` if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Config {
            database_url: required_env("DATABASE_URL"),
            settings_path: optional_env("SETTINGS_PATH")
                .unwrap_or_else(|| "config/perpscan.toml".to_string()),
            journal_dir: optional_env("JOURNAL_DIR").unwrap_or_else(|| "journal".to_string()),
            rest_base_url: optional_env("REST_BASE_URL")
                .unwrap_or_else(|| "https://fapi.binance.com".to_string()),
            ws_base_url: optional_env("WS_BASE_URL")
                .unwrap_or_else(|| "wss://fstream.binance.com".to_string()),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Engine tuning, loaded from a TOML file. Unknown keys are rejected at
/// load so a typo never silently falls back to a default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub rate: RateSettings,
    #[serde(default)]
    pub loader: LoaderSettings,
    #[serde(default)]
    pub tracker: TrackerSettings,
    #[serde(default)]
    pub scorer: ScorerSettings,
    #[serde(default)]
    pub action_price: ActionPriceSettings,
    #[serde(default)]
    pub universe: UniverseSettings,
}

impl Settings {
    pub fn load(path: &str) -> Result<Settings> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read settings at '{path}': {e}")))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("cannot parse settings at '{path}': {e}")))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateSettings {
    /// Fraction of the hard per-minute weight limit the limiter will
    /// admit before deferring requests.
    pub threshold_fraction: f64,
    pub hard_limit_per_min: u32,
    /// Extra hold after a ban clears before requests resume.
    pub ban_grace_ms: u64,
    pub minute_window_ms: u64,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            threshold_fraction: 0.55,
            hard_limit_per_min: 2400,
            ban_grace_ms: 3000,
            minute_window_ms: 60_000,
        }
    }
}

impl RateSettings {
    /// Admissible weight per minute window.
    pub fn threshold(&self) -> u32 {
        (self.hard_limit_per_min as f64 * self.threshold_fraction).floor() as u32
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderSettings {
    /// Concurrent symbol refreshes per cycle.
    pub parallel_max: usize,
    /// Gaps younger than this are auto-fixed.
    pub refresh_horizon_days: i64,
    /// Delay after a candle close before refreshing, so the exchange has
    /// settled the bar.
    pub settle_delay_sec: u64,
    /// History depth fetched for a symbol seen for the first time.
    pub warm_up_days: i64,
    /// Per-symbol wall-clock budget within a cycle.
    pub symbol_budget_sec: u64,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            parallel_max: 50,
            refresh_horizon_days: 10,
            settle_delay_sec: 31,
            warm_up_days: 90,
            symbol_budget_sec: 45,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackerSettings {
    pub cadence_sec: u64,
    /// Bars without TP1 after which the signal is closed at market.
    pub time_stop_bars: i64,
    /// Closes stale trailing runners after TP2.
    pub post_tp2_time_stop_hours: i64,
    /// Trailing stop distance in ATR multiples.
    pub trail_atr_mult: f64,
    /// Lock time-to-live in seconds.
    pub lock_ttl_sec: i64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            cadence_sec: 60,
            time_stop_bars: 12,
            post_tp2_time_stop_hours: 72,
            trail_atr_mult: 1.2,
            lock_ttl_sec: 6 * 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScorerSettings {
    pub enter_threshold: f64,
    pub min_factors: u8,
    pub btc_penalty: f64,
    /// BTC 3-bar move below this percent is treated as noise.
    pub btc_noise_pct: f64,
}

impl Default for ScorerSettings {
    fn default() -> Self {
        Self {
            enter_threshold: 3.0,
            min_factors: 3,
            btc_penalty: 2.0,
            btc_noise_pct: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionPriceSettings {
    /// Signals with |entry - sl| / entry above this percent are rejected.
    pub max_sl_percent: f64,
    /// Minimum total score to emit at all (SCALP floor).
    pub min_total_score: f64,
    /// Total score at or above which the mode is STANDARD.
    pub standard_min_score: f64,
    pub tp2_scalp_rr: f64,
    pub tp2_standard_rr: f64,
    pub tp1_size: f64,
    pub tp2_size: f64,
    pub trail_size: f64,
    /// SL buffer beyond the initiator extreme, in ATR multiples.
    pub sl_buffer_atr: f64,
}

impl Default for ActionPriceSettings {
    fn default() -> Self {
        Self {
            max_sl_percent: 15.0,
            min_total_score: 6.0,
            standard_min_score: 8.0,
            tp2_scalp_rr: 1.5,
            tp2_standard_rr: 2.0,
            tp1_size: 0.30,
            tp2_size: 0.40,
            trail_size: 0.30,
            sl_buffer_atr: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UniverseSettings {
    /// Discover all USDT-M perpetuals from exchange info when true;
    /// otherwise trade `symbols` as configured.
    pub fetch_all: bool,
    pub symbols: Vec<String>,
    pub min_quote_volume_24h: f64,
}

impl Default for UniverseSettings {
    fn default() -> Self {
        Self {
            fetch_all: true,
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            min_quote_volume_24h: 10_000_000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_defaults_match_documented_values() {
        let s = Settings::default();
        assert!((s.rate.threshold_fraction - 0.55).abs() < 1e-9);
        assert_eq!(s.rate.threshold(), 1320);
        assert_eq!(s.loader.parallel_max, 50);
        assert_eq!(s.loader.settle_delay_sec, 31);
        assert_eq!(s.tracker.time_stop_bars, 12);
        assert!((s.tracker.trail_atr_mult - 1.2).abs() < 1e-9);
        assert!((s.scorer.enter_threshold - 3.0).abs() < 1e-9);
        assert!((s.action_price.max_sl_percent - 15.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let toml = r#"
            [rate]
            threshold_fraction = 0.5
            hard_limit_per_min = 1200
            ban_grace_ms = 1000
            minute_window_ms = 60000
            not_a_real_option = 1
        "#;
        let parsed: Result<Settings, _> = toml::from_str(toml);
        assert!(parsed.is_err(), "unknown key must be rejected at load");
    }

    #[test]
    fn partial_sections_fall_back_to_defaults() {
        let toml = r#"
            [scorer]
            enter_threshold = 2.5
            min_factors = 2
            btc_penalty = 2.0
            btc_noise_pct = 0.3
        "#;
        let parsed: Settings = toml::from_str(toml).unwrap();
        assert!((parsed.scorer.enter_threshold - 2.5).abs() < 1e-9);
        assert_eq!(parsed.tracker.cadence_sec, 60);
    }
}
