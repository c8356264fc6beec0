use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Network hiccup or exchange 5xx. Safe to retry with backoff.
    #[error("transient error: {0}")]
    Transient(String),

    /// The minute weight bucket cannot admit the request before the
    /// caller's deadline.
    #[error("rate capped: bucket resets after caller deadline")]
    RateCapped,

    /// Exchange-reported ban (HTTP 418/429). All requests blocked until
    /// the deadline.
    #[error("banned by exchange until {until}")]
    Banned { until: DateTime<Utc> },

    /// Exchange 4xx that is not a ban. Surfaced to the caller, never
    /// retried.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Stored data too old to evaluate. Skip the symbol for this cycle.
    #[error("stale data: {0}")]
    Stale(String),

    /// A violated internal invariant. Log and abort the current unit of
    /// work, never the process.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for failures the exchange client may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Http(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
