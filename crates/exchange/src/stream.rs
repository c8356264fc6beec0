use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use common::{Error, Result, Timeframe};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// A kline close observed on the stream. Used only as a scheduling hint:
/// the loader still fetches the authoritative bar over REST.
#[derive(Debug, Clone)]
pub struct CloseHint {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub close_time: DateTime<Utc>,
}

/// Kline WebSocket stream for a single (symbol, timeframe).
///
/// Publishes a [`CloseHint`] whenever the stream reports a finalized bar.
/// Reconnects automatically with exponential backoff and resubscribes by
/// reconnecting to the same single-stream endpoint.
pub struct KlineHintStream {
    ws_base: String,
    symbol: String,
    timeframe: Timeframe,
    tx: broadcast::Sender<CloseHint>,
}

impl KlineHintStream {
    pub fn new(
        ws_base: &str,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        tx: broadcast::Sender<CloseHint>,
    ) -> Self {
        KlineHintStream {
            ws_base: ws_base.trim_end_matches('/').to_string(),
            symbol: symbol.into(),
            timeframe,
            tx,
        }
    }

    /// Run the stream loop forever, reconnecting on failure. Call inside
    /// a `tokio::spawn`.
    pub async fn run(self) {
        let mut backoff = Duration::from_secs(1);

        loop {
            match self.connect_once().await {
                Ok(()) => {
                    info!(symbol = %self.symbol, tf = %self.timeframe, "kline stream closed cleanly");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    warn!(
                        symbol = %self.symbol,
                        tf = %self.timeframe,
                        error = %e,
                        backoff = ?backoff,
                        "kline stream error, reconnecting"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn connect_once(&self) -> Result<()> {
        let endpoint = format!(
            "{}/ws/{}@kline_{}",
            self.ws_base,
            self.symbol.to_lowercase(),
            self.timeframe.interval()
        );
        // Validate before dialing so a malformed base URL fails loudly.
        url::Url::parse(&endpoint).map_err(|e| Error::WebSocket(e.to_string()))?;

        let connect = connect_async(endpoint.as_str());
        let (ws_stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| Error::WebSocket("connect timeout".to_string()))?
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        debug!(symbol = %self.symbol, tf = %self.timeframe, "kline stream connected");
        let (_, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;
            if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                match parse_close_hint(&self.symbol, self.timeframe, &text) {
                    Ok(Some(hint)) => {
                        // Ignore send errors: no receiver just means the
                        // scheduler is not listening right now.
                        let _ = self.tx.send(hint);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "failed to parse kline event"),
                }
            }
        }

        Ok(())
    }
}

#[derive(Deserialize)]
struct KlineWrapper {
    k: KlineData,
}

#[derive(Deserialize)]
struct KlineData {
    #[serde(rename = "x")]
    is_closed: bool,
    #[serde(rename = "T")]
    close_time_ms: i64,
}

fn parse_close_hint(symbol: &str, timeframe: Timeframe, text: &str) -> Result<Option<CloseHint>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("e").and_then(|v| v.as_str()) != Some("kline") {
        return Ok(None);
    }

    let wrapper: KlineWrapper = serde_json::from_value(value)?;
    if !wrapper.k.is_closed {
        return Ok(None);
    }

    let close_time = DateTime::from_timestamp_millis(wrapper.k.close_time_ms)
        .ok_or_else(|| Error::WebSocket("kline close time out of range".to_string()))?;

    Ok(Some(CloseHint {
        symbol: symbol.to_string(),
        timeframe,
        close_time,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_hint_only_on_finalized_bars() {
        let open = r#"{"e":"kline","k":{"x":false,"T":1700000899999}}"#;
        assert!(parse_close_hint("BTCUSDT", Timeframe::M15, open)
            .unwrap()
            .is_none());

        let closed = r#"{"e":"kline","k":{"x":true,"T":1700000899999}}"#;
        let hint = parse_close_hint("BTCUSDT", Timeframe::M15, closed)
            .unwrap()
            .unwrap();
        assert_eq!(hint.symbol, "BTCUSDT");
        assert_eq!(hint.close_time.timestamp_millis(), 1_700_000_899_999);
    }

    #[test]
    fn non_kline_messages_are_skipped() {
        let other = r#"{"e":"aggTrade","p":"1.0"}"#;
        assert!(parse_close_hint("BTCUSDT", Timeframe::M15, other)
            .unwrap()
            .is_none());
    }
}
