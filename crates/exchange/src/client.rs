use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use common::{Candle, Error, MarkPriceSource, Result, Timeframe};

use crate::limiter::RateLimiter;
use crate::weights::{depth_weight, klines_weight};

const USED_WEIGHT_HEADER: &str = "x-mbx-used-weight-1m";
const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Typed REST facade over the USDT-margined futures API. Every call
/// reserves its weight before issuing and reconciles the ledger with the
/// server's counter after.
pub struct BinanceFutures {
    http: reqwest::Client,
    base: String,
    limiter: Arc<RateLimiter>,
}

impl BinanceFutures {
    pub fn new(base_url: &str, limiter: Arc<RateLimiter>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(BinanceFutures {
            http,
            base: base_url.trim_end_matches('/').to_string(),
            limiter,
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// GET with weight accounting, transient retry and ban handling.
    async fn get_json(
        &self,
        path: &str,
        params: &[(&str, String)],
        weight: u32,
        deadline: Instant,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base, path);
        let mut backoff = BACKOFF_BASE;
        let mut last_err = Error::Transient("no attempts made".to_string());

        for attempt in 1..=MAX_ATTEMPTS {
            self.limiter.reserve(weight, deadline).await?;

            let sent = self.http.get(&url).query(params).send().await;
            let resp = match sent {
                Ok(resp) => resp,
                Err(e) => {
                    last_err = Error::Transient(format!("request to {path}: {e}"));
                    warn!(path, attempt, error = %e, "transient network error");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                    continue;
                }
            };

            if let Some(used) = resp
                .headers()
                .get(USED_WEIGHT_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u32>().ok())
            {
                self.limiter.observe_used(used).await;
            }

            let status = resp.status();
            if status.is_success() {
                return resp
                    .json::<Value>()
                    .await
                    .map_err(|e| Error::Http(format!("decoding {path}: {e}")));
            }

            if status.as_u16() == 418 || status.as_u16() == 429 {
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(60);
                let until = Utc::now() + chrono::Duration::seconds(retry_after);
                self.limiter.trip_ban(until).await;
                return Err(Error::Banned { until });
            }

            let body = resp.text().await.unwrap_or_default();
            if status.is_client_error() {
                return Err(Error::BadRequest(format!("{path}: HTTP {status}: {body}")));
            }

            last_err = Error::Transient(format!("{path}: HTTP {status}: {body}"));
            warn!(path, attempt, %status, "server error, backing off");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(BACKOFF_CAP);
        }

        Err(last_err)
    }

    /// Closed and in-progress klines, oldest first. The caller decides
    /// whether to keep the trailing unclosed bar.
    pub async fn klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        deadline: Instant,
    ) -> Result<Vec<Candle>> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("interval", timeframe.interval().to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(start) = start_ms {
            params.push(("startTime", start.to_string()));
        }
        if let Some(end) = end_ms {
            params.push(("endTime", end.to_string()));
        }

        let value = self
            .get_json("/fapi/v1/klines", &params, klines_weight(limit), deadline)
            .await?;
        let rows = value
            .as_array()
            .ok_or_else(|| Error::Http("klines: expected array".to_string()))?;
        rows.iter().map(parse_kline_row).collect()
    }

    pub async fn depth(&self, symbol: &str, limit: u32, deadline: Instant) -> Result<DepthSnapshot> {
        let params = [("symbol", symbol.to_string()), ("limit", limit.to_string())];
        let value = self
            .get_json("/fapi/v1/depth", &params, depth_weight(limit), deadline)
            .await?;
        let raw: RawDepth = serde_json::from_value(value)?;
        Ok(DepthSnapshot {
            bids: parse_levels(&raw.bids)?,
            asks: parse_levels(&raw.asks)?,
        })
    }

    pub async fn mark_price_raw(&self, symbol: &str, deadline: Instant) -> Result<f64> {
        let params = [("symbol", symbol.to_string())];
        let value = self
            .get_json("/fapi/v1/premiumIndex", &params, 1, deadline)
            .await?;
        let raw: RawPremiumIndex = serde_json::from_value(value)?;
        parse_price(&raw.mark_price, "markPrice")
    }

    /// 24h tickers for every symbol (quote volume used by the universe
    /// filter).
    pub async fn ticker_24h_all(&self, deadline: Instant) -> Result<Vec<Ticker24h>> {
        let value = self.get_json("/fapi/v1/ticker/24hr", &[], 40, deadline).await?;
        let raw: Vec<RawTicker24h> = serde_json::from_value(value)?;
        raw.into_iter()
            .map(|t| {
                Ok(Ticker24h {
                    quote_volume: parse_price(&t.quote_volume, "quoteVolume")?,
                    symbol: t.symbol,
                })
            })
            .collect()
    }

    pub async fn exchange_info(&self, deadline: Instant) -> Result<Vec<SymbolInfo>> {
        let value = self.get_json("/fapi/v1/exchangeInfo", &[], 1, deadline).await?;
        let raw: RawExchangeInfo = serde_json::from_value(value)?;
        Ok(raw.symbols)
    }

    pub async fn open_interest(&self, symbol: &str, deadline: Instant) -> Result<f64> {
        let params = [("symbol", symbol.to_string())];
        let value = self
            .get_json("/fapi/v1/openInterest", &params, 1, deadline)
            .await?;
        let raw: RawOpenInterest = serde_json::from_value(value)?;
        parse_price(&raw.open_interest, "openInterest")
    }

    /// Tradable USDT-margined perpetuals with 24h quote volume at or
    /// above `min_quote_volume`.
    pub async fn universe(&self, min_quote_volume: f64, deadline: Instant) -> Result<Vec<String>> {
        let info = self.exchange_info(deadline).await?;
        let tickers = self.ticker_24h_all(deadline).await?;
        let volume_by_symbol: std::collections::HashMap<String, f64> = tickers
            .into_iter()
            .map(|t| (t.symbol, t.quote_volume))
            .collect();

        let symbols: Vec<String> = info
            .into_iter()
            .filter(|s| {
                s.status == "TRADING"
                    && s.quote_asset == "USDT"
                    && s.contract_type == "PERPETUAL"
            })
            .map(|s| s.symbol)
            .filter(|s| volume_by_symbol.get(s).copied().unwrap_or(0.0) >= min_quote_volume)
            .collect();

        debug!(count = symbols.len(), "universe selected");
        Ok(symbols)
    }
}

#[async_trait]
impl MarkPriceSource for BinanceFutures {
    async fn mark_price(&self, symbol: &str) -> Result<f64> {
        let deadline = Instant::now() + Duration::from_secs(30);
        self.mark_price_raw(symbol, deadline).await
    }
}

/// One side-aggregated order book snapshot.
#[derive(Debug, Clone)]
pub struct DepthSnapshot {
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

impl DepthSnapshot {
    /// Ask/bid volume ratio over the top `levels`. Below 1.0 the bid side
    /// dominates (bullish pressure).
    pub fn imbalance(&self, levels: usize) -> Option<f64> {
        let bid: f64 = self.bids.iter().take(levels).map(|(_, q)| q).sum();
        let ask: f64 = self.asks.iter().take(levels).map(|(_, q)| q).sum();
        if bid <= 0.0 {
            return None;
        }
        Some(ask / bid)
    }
}

#[derive(Debug, Clone)]
pub struct Ticker24h {
    pub symbol: String,
    pub quote_volume: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub quote_asset: String,
    pub contract_type: String,
}

// ─── Wire formats ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawDepth {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPremiumIndex {
    mark_price: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTicker24h {
    symbol: String,
    quote_volume: String,
}

#[derive(Deserialize)]
struct RawExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOpenInterest {
    open_interest: String,
}

fn parse_price(s: &str, field: &str) -> Result<f64> {
    s.parse::<f64>()
        .map_err(|e| Error::Http(format!("bad {field} '{s}': {e}")))
}

fn parse_levels(raw: &[(String, String)]) -> Result<Vec<(f64, f64)>> {
    raw.iter()
        .map(|(p, q)| Ok((parse_price(p, "price")?, parse_price(q, "qty")?)))
        .collect()
}

/// Kline row layout: [openTime, open, high, low, close, volume, closeTime,
/// quoteVolume, trades, takerBuyBase, takerBuyQuote, ignore].
fn parse_kline_row(row: &Value) -> Result<Candle> {
    let arr = row
        .as_array()
        .ok_or_else(|| Error::Http("kline row: expected array".to_string()))?;
    if arr.len() < 11 {
        return Err(Error::Http(format!("kline row too short: {} fields", arr.len())));
    }

    let ts = |v: &Value| -> Result<DateTime<Utc>> {
        let ms = v
            .as_i64()
            .ok_or_else(|| Error::Http("kline row: bad timestamp".to_string()))?;
        DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| Error::Http(format!("kline row: timestamp {ms} out of range")))
    };
    let num = |v: &Value, field: &str| -> Result<f64> {
        v.as_str()
            .ok_or_else(|| Error::Http(format!("kline row: {field} not a string")))
            .and_then(|s| parse_price(s, field))
    };

    Ok(Candle {
        open_time: ts(&arr[0])?,
        open: num(&arr[1], "open")?,
        high: num(&arr[2], "high")?,
        low: num(&arr[3], "low")?,
        close: num(&arr[4], "close")?,
        volume: num(&arr[5], "volume")?,
        close_time: ts(&arr[6])?,
        quote_volume: num(&arr[7], "quoteVolume")?,
        taker_buy_base: num(&arr[9], "takerBuyBase")?,
    })
}
