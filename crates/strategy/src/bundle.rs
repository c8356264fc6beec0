use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use common::{Candle, Timeframe};

use crate::indicators::{
    self, bb_width_series, bollinger, keltner, last_adx, rolling_vwap, rsi, slope_pct_per_bar,
};

const MIN_BARS: usize = 210;
const PERCENTILE_LOOKBACK: usize = 90;

/// Immutable per-(symbol, timeframe, newest bar) indicator snapshot.
/// Computed once per analysis cycle and shared by every strategy.
#[derive(Debug, Clone)]
pub struct IndicatorBundle {
    pub newest_close_time: DateTime<Utc>,
    pub last_close: f64,

    pub atr: f64,
    pub atr_pct_rank: f64,
    /// Mean ATR over the recent window, the scorer's volatility baseline.
    pub atr_mean_recent: f64,
    pub adx: f64,

    pub ema20: f64,
    pub ema50: f64,
    pub ema200: f64,
    pub ema20_slope_pct: f64,
    pub ema50_slope_pct: f64,
    pub ema200_slope_pct: f64,

    pub bb_mid: f64,
    pub bb_upper: f64,
    pub bb_lower: f64,
    pub bb_width_pct_rank: f64,
    /// Bollinger bands fully inside the Keltner channel.
    pub squeeze_contained: bool,

    pub donchian_high: f64,
    pub donchian_low: f64,

    pub rsi: f64,
    pub vol_mean20: f64,
    pub vol_median20: f64,
    pub last_volume: f64,
    pub vwap: f64,
}

impl IndicatorBundle {
    /// Compute the full bundle; `None` when the series is too short for
    /// a meaningful EMA200.
    pub fn compute(candles: &[Candle]) -> Option<IndicatorBundle> {
        if candles.len() < MIN_BARS {
            return None;
        }
        let last = candles.last()?;
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        let atr_series = indicators::atr_series(candles, 14);
        let atr = *atr_series.last()?;
        let atr_pct_rank = indicators::percentile_rank(&atr_series, atr, PERCENTILE_LOOKBACK);
        let recent_start = atr_series.len().saturating_sub(50);
        let atr_mean_recent = indicators::mean(&atr_series[recent_start..]);

        let ema20_series = indicators::ema_series(&closes, 20);
        let ema50_series = indicators::ema_series(&closes, 50);
        let ema200_series = indicators::ema_series(&closes, 200);

        let (bb_mid, bb_upper, bb_lower) = bollinger(&closes, 20, 2.0)?;
        let widths = bb_width_series(&closes, 20, 2.0);
        let bb_width = *widths.last()?;
        let bb_width_pct_rank = indicators::percentile_rank(&widths, bb_width, PERCENTILE_LOOKBACK);
        let (_, kc_upper, kc_lower) = keltner(candles, 20, 1.5)?;

        let (donchian_high, donchian_low) = indicators::donchian(candles, 20)?;

        let vol_tail = &volumes[volumes.len().saturating_sub(20)..];

        Some(IndicatorBundle {
            newest_close_time: last.close_time,
            last_close: last.close,
            atr,
            atr_pct_rank,
            atr_mean_recent,
            adx: last_adx(candles, 14).unwrap_or(0.0),
            ema20: *ema20_series.last()?,
            ema50: *ema50_series.last()?,
            ema200: *ema200_series.last()?,
            ema20_slope_pct: slope_pct_per_bar(&ema20_series, 10).unwrap_or(0.0),
            ema50_slope_pct: slope_pct_per_bar(&ema50_series, 10).unwrap_or(0.0),
            ema200_slope_pct: slope_pct_per_bar(&ema200_series, 10).unwrap_or(0.0),
            bb_mid,
            bb_upper,
            bb_lower,
            bb_width_pct_rank,
            squeeze_contained: bb_upper < kc_upper && bb_lower > kc_lower,
            donchian_high,
            donchian_low,
            rsi: rsi(&closes, 14).unwrap_or(50.0),
            vol_mean20: indicators::mean(vol_tail),
            vol_median20: indicators::median(vol_tail),
            last_volume: last.volume,
            vwap: rolling_vwap(candles, 96).unwrap_or(last.close),
        })
    }

    /// EMA50/EMA200 alignment for the given direction, used as the HTF
    /// confirmation factor.
    pub fn ema_aligned(&self, long: bool) -> bool {
        if long {
            self.ema50 > self.ema200
        } else {
            self.ema50 < self.ema200
        }
    }
}

/// Memoizes bundles by (symbol, timeframe); an entry is valid only for
/// the newest bar close time it was computed at. Lock-free reads via
/// `Arc` sharing; writes take the guard briefly.
#[derive(Default)]
pub struct IndicatorCache {
    inner: RwLock<HashMap<(String, Timeframe), (DateTime<Utc>, Arc<IndicatorBundle>)>>,
}

impl IndicatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        newest_close: DateTime<Utc>,
    ) -> Option<Arc<IndicatorBundle>> {
        let map = self.inner.read().ok()?;
        let (cached_close, bundle) = map.get(&(symbol.to_string(), timeframe))?;
        if *cached_close == newest_close {
            Some(Arc::clone(bundle))
        } else {
            None
        }
    }

    /// Cached bundle for the series' newest bar, computing on miss.
    /// `None` when the series is too short.
    pub fn get_or_compute(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Option<Arc<IndicatorBundle>> {
        let newest_close = candles.last()?.close_time;
        if let Some(bundle) = self.get(symbol, timeframe, newest_close) {
            return Some(bundle);
        }

        let bundle = Arc::new(IndicatorBundle::compute(candles)?);
        if let Ok(mut map) = self.inner.write() {
            map.insert(
                (symbol.to_string(), timeframe),
                (newest_close, Arc::clone(&bundle)),
            );
        }
        Some(bundle)
    }

    pub fn clear_symbol(&self, symbol: &str) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|(s, _), _| s != symbol);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    pub(crate) fn trending_series(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.5;
                Candle {
                    open_time: DateTime::from_timestamp_millis(i as i64 * 900_000).unwrap(),
                    open: base - 0.2,
                    high: base + 0.6,
                    low: base - 0.6,
                    close: base,
                    volume: 100.0 + (i % 5) as f64,
                    close_time: DateTime::from_timestamp_millis(i as i64 * 900_000 + 899_999)
                        .unwrap(),
                    quote_volume: base * 100.0,
                    taker_buy_base: 60.0,
                }
            })
            .collect()
    }

    #[test]
    fn compute_requires_min_bars() {
        let candles = trending_series(100);
        assert!(IndicatorBundle::compute(&candles).is_none());
        let candles = trending_series(MIN_BARS);
        assert!(IndicatorBundle::compute(&candles).is_some());
    }

    #[test]
    fn trending_series_shows_aligned_emas_and_positive_slope() {
        let candles = trending_series(300);
        let bundle = IndicatorBundle::compute(&candles).unwrap();
        assert!(bundle.ema20 > bundle.ema50);
        assert!(bundle.ema50 > bundle.ema200);
        assert!(bundle.ema200_slope_pct > 0.0);
        assert!(bundle.ema_aligned(true));
        assert!(!bundle.ema_aligned(false));
    }

    #[test]
    fn cache_hits_only_for_same_newest_bar() {
        let cache = IndicatorCache::new();
        let candles = trending_series(300);
        let bundle = cache.get_or_compute("BTCUSDT", Timeframe::M15, &candles).unwrap();
        let newest = candles.last().unwrap().close_time;

        let hit = cache.get("BTCUSDT", Timeframe::M15, newest).unwrap();
        assert!(Arc::ptr_eq(&bundle, &hit), "same bar must share the bundle");

        let later = newest + chrono::Duration::minutes(15);
        assert!(cache.get("BTCUSDT", Timeframe::M15, later).is_none());
    }

    #[test]
    fn clear_symbol_drops_entries() {
        let cache = IndicatorCache::new();
        let candles = trending_series(300);
        cache.get_or_compute("BTCUSDT", Timeframe::M15, &candles);
        cache.get_or_compute("ETHUSDT", Timeframe::M15, &candles);
        assert_eq!(cache.len(), 2);
        cache.clear_symbol("BTCUSDT");
        assert_eq!(cache.len(), 1);
    }
}
