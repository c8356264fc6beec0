use std::collections::HashMap;

use chrono::{DateTime, Utc};

use common::{Candle, Timeframe, Zone, ZoneKind};

/// Tuning for the swing-cluster zone builder.
#[derive(Debug, Clone)]
pub struct ZoneBuilderConfig {
    /// Bars on each side a pivot must dominate.
    pub swing_window: usize,
    /// Pivots within this many ATRs merge into one zone.
    pub cluster_width_atr: f64,
    /// Zones untouched for this many bars age out.
    pub freshness_horizon_bars: usize,
}

impl Default for ZoneBuilderConfig {
    fn default() -> Self {
        Self {
            swing_window: 2,
            cluster_width_atr: 0.5,
            freshness_horizon_bars: 96,
        }
    }
}

/// Central S/R registry for one symbol. Single writer (the per-symbol
/// analysis task), shared read-only with strategies.
#[derive(Debug, Default)]
pub struct ZoneRegistry {
    by_tf: HashMap<Timeframe, Vec<Zone>>,
    built_at: HashMap<Timeframe, DateTime<Utc>>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A timeframe needs a rebuild when its series has advanced past the
    /// last build.
    pub fn needs_rebuild(&self, timeframe: Timeframe, newest_close: DateTime<Utc>) -> bool {
        match self.built_at.get(&timeframe) {
            Some(at) => newest_close > *at,
            None => true,
        }
    }

    pub fn update(&mut self, timeframe: Timeframe, zones: Vec<Zone>, as_of: DateTime<Utc>) {
        self.by_tf.insert(timeframe, zones);
        self.built_at.insert(timeframe, as_of);
    }

    pub fn zones(&self, timeframe: Timeframe) -> &[Zone] {
        self.by_tf.get(&timeframe).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nearest zone of `kind` relative to `price`: resistance above,
    /// support below.
    pub fn nearest(&self, timeframe: Timeframe, price: f64, kind: ZoneKind) -> Option<&Zone> {
        let candidates = self.zones(timeframe).iter().filter(|z| z.kind == kind);
        match kind {
            ZoneKind::Resistance => candidates
                .filter(|z| z.low > price)
                .min_by(|a, b| a.low.partial_cmp(&b.low).unwrap_or(std::cmp::Ordering::Equal)),
            ZoneKind::Support => candidates
                .filter(|z| z.high < price)
                .max_by(|a, b| a.high.partial_cmp(&b.high).unwrap_or(std::cmp::Ordering::Equal)),
        }
    }

    /// A zone whose band lies within `tolerance` of `price`, strongest
    /// first on ties.
    pub fn confluence_within(
        &self,
        timeframe: Timeframe,
        price: f64,
        tolerance: f64,
    ) -> Option<&Zone> {
        self.zones(timeframe)
            .iter()
            .filter(|z| z.distance_to(price) <= tolerance)
            .max_by(|a, b| {
                a.strength
                    .partial_cmp(&b.strength)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

/// Build S/R zones from swing pivots clustered by price proximity.
///
/// Pivot highs seed resistance, pivot lows seed support. A zone touched
/// from the other side after a body close through it is marked flipped
/// and changes polarity.
pub fn build_zones(
    candles: &[Candle],
    timeframe: Timeframe,
    atr: f64,
    cfg: &ZoneBuilderConfig,
) -> Vec<Zone> {
    if candles.len() < cfg.swing_window * 2 + 1 || atr <= 0.0 {
        return Vec::new();
    }

    let mut pivots: Vec<(usize, f64, ZoneKind)> = Vec::new();
    let k = cfg.swing_window;
    for i in k..candles.len() - k {
        let high = candles[i].high;
        let low = candles[i].low;
        let window = &candles[i - k..=i + k];
        if window.iter().all(|c| c.high <= high) {
            pivots.push((i, high, ZoneKind::Resistance));
        }
        if window.iter().all(|c| c.low >= low) {
            pivots.push((i, low, ZoneKind::Support));
        }
    }
    if pivots.is_empty() {
        return Vec::new();
    }

    pivots.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let cluster_width = cfg.cluster_width_atr * atr;
    let mut zones: Vec<Zone> = Vec::new();
    let mut cluster: Vec<(usize, f64, ZoneKind)> = vec![pivots[0].clone()];

    for pivot in pivots.into_iter().skip(1) {
        let anchor = cluster[0].1;
        if pivot.1 - anchor <= cluster_width {
            cluster.push(pivot);
        } else {
            if let Some(zone) = finalize_cluster(&cluster, candles, timeframe, cfg) {
                zones.push(zone);
            }
            cluster = vec![pivot];
        }
    }
    if let Some(zone) = finalize_cluster(&cluster, candles, timeframe, cfg) {
        zones.push(zone);
    }

    zones.retain(|z| z.freshness > 0.0);
    zones
}

fn finalize_cluster(
    cluster: &[(usize, f64, ZoneKind)],
    candles: &[Candle],
    timeframe: Timeframe,
    cfg: &ZoneBuilderConfig,
) -> Option<Zone> {
    let low = cluster.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let high = cluster.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

    let resistance_votes = cluster
        .iter()
        .filter(|p| p.2 == ZoneKind::Resistance)
        .count();
    let mut kind = if resistance_votes * 2 >= cluster.len() {
        ZoneKind::Resistance
    } else {
        ZoneKind::Support
    };

    // Touches: bars whose range intersects the band. Reaction: how far
    // price travelled away over the following three bars.
    let mut touches = Vec::new();
    let mut reactions = Vec::new();
    let mut last_touch_idx = None;
    for (i, candle) in candles.iter().enumerate() {
        if candle.low <= high && candle.high >= low {
            touches.push(candle.open_time);
            last_touch_idx = Some(i);
            let ahead = candles.iter().skip(i + 1).take(3);
            let reaction = ahead
                .map(|c| match kind {
                    ZoneKind::Resistance => high - c.low,
                    ZoneKind::Support => c.high - low,
                })
                .fold(0.0, f64::max);
            reactions.push(reaction.max(0.0));
        }
    }
    if touches.is_empty() {
        return None;
    }

    let last_close = candles.last()?.close;
    let flipped = match kind {
        ZoneKind::Resistance => last_close > high,
        ZoneKind::Support => last_close < low,
    };
    if flipped {
        kind = match kind {
            ZoneKind::Resistance => ZoneKind::Support,
            ZoneKind::Support => ZoneKind::Resistance,
        };
    }

    let bars_since_touch = last_touch_idx
        .map(|i| candles.len() - 1 - i)
        .unwrap_or(usize::MAX);
    let freshness =
        1.0 - (bars_since_touch as f64 / cfg.freshness_horizon_bars as f64).min(1.0);

    // Recently-touched zones count for more at equal touch counts.
    let strength = touches.len() as f64 * (0.5 + 0.5 * freshness);

    Some(Zone {
        timeframe,
        kind,
        low,
        high,
        strength,
        touches,
        reactions,
        freshness,
        flipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(i: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + i * Timeframe::M15.millis()).unwrap()
    }

    fn bar(i: i64, low: f64, high: f64, close: f64) -> Candle {
        Candle {
            open_time: dt(i),
            open: close,
            high,
            low,
            close,
            volume: 10.0,
            close_time: dt(i + 1),
            quote_volume: 100.0,
            taker_buy_base: 5.0,
        }
    }

    /// A series oscillating between ~100 (support) and ~110 (resistance).
    fn ranging_series() -> Vec<Candle> {
        let mut candles = Vec::new();
        for i in 0..40i64 {
            let phase = i % 10;
            let (low, high, close) = match phase {
                0 | 1 => (100.0, 102.0, 101.0),
                2 | 3 => (102.0, 106.0, 105.0),
                4 | 5 => (106.0, 110.0, 108.0),
                6 | 7 => (104.0, 108.0, 105.0),
                _ => (101.0, 104.0, 102.0),
            };
            candles.push(bar(i, low, high, close));
        }
        candles
    }

    #[test]
    fn builder_finds_support_and_resistance() {
        let candles = ranging_series();
        let zones = build_zones(&candles, Timeframe::M15, 2.0, &ZoneBuilderConfig::default());
        assert!(!zones.is_empty());
        assert!(zones.iter().any(|z| z.kind == ZoneKind::Support && z.low <= 101.0));
        assert!(zones.iter().any(|z| z.kind == ZoneKind::Resistance && z.high >= 109.0));
    }

    #[test]
    fn registry_nearest_respects_side() {
        let candles = ranging_series();
        let zones = build_zones(&candles, Timeframe::M15, 2.0, &ZoneBuilderConfig::default());
        let mut registry = ZoneRegistry::new();
        registry.update(Timeframe::M15, zones, dt(40));

        let resistance = registry.nearest(Timeframe::M15, 105.0, ZoneKind::Resistance);
        assert!(resistance.is_some_and(|z| z.low > 105.0));
        let support = registry.nearest(Timeframe::M15, 105.0, ZoneKind::Support);
        assert!(support.is_some_and(|z| z.high < 105.0));
    }

    #[test]
    fn rebuild_needed_only_when_series_advances() {
        let mut registry = ZoneRegistry::new();
        assert!(registry.needs_rebuild(Timeframe::M15, dt(10)));
        registry.update(Timeframe::M15, Vec::new(), dt(10));
        assert!(!registry.needs_rebuild(Timeframe::M15, dt(10)));
        assert!(registry.needs_rebuild(Timeframe::M15, dt(11)));
    }

    #[test]
    fn short_series_yields_no_zones() {
        let candles: Vec<Candle> = (0..3).map(|i| bar(i, 100.0, 101.0, 100.5)).collect();
        assert!(build_zones(&candles, Timeframe::M15, 1.0, &ZoneBuilderConfig::default()).is_empty());
    }
}
