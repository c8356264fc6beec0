use std::collections::BTreeMap;

use tracing::debug;

use common::config::ActionPriceSettings;
use common::{ActionPriceContext, ApMode, Candle, Direction};
use strategy::indicators::{atr_series, ema_series, mean};

use crate::score::{score_components, EntryMode, PatternView};

/// Minimum history for a trustworthy EMA200.
const MIN_BARS: usize = 210;
const TOUCH_LOOKBACK: usize = 5;
const RETEST_LOOKBACK: usize = 5;
const BASE_LOOKBACK: usize = 3;

/// What the recognizer hands the engine: a fully priced entry plus the
/// context persisted with the signal.
#[derive(Debug, Clone)]
pub struct ApProposal {
    pub direction: Direction,
    pub mode: ApMode,
    pub entry: f64,
    pub sl: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub atr: f64,
    pub score_total: f64,
    pub context: ActionPriceContext,
}

/// EMA200 body-cross recognizer on fully closed 15m candles. The
/// initiator bar's body crosses EMA200; the next bar confirms by closing
/// on the same side without touching the average.
pub struct ActionPriceEngine {
    cfg: ActionPriceSettings,
}

impl ActionPriceEngine {
    pub fn new(cfg: ActionPriceSettings) -> Self {
        ActionPriceEngine { cfg }
    }

    pub const STRATEGY_NAME: &'static str = "Action Price";

    pub fn evaluate(&self, symbol: &str, candles: &[Candle]) -> Option<ApProposal> {
        if candles.len() < MIN_BARS {
            return None;
        }
        let n = candles.len();
        let initiator_idx = n - 2;
        let confirm_idx = n - 1;
        let initiator = &candles[initiator_idx];
        let confirm = &candles[confirm_idx];

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let ema200 = ema_series(&closes, 200);
        let atr = atr_series(candles, 14);

        let ema200_init = ema200[initiator_idx];
        let ema200_conf = ema200[confirm_idx];

        let direction = detect_body_cross(initiator, confirm, ema200_init, ema200_conf)?;

        let view = PatternView {
            direction,
            initiator: initiator.clone(),
            confirm: confirm.clone(),
            ema5: *ema_series(&closes, 5).last()?,
            ema13: *ema_series(&closes, 13).last()?,
            ema20: *ema_series(&closes, 20).last()?,
            ema200: ema200_conf,
            ema200_10_back: ema200[confirm_idx - 10],
            atr_initiator: atr[initiator_idx],
            atr_confirm: atr[confirm_idx],
            touches_before_initiator: count_ema200_touches(candles, &ema200, initiator_idx),
            retest: detect_retest(candles, &closes, direction, confirm_idx),
            base_bars: count_base_bars(candles, &closes, &atr, direction, confirm_idx),
            volume_ratio: volume_ratio(candles, confirm_idx),
        };

        let (score_total, components) = score_components(&view);
        let mode = match EntryMode::from_score(score_total, &self.cfg) {
            EntryMode::Standard => ApMode::Standard,
            EntryMode::Scalp => ApMode::Scalp,
            EntryMode::Skip => {
                debug!(symbol, score = score_total, "body cross below score floor");
                return None;
            }
        };

        let levels = self.price_levels(&view, mode)?;
        let sl_pct = (levels.entry - levels.sl).abs() / levels.entry * 100.0;
        if sl_pct > self.cfg.max_sl_percent {
            debug!(
                symbol,
                sl_pct,
                cap = self.cfg.max_sl_percent,
                "rejecting body cross: stop distance over cap"
            );
            return None;
        }

        Some(ApProposal {
            direction,
            mode,
            entry: levels.entry,
            sl: levels.sl,
            tp1: levels.tp1,
            tp2: levels.tp2,
            atr: view.atr_confirm,
            score_total,
            context: ActionPriceContext {
                mode,
                score_total,
                components,
                initiator_time: initiator.open_time,
                confirm_open: confirm.open,
                confirm_high: confirm.high,
                confirm_low: confirm.low,
                confirm_close: confirm.close,
                ema200_at_entry: ema200_conf,
            },
        })
    }

    fn price_levels(&self, view: &PatternView, mode: ApMode) -> Option<Levels> {
        let entry = view.confirm.close;
        let buffer = self.cfg.sl_buffer_atr * view.atr_initiator;
        let sl = match view.direction {
            Direction::Long => view.initiator.low - buffer,
            Direction::Short => view.initiator.high + buffer,
        };
        let risk = view.direction.sign() * (entry - sl);
        if risk <= 0.0 || entry <= 0.0 {
            return None;
        }

        let tp2_rr = match mode {
            ApMode::Standard => self.cfg.tp2_standard_rr,
            ApMode::Scalp => self.cfg.tp2_scalp_rr,
        };
        Some(Levels {
            entry,
            sl,
            tp1: entry + view.direction.sign() * risk,
            tp2: entry + view.direction.sign() * risk * tp2_rr,
        })
    }
}

struct Levels {
    entry: f64,
    sl: f64,
    tp1: f64,
    tp2: f64,
}

/// The trigger: initiator body crosses EMA200, confirm closes on the
/// same side without its range touching the average.
fn detect_body_cross(
    initiator: &Candle,
    confirm: &Candle,
    ema200_init: f64,
    ema200_conf: f64,
) -> Option<Direction> {
    let long_initiator = initiator.close > ema200_init && initiator.open < ema200_init;
    let long_confirm = confirm.close > ema200_conf && confirm.low > ema200_conf;
    if long_initiator && long_confirm {
        return Some(Direction::Long);
    }

    let short_initiator = initiator.close < ema200_init && initiator.open > ema200_init;
    let short_confirm = confirm.close < ema200_conf && confirm.high < ema200_conf;
    if short_initiator && short_confirm {
        return Some(Direction::Short);
    }

    None
}

fn count_ema200_touches(candles: &[Candle], ema200: &[f64], initiator_idx: usize) -> u32 {
    let start = initiator_idx.saturating_sub(TOUCH_LOOKBACK);
    (start..initiator_idx)
        .filter(|&i| candles[i].low <= ema200[i] && ema200[i] <= candles[i].high)
        .count() as u32
}

/// Trend-continuation tag: a recent bar dipped into EMA13/EMA20 and
/// closed back on the break side.
fn detect_retest(
    candles: &[Candle],
    closes: &[f64],
    direction: Direction,
    confirm_idx: usize,
) -> bool {
    let ema13 = ema_series(closes, 13);
    let ema20 = ema_series(closes, 20);
    let start = confirm_idx.saturating_sub(RETEST_LOOKBACK);
    (start..confirm_idx).any(|i| match direction {
        Direction::Long => {
            (candles[i].low <= ema13[i] && candles[i].close > ema13[i])
                || (candles[i].low <= ema20[i] && candles[i].close > ema20[i])
        }
        Direction::Short => {
            (candles[i].high >= ema13[i] && candles[i].close < ema13[i])
                || (candles[i].high >= ema20[i] && candles[i].close < ema20[i])
        }
    })
}

/// Narrow bars holding the short EMAs right before the confirm: the
/// break-and-base structure.
fn count_base_bars(
    candles: &[Candle],
    closes: &[f64],
    atr: &[f64],
    direction: Direction,
    confirm_idx: usize,
) -> u32 {
    let ema13 = ema_series(closes, 13);
    let ema20 = ema_series(closes, 20);
    let start = confirm_idx.saturating_sub(BASE_LOOKBACK);
    (start..confirm_idx)
        .filter(|&i| {
            let narrow = candles[i].range() < 0.5 * atr[i];
            narrow
                && match direction {
                    Direction::Long => {
                        candles[i].close > ema13[i] && candles[i].low > ema20[i]
                    }
                    Direction::Short => {
                        candles[i].close < ema13[i] && candles[i].high < ema20[i]
                    }
                }
        })
        .count() as u32
}

fn volume_ratio(candles: &[Candle], confirm_idx: usize) -> f64 {
    let start = confirm_idx.saturating_sub(20);
    let volumes: Vec<f64> = candles[start..confirm_idx].iter().map(|c| c.volume).collect();
    let avg = mean(&volumes);
    if avg <= 0.0 {
        return 0.0;
    }
    candles[confirm_idx].volume / avg
}
