use std::collections::BTreeMap;

use common::config::ActionPriceSettings;
use common::{Candle, Direction};

/// Everything the eleven scoring components look at, extracted from the
/// series by the engine. Plain data so the scoring table is testable in
/// isolation.
#[derive(Debug, Clone)]
pub struct PatternView {
    pub direction: Direction,
    pub initiator: Candle,
    pub confirm: Candle,
    /// EMAs evaluated on the confirming bar.
    pub ema5: f64,
    pub ema13: f64,
    pub ema20: f64,
    pub ema200: f64,
    pub ema200_10_back: f64,
    pub atr_initiator: f64,
    pub atr_confirm: f64,
    /// EMA200 touches in the five bars before the initiator.
    pub touches_before_initiator: u32,
    pub retest: bool,
    /// Narrow bars holding the short EMAs just before the confirm.
    pub base_bars: u32,
    /// Confirm volume over the 20-bar mean.
    pub volume_ratio: f64,
}

/// Entry mode from the total score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    Standard,
    Scalp,
    Skip,
}

impl EntryMode {
    pub fn from_score(total: f64, cfg: &ActionPriceSettings) -> EntryMode {
        if total >= cfg.standard_min_score {
            EntryMode::Standard
        } else if total >= cfg.min_total_score {
            EntryMode::Scalp
        } else {
            EntryMode::Skip
        }
    }
}

/// The eleven additive components. Each is bounded; the sum decides the
/// entry mode.
pub fn score_components(view: &PatternView) -> (f64, BTreeMap<String, f64>) {
    let mut c = BTreeMap::new();
    let sign = view.direction.sign();
    let atr_i = view.atr_initiator.max(f64::EPSILON);
    let atr_c = view.atr_confirm.max(f64::EPSILON);

    // c1: initiator body size in ATR.
    let body_atr = view.initiator.body() / atr_i;
    c.insert(
        "initiator_size".to_string(),
        if body_atr >= 1.10 {
            2.0
        } else if body_atr >= 0.80 {
            1.0
        } else {
            0.0
        },
    );

    // c2: confirm close distance from EMA200 on the break side.
    let depth_atr = sign * (view.confirm.close - view.ema200) / atr_c;
    c.insert(
        "ema_proximity".to_string(),
        if depth_atr >= 0.40 {
            2.0
        } else if depth_atr >= 0.35 {
            1.0
        } else if depth_atr < 0.30 {
            -1.0
        } else {
            0.0
        },
    );

    // c3: body held inside the EMA200-EMA13 pullback band; losing EMA20
    // against the direction penalizes.
    let band_lo = view.ema200.min(view.ema13);
    let band_hi = view.ema200.max(view.ema13);
    let body_mid = (view.confirm.open + view.confirm.close) / 2.0;
    let lost_ema20 = match view.direction {
        Direction::Long => view.confirm.close < view.ema20,
        Direction::Short => view.confirm.close > view.ema20,
    };
    c.insert(
        "pullback_depth".to_string(),
        if body_mid >= band_lo && body_mid <= band_hi {
            1.0
        } else if lost_ema20 {
            -1.0
        } else {
            0.0
        },
    );

    // c4: EMA200 slope over ten bars, in ATR.
    let slope = sign * (view.ema200 - view.ema200_10_back) / atr_c;
    c.insert(
        "slope200".to_string(),
        if slope >= 0.20 {
            1.0
        } else if slope <= -0.20 {
            -1.0
        } else {
            0.0
        },
    );

    // c5: compactness and order of the 5/13/20/200 fan.
    let aligned = match view.direction {
        Direction::Long => {
            view.ema5 > view.ema13 && view.ema13 > view.ema20 && view.ema20 > view.ema200
        }
        Direction::Short => {
            view.ema5 < view.ema13 && view.ema13 < view.ema20 && view.ema20 < view.ema200
        }
    };
    let inverted = match view.direction {
        Direction::Long => {
            view.ema5 < view.ema13 && view.ema13 < view.ema20 && view.ema20 < view.ema200
        }
        Direction::Short => {
            view.ema5 > view.ema13 && view.ema13 > view.ema20 && view.ema20 > view.ema200
        }
    };
    let spread = (view.ema5 - view.ema20).abs() / atr_c;
    c.insert(
        "ema_fan".to_string(),
        if aligned && spread >= 0.10 {
            1.0
        } else if inverted {
            -1.0
        } else {
            0.0
        },
    );

    // c6 / c7: structural tags.
    c.insert("retest".to_string(), if view.retest { 1.0 } else { 0.0 });
    c.insert(
        "break_and_base".to_string(),
        if view.base_bars >= 2 { 1.0 } else { 0.0 },
    );

    // c8: initiator rejection wick on the entry side.
    let wick = match view.direction {
        Direction::Long => view.initiator.lower_wick(),
        Direction::Short => view.initiator.upper_wick(),
    };
    c.insert(
        "initiator_wick".to_string(),
        if wick / atr_i >= 0.25 { 1.0 } else { 0.0 },
    );

    // c9: volume confirmation against the 20-bar mean.
    c.insert(
        "volume_confirm".to_string(),
        if view.volume_ratio >= 2.0 {
            2.0
        } else if view.volume_ratio >= 1.3 {
            1.0
        } else if view.volume_ratio < 0.8 {
            -1.0
        } else {
            0.0
        },
    );

    // c10: "lipuchka" - price glued to EMA200 before the cross makes the
    // break unreliable.
    c.insert(
        "lipuchka".to_string(),
        if view.touches_before_initiator >= 3 { -2.0 } else { 0.0 },
    );

    // c11: overextension from EMA200.
    c.insert(
        "overextension".to_string(),
        if depth_atr.abs() > 1.5 { -2.0 } else { 0.0 },
    );

    let total = c.values().sum();
    (total, c)
}
