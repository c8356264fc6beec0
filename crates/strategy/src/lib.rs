pub mod bundle;
pub mod indicators;
pub mod regime;
pub mod scorer;
pub mod strategies;

pub use bundle::{IndicatorBundle, IndicatorCache};
pub use regime::RegimeDetector;
pub use scorer::{ScoreDecision, ScoredProposal, SignalScorer};

use common::{
    Bias, BtcTrend, Candle, Direction, Proposal, Regime, StrategyCategory, Timeframe, Zone,
};

/// CVD facts precomputed once per (symbol, cycle).
#[derive(Debug, Clone, Copy, Default)]
pub struct CvdFacts {
    /// Latest cumulative delta over the 15m window.
    pub last: f64,
    pub divergence_15m: Option<Direction>,
    pub divergence_1h: Option<Direction>,
}

/// Read-only view over the symbol's zone registry, one slice per
/// timeframe.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZoneView<'a> {
    pub m15: &'a [Zone],
    pub h1: &'a [Zone],
    pub h4: &'a [Zone],
    pub d1: &'a [Zone],
}

impl<'a> ZoneView<'a> {
    pub fn for_tf(&self, timeframe: Timeframe) -> &'a [Zone] {
        match timeframe {
            Timeframe::M15 => self.m15,
            Timeframe::H1 => self.h1,
            Timeframe::H4 => self.h4,
            Timeframe::D1 => self.d1,
        }
    }

    /// A zone on `timeframe` whose band lies within `tolerance` of
    /// `price`.
    pub fn confluence_within(
        &self,
        timeframe: Timeframe,
        price: f64,
        tolerance: f64,
    ) -> Option<&'a Zone> {
        self.for_tf(timeframe)
            .iter()
            .filter(|z| z.distance_to(price) <= tolerance)
            .max_by(|a, b| {
                a.strength
                    .partial_cmp(&b.strength)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

/// Everything a strategy may look at for one (symbol, cycle). Strategies
/// are pure over this snapshot: no persistence, no locks, no clock reads.
pub struct EvalContext<'a> {
    pub symbol: &'a str,
    /// Closed candles, oldest first, per timeframe.
    pub candles_15m: &'a [Candle],
    pub candles_1h: &'a [Candle],
    pub candles_4h: &'a [Candle],
    pub bundle_15m: &'a IndicatorBundle,
    pub bundle_1h: Option<&'a IndicatorBundle>,
    pub bundle_4h: Option<&'a IndicatorBundle>,
    pub zones: ZoneView<'a>,
    pub regime: Regime,
    pub bias: Bias,
    pub mark_price: f64,
    pub btc: BtcTrend,
    /// Ask/bid depth ratio when an order book snapshot was taken.
    pub depth_imbalance: Option<f64>,
    pub cvd: Option<CvdFacts>,
    /// Open-interest change over the recent window, in percent.
    pub oi_delta_pct: Option<f64>,
}

impl<'a> EvalContext<'a> {
    pub fn candles(&self, timeframe: Timeframe) -> &'a [Candle] {
        match timeframe {
            Timeframe::M15 => self.candles_15m,
            Timeframe::H1 => self.candles_1h,
            Timeframe::H4 => self.candles_4h,
            Timeframe::D1 => &[],
        }
    }

    pub fn bundle(&self, timeframe: Timeframe) -> Option<&'a IndicatorBundle> {
        match timeframe {
            Timeframe::M15 => Some(self.bundle_15m),
            Timeframe::H1 => self.bundle_1h,
            Timeframe::H4 => self.bundle_4h,
            Timeframe::D1 => None,
        }
    }
}

/// All recognizers satisfy this contract. At most one proposal per
/// (symbol, cycle); `None` means no actionable setup.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn timeframe(&self) -> Timeframe;
    fn category(&self) -> StrategyCategory;
    fn evaluate(&self, ctx: &EvalContext) -> Option<Proposal>;
}

/// The six core recognizers in dispatch order.
pub fn core_strategies() -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(strategies::LiquiditySweep::default()),
        Box::new(strategies::BreakRetest::default()),
        Box::new(strategies::OrderFlow::default()),
        Box::new(strategies::MaVwapPullback::default()),
        Box::new(strategies::VolumeProfileStrategy::default()),
        Box::new(strategies::AtrMomentum::default()),
    ]
}
