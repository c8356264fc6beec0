mod atr_momentum;
mod break_retest;
mod liquidity_sweep;
mod ma_vwap_pullback;
mod order_flow;
mod volume_profile;

pub use atr_momentum::AtrMomentum;
pub use break_retest::BreakRetest;
pub use liquidity_sweep::LiquiditySweep;
pub use ma_vwap_pullback::MaVwapPullback;
pub use order_flow::OrderFlow;
pub use volume_profile::VolumeProfileStrategy;

#[cfg(test)]
pub(crate) mod testutil {
    use chrono::DateTime;

    use common::{Bias, BtcTrend, Candle, Regime, Zone};

    use crate::bundle::IndicatorBundle;
    use crate::{CvdFacts, EvalContext, ZoneView};

    pub fn bar_at(i: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        let tf_ms = 900_000i64;
        Candle {
            open_time: DateTime::from_timestamp_millis(i as i64 * tf_ms).unwrap(),
            open,
            high,
            low,
            close,
            volume,
            close_time: DateTime::from_timestamp_millis(i as i64 * tf_ms + tf_ms - 1).unwrap(),
            quote_volume: close * volume,
            taker_buy_base: volume / 2.0,
        }
    }

    /// Flat base series around `price` with unit range and volume 100.
    pub fn flat_series(n: usize, price: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| bar_at(i, price, price + 0.5, price - 0.5, price, 100.0))
            .collect()
    }

    /// Steadily rising series: +`step` per bar.
    pub fn rising_series(n: usize, start: f64, step: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = start + i as f64 * step;
                bar_at(i, base - 0.2, base + 0.6, base - 0.6, base, 100.0)
            })
            .collect()
    }

    /// Owns everything an `EvalContext` borrows, so tests can build a
    /// context in two lines.
    pub struct Fixture {
        pub candles_15m: Vec<Candle>,
        pub candles_1h: Vec<Candle>,
        pub candles_4h: Vec<Candle>,
        pub bundle_15m: IndicatorBundle,
        pub bundle_1h: Option<IndicatorBundle>,
        pub bundle_4h: Option<IndicatorBundle>,
        pub zones_m15: Vec<Zone>,
        pub zones_h1: Vec<Zone>,
        pub regime: Regime,
        pub bias: Bias,
        pub mark_price: f64,
        pub btc: BtcTrend,
        pub depth_imbalance: Option<f64>,
        pub cvd: Option<CvdFacts>,
        pub oi_delta_pct: Option<f64>,
    }

    impl Fixture {
        pub fn new(candles_15m: Vec<Candle>) -> Self {
            let bundle_15m =
                IndicatorBundle::compute(&candles_15m).expect("fixture series too short");
            let mark_price = candles_15m.last().unwrap().close;
            Fixture {
                candles_15m,
                candles_1h: Vec::new(),
                candles_4h: Vec::new(),
                bundle_15m,
                bundle_1h: None,
                bundle_4h: None,
                zones_m15: Vec::new(),
                zones_h1: Vec::new(),
                regime: Regime::Range,
                bias: Bias::Neutral,
                mark_price,
                btc: BtcTrend::default(),
                depth_imbalance: None,
                cvd: None,
                oi_delta_pct: None,
            }
        }

        /// Recompute the 15m bundle after the candles were edited.
        pub fn rebuild_bundle(&mut self) {
            self.bundle_15m =
                IndicatorBundle::compute(&self.candles_15m).expect("fixture series too short");
            self.mark_price = self.candles_15m.last().unwrap().close;
        }

        pub fn with_candles_4h(mut self, candles: Vec<Candle>) -> Self {
            self.bundle_4h = IndicatorBundle::compute(&candles);
            self.candles_4h = candles;
            self
        }

        pub fn ctx(&self) -> EvalContext<'_> {
            EvalContext {
                symbol: "TESTUSDT",
                candles_15m: &self.candles_15m,
                candles_1h: &self.candles_1h,
                candles_4h: &self.candles_4h,
                bundle_15m: &self.bundle_15m,
                bundle_1h: self.bundle_1h.as_ref(),
                bundle_4h: self.bundle_4h.as_ref(),
                zones: ZoneView {
                    m15: &self.zones_m15,
                    h1: &self.zones_h1,
                    h4: &[],
                    d1: &[],
                },
                regime: self.regime,
                bias: self.bias,
                mark_price: self.mark_price,
                btc: self.btc,
                depth_imbalance: self.depth_imbalance,
                cvd: self.cvd,
                oi_delta_pct: self.oi_delta_pct,
            }
        }
    }
}
