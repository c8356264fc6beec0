use async_trait::async_trait;

use crate::Result;

/// Abstraction over the mark-price feed.
///
/// The live exchange client implements this; tests use an in-memory stub.
/// The performance tracker prefers a mark price and falls back to the
/// latest closed candle only when the source fails.
#[async_trait]
pub trait MarkPriceSource: Send + Sync {
    async fn mark_price(&self, symbol: &str) -> Result<f64>;
}
