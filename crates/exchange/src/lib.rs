pub mod client;
pub mod limiter;
pub mod stream;
pub mod weights;

pub use client::{BinanceFutures, DepthSnapshot, SymbolInfo, Ticker24h};
pub use limiter::{BanNotice, Permit, RateLimiter, RateUsage};
pub use stream::{CloseHint, KlineHintStream};
pub use weights::{depth_weight, klines_weight};
