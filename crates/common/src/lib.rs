pub mod config;
pub mod error;
pub mod exchange;
pub mod types;

pub use config::{Config, Settings};
pub use error::{Error, Result};
pub use exchange::MarkPriceSource;
pub use types::*;
