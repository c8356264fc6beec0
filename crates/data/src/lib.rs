pub mod loader;
pub mod store;
pub mod zones;

pub use loader::{DataLoader, RefreshOutcome};
pub use store::CandleStore;
pub use zones::{build_zones, ZoneBuilderConfig, ZoneRegistry};
