pub mod journal;
pub mod lock;
pub mod store;
pub mod tracker;

pub use journal::SignalJournal;
pub use lock::LockManager;
pub use store::{PerfStats, SignalStore};
pub use tracker::{apply_check, CheckOutcome, ExitSchedule, PerformanceTracker, PriceView, TrackerEvent};
