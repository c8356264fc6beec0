pub mod engine;
pub mod score;

pub use engine::{ActionPriceEngine, ApProposal};
pub use score::{score_components, EntryMode, PatternView};
