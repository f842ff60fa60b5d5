pub mod factors;
pub mod reference;
pub mod scorer;

pub use reference::{CategoryBaseline, ReferenceStats};
pub use scorer::MarketScorer;
