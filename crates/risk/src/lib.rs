pub mod breaker;
pub mod monitor;
pub mod sizer;

pub use breaker::{CircuitBreaker, TradingState, TripReason};
pub use monitor::RiskMonitor;
pub use sizer::PositionSizer;
