pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod kelly;
pub mod market;
pub mod portfolio;
pub mod proposal;
pub mod score;
pub mod traits;

pub use config::{
    AppConfig, BreakerConfig, CapitalConfig, ExchangeConfig, MarketFilterConfig, ScoringConfig,
    ScoringWeights, ServerConfig, SupervisionConfig, TradingConfig,
};
pub use config_loader::ConfigLoader;
pub use error::{ExchangeError, ProposalError, SnapshotError, VetoReason};
pub use events::{FillEvent, OrderResult, TradeAction, TradeLogEntry};
pub use kelly::{KellySizer, KellyStake};
pub use market::MarketSnapshot;
pub use portfolio::{PortfolioState, Position, PositionStatus};
pub use proposal::{OrderProposal, ProposalStatus, Side, SizingRationale};
pub use score::{FactorScores, Score};
pub use traits::{CancelAck, ExchangeClient, MarketFilter, Repository, Worker};
