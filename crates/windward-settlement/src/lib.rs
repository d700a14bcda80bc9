//! windward-settlement
//!
//! The post-commit lifecycle for one bet: outcome computation against
//! fetched exit prices, the signed proposal exchange with the counterparty,
//! on-chain agreement execution, and arbitration escalation when the pair
//! cannot agree.

pub mod coordinator;
pub mod outcome;
pub mod policy;
pub mod prices;
pub mod store;

pub use coordinator::{
    SettleResult, SettlementConfig, SettlementCoordinator, SettlementReadiness,
    SettlementTransport,
};
pub use outcome::compute_outcome;
pub use policy::{CancelInputs, CancelPolicy, FillRateLimiter};
pub use prices::{ExitPrice, ExitPriceFetcher, PriceSource};
pub use store::{StoredTrades, TradeStore};
