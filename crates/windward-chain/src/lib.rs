//! windward-chain
//!
//! Opaque binding to the smart-contract layer: collateral token approvals,
//! bot registry, vault, bilateral commitments and settlement. The adapter
//! guarantees that a successful return implies the transaction was mined;
//! the JSON-RPC implementation re-queries the receipt on reconnect.

pub mod adapter;
pub mod error;
pub mod rpc;

pub use adapter::{BotRecord, ChainAdapter};
pub use error::ChainError;
pub use rpc::{RpcChainAdapter, RpcChainConfig};
