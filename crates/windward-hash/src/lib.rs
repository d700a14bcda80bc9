//! windward-hash
//!
//! Content hashing and payload compression for wagered portfolios.
//!
//! Both parties hold every trade, so the trades root is a single streaming
//! digest over the whole list rather than a Merkle tree: no proofs, no
//! per-trade nodes, one pass even at 10⁶ entries.

pub mod compress;
pub mod root;

pub use compress::{decode, encode, TradePayload};
pub use root::{root, root_columnar, root_from_buffer};
