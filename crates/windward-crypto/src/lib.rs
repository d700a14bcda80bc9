//! windward-crypto
//!
//! Identity and signing for the Windward bot: secp256k1 keypairs with
//! keccak-derived addresses, and EIP-712-style typed-data hashing for both
//! the contract-verifying and P2P-only signature domains.

pub mod hash;
pub mod keypair;
pub mod typed_data;

pub use hash::{keccak256, Keccak256};
pub use keypair::{recover_address, KeyPair};
pub use typed_data::TypedDomain;
