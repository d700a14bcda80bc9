//! windward-p2p
//!
//! Signed HTTP request/response between bots: a reqwest client with the
//! shared retry envelope on the outbound side, and an axum server for the
//! inbound surface. Every inbound message is attributed by signature
//! recovery, checked for nonce/expiry freshness against the chain, and
//! deduplicated through a content-hash replay cache.

pub mod auth;
pub mod client;
pub mod flow;
pub mod messages;
pub mod server;

pub use auth::ReplayCache;
pub use client::P2pClient;
pub use server::{start, P2pServerConfig, ServerContext};
