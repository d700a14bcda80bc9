//! Wire messages for the P2P surface. JSON bodies, UTF-8, bigints as
//! decimal strings.

use serde::{Deserialize, Serialize};

use windward_core::types::{
    amount_string, Address, Amount, BetId, BilateralCommitment, Digest, Signature, Timestamp,
};
use windward_crypto::typed_data::{hash_trade_exchange, TypedDomain};
use windward_hash::TradePayload;

/// GET /p2p/health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: Timestamp,
    pub uptime: u64,
}

/// GET /p2p/info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub address: Address,
    pub endpoint: String,
    pub pubkey_hash: Digest,
    pub version: String,
    pub uptime: u64,
}

/// POST /p2p/propose — a signed trade proposition carrying the compressed
/// portfolio it commits to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeProposition {
    pub proposer: Address,
    pub counterparty: Address,
    pub snapshot_id: String,
    pub trades_root: Digest,
    #[serde(with = "amount_string")]
    pub creator_amount: Amount,
    #[serde(with = "amount_string")]
    pub filler_amount: Amount,
    pub resolution_deadline: Timestamp,
    pub expiry: Timestamp,
    pub nonce: u64,
    pub payload: TradePayload,
    pub signature: Signature,
}

impl TradeProposition {
    /// Signable digest under the P2P domain.
    pub fn digest(&self, domain: &TypedDomain) -> Digest {
        hash_trade_exchange(
            domain,
            &self.proposer,
            &self.counterparty,
            &self.trades_root,
            self.creator_amount,
            self.filler_amount,
            self.resolution_deadline,
            self.expiry,
            self.nonce,
            false,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeResponse {
    pub received: bool,
    pub proposal_hash: Digest,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

/// POST /p2p/accept — acceptance of a previously received proposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeAcceptance {
    pub proposer: Address,
    pub counterparty: Address,
    pub proposal_hash: Digest,
    pub snapshot_id: String,
    pub trades_root: Digest,
    #[serde(with = "amount_string")]
    pub creator_amount: Amount,
    #[serde(with = "amount_string")]
    pub filler_amount: Amount,
    pub resolution_deadline: Timestamp,
    pub expiry: Timestamp,
    pub nonce: u64,
    pub signature: Signature,
}

impl TradeAcceptance {
    pub fn digest(&self, domain: &TypedDomain) -> Digest {
        hash_trade_exchange(
            domain,
            &self.proposer,
            &self.counterparty,
            &self.trades_root,
            self.creator_amount,
            self.filler_amount,
            self.resolution_deadline,
            self.expiry,
            self.nonce,
            true,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptResponse {
    pub received: bool,
    pub acceptance_hash: Digest,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

/// POST /p2p/commitment/sign — ask the counterparty to countersign a
/// bilateral commitment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitmentSignRequest {
    pub commitment: BilateralCommitment,
    pub requester_signature: Signature,
    pub expiry: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitmentSignResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<Signature>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

/// POST /p2p/trades — replicate the full portfolio of a committed bet to
/// the counterparty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradesUpload {
    pub bet_id: BetId,
    pub snapshot_id: String,
    pub payload: TradePayload,
    pub signer: Address,
    pub signature: Signature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradesUploadResponse {
    pub received: bool,
    pub bet_id: BetId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedTrade {
    pub index: u32,
    pub ticker: String,
    pub method: String,
    #[serde(with = "amount_string")]
    pub entry_price: Amount,
}

/// GET /p2p/trades/{bet-id}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradesListResponse {
    pub bet_id: BetId,
    pub snapshot_id: String,
    pub trades: Vec<IndexedTrade>,
}

/// Error body on any endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<u16>,
}
