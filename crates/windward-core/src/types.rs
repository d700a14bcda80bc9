use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Collateral amount in WIND base units. u128 covers the full uint128 range
/// used by the vault and by exit prices; JSON carries it as a decimal string.
pub type Amount = u128;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

/// Per-account vault sequence number.
pub type Nonce = u64;

// ── Address ──────────────────────────────────────────────────────────────────

/// 20-byte account address derived as keccak256(pubkey)[12..].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn from_bytes(b: [u8; 20]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex string.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw)?;
        if bytes.len() != 20 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}…)", &self.to_hex()[..10])
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ── Digest ───────────────────────────────────────────────────────────────────

/// 32-byte keccak digest (trades root, exit-prices hash, content hashes).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}…)", &self.to_hex()[..18])
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Digest::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ── Signature ────────────────────────────────────────────────────────────────

/// 65-byte recoverable ECDSA signature (r ‖ s ‖ v), hex on the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(pub [u8; 65]);

impl Signature {
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw)?;
        if bytes.len() != 65 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 65];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}…)", &self.to_hex()[..14])
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Signature::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ── BetId ────────────────────────────────────────────────────────────────────

/// On-chain bet identifier assigned by the settlement contract.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BetId(pub u64);

impl fmt::Display for BetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for BetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BetId({})", self.0)
    }
}

// ── Amount serde helpers ─────────────────────────────────────────────────────

/// Serialize a u128 amount as a decimal string (never a JSON number).
pub mod amount_string {
    use super::*;

    pub fn serialize<S: Serializer>(v: &Amount, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Amount, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// `Option<Amount>` as an optional decimal string.
pub mod amount_string_opt {
    use super::*;

    pub fn serialize<S: Serializer>(v: &Option<Amount>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(a) => s.serialize_some(&a.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Amount>, D::Error> {
        let s: Option<String> = Option::deserialize(d)?;
        s.map(|v| v.parse().map_err(serde::de::Error::custom))
            .transpose()
    }
}

// ── Trade ────────────────────────────────────────────────────────────────────

/// One position in a wagered portfolio. Position `i` is identified solely by
/// its index in the list; the portfolio is atomic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub ticker: String,
    /// Direction method, e.g. "up_1h" or "down_4h". The leading word carries
    /// the direction; the rest is strategy-opaque.
    pub method: String,
    #[serde(with = "amount_string")]
    pub entry_price: Amount,
}

// ── Bet ──────────────────────────────────────────────────────────────────────

/// On-chain bet status. Terminal on anything other than Active/InArbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetStatus {
    None,
    Active,
    Settled,
    CustomPayout,
    InArbitration,
    ArbitrationSettled,
}

impl BetStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BetStatus::None | BetStatus::Active | BetStatus::InArbitration)
    }
}

/// Locally cached view of an on-chain bet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub bet_id: BetId,
    pub trades_root: Digest,
    pub creator: Address,
    pub filler: Address,
    #[serde(with = "amount_string")]
    pub creator_amount: Amount,
    #[serde(with = "amount_string")]
    pub filler_amount: Amount,
    pub deadline: Timestamp,
    pub created_at: Timestamp,
    pub status: BetStatus,
}

impl Bet {
    /// Total escrowed pot for this bet.
    pub fn pot(&self) -> Amount {
        self.creator_amount + self.filler_amount
    }

    /// True iff `addr` is one of the two parties.
    pub fn is_party(&self, addr: &Address) -> bool {
        self.creator == *addr || self.filler == *addr
    }

    /// The other party's address, if `addr` is a party at all.
    pub fn counterparty_of(&self, addr: &Address) -> Option<Address> {
        if self.creator == *addr {
            Some(self.filler)
        } else if self.filler == *addr {
            Some(self.creator)
        } else {
            None
        }
    }
}

// ── Bilateral commitment ─────────────────────────────────────────────────────

/// The signed bilateral bet intent presented to the settlement contract.
///
/// Constructed by the proposer, countersigned by the filler, then submitted
/// on-chain where it becomes an immutable Active bet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BilateralCommitment {
    pub trades_root: Digest,
    pub creator: Address,
    pub filler: Address,
    #[serde(with = "amount_string")]
    pub creator_amount: Amount,
    #[serde(with = "amount_string")]
    pub filler_amount: Amount,
    pub resolution_deadline: Timestamp,
    pub nonce: Nonce,
    pub signature_expiry: Timestamp,
}

// ── Settlement records ───────────────────────────────────────────────────────

/// Pair-signable record authorizing a winner payout after the deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementAgreement {
    pub bet_id: BetId,
    pub winner: Address,
    pub nonce: Nonce,
}

/// Pair-signable record authorizing an explicit (creator, filler) split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomPayout {
    pub bet_id: BetId,
    #[serde(with = "amount_string")]
    pub creator_payout: Amount,
    #[serde(with = "amount_string")]
    pub filler_payout: Amount,
    pub nonce: Nonce,
}

/// Result of tallying a portfolio against exit prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// Winning party; `None` on a tie.
    pub winner: Option<Address>,
    /// Creator-side wins among valid trades.
    pub wins_count: u32,
    /// Trades that resolved (cancelled ones excluded).
    pub valid_trades: u32,
    pub is_tie: bool,
}

/// Off-chain settlement proposal, signed under the P2P (non-contract) domain.
/// Transient: discarded once the pair reaches Agree, Disagree or Counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementProposal {
    pub bet_id: BetId,
    pub claimed_winner: Option<Address>,
    pub wins_count: u32,
    pub valid_trades: u32,
    pub is_tie: bool,
    pub proposer: Address,
    /// Shared nonce both parties embed in their on-chain settlement signature.
    pub settlement_nonce: Nonce,
    pub proposal_expiry: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exit_prices_hash: Option<Digest>,
    pub signature: Signature,
}

impl SettlementProposal {
    /// The outcome this proposal claims.
    pub fn claimed_outcome(&self) -> Outcome {
        Outcome {
            winner: self.claimed_winner,
            wins_count: self.wins_count,
            valid_trades: self.valid_trades,
            is_tie: self.is_tie,
        }
    }
}

/// Partner's verdict on a settlement proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Agree,
    Disagree,
    Counter,
}

/// Counter-offer payload carried by a Counter reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutSplit {
    #[serde(with = "amount_string")]
    pub creator_payout: Amount,
    #[serde(with = "amount_string")]
    pub filler_payout: Amount,
}

/// Wire reply to POST /p2p/propose-settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReply {
    pub status: ReplyStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<Signature>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub our_outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub counter_proposal: Option<PayoutSplit>,
}

// ── Peers ────────────────────────────────────────────────────────────────────

/// Cached registry entry for a remote bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub address: Address,
    pub endpoint: String,
    pub pubkey_hash: Digest,
    pub last_known_healthy: bool,
    pub last_checked: Timestamp,
}

// ── Vault ────────────────────────────────────────────────────────────────────

/// Vault balance view for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultBalance {
    #[serde(with = "amount_string")]
    pub available: Amount,
    #[serde(with = "amount_string")]
    pub locked: Amount,
    #[serde(with = "amount_string")]
    pub total: Amount,
}
