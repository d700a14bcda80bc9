//! Typed-data domains and struct hashing.
//!
//! Two canonical domains exist:
//! - contract-verifying `{name, version, chain-id, verifying-contract}` for
//!   on-chain bet commitments, settlement agreements and custom payouts;
//! - P2P-only `{name, version, chain-id}` for off-chain trade
//!   propositions/acceptances and settlement proposals.
//!
//! Encoding follows the EIP-712 shape: a digest is
//! `keccak(0x19 ‖ 0x01 ‖ domainSeparator ‖ structHash)` where every field is
//! ABI-encoded into one 32-byte word.

use sha3::Digest as _;

use windward_core::types::{
    Address, Amount, BetId, BilateralCommitment, CustomPayout, Digest, SettlementAgreement,
    SettlementProposal, Timestamp,
};

use crate::hash::{keccak256, Keccak256};

/// A typed-data signing domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Option<Address>,
}

impl TypedDomain {
    /// Contract-verifying domain for signatures a contract will recover.
    pub fn contract(name: &str, version: &str, chain_id: u64, contract: Address) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            chain_id,
            verifying_contract: Some(contract),
        }
    }

    /// P2P-only domain (no verifying contract).
    pub fn p2p(name: &str, version: &str, chain_id: u64) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            chain_id,
            verifying_contract: None,
        }
    }

    /// The domain separator hash.
    pub fn separator(&self) -> Digest {
        let mut h = Keccak256::new();
        match self.verifying_contract {
            Some(contract) => {
                let typehash = keccak256(
                    b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
                );
                h.update(typehash.as_bytes());
                h.update(keccak256(self.name.as_bytes()).as_bytes());
                h.update(keccak256(self.version.as_bytes()).as_bytes());
                h.update(word_u64(self.chain_id));
                h.update(word_address(&contract));
            }
            None => {
                let typehash =
                    keccak256(b"EIP712Domain(string name,string version,uint256 chainId)");
                h.update(typehash.as_bytes());
                h.update(keccak256(self.name.as_bytes()).as_bytes());
                h.update(keccak256(self.version.as_bytes()).as_bytes());
                h.update(word_u64(self.chain_id));
            }
        }
        finalize(h)
    }

    /// `keccak(0x19 ‖ 0x01 ‖ separator ‖ structHash)`.
    pub fn digest(&self, struct_hash: &Digest) -> Digest {
        let mut h = Keccak256::new();
        h.update([0x19, 0x01]);
        h.update(self.separator().as_bytes());
        h.update(struct_hash.as_bytes());
        finalize(h)
    }
}

// ── Word encoding ────────────────────────────────────────────────────────────

fn finalize(h: Keccak256) -> Digest {
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    Digest::from_bytes(arr)
}

fn word_u64(v: u64) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[24..].copy_from_slice(&v.to_be_bytes());
    w
}

fn word_u128(v: Amount) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[16..].copy_from_slice(&v.to_be_bytes());
    w
}

fn word_i64(v: Timestamp) -> [u8; 32] {
    // Timestamps are non-negative in every signable record.
    word_u64(v as u64)
}

fn word_address(a: &Address) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[12..].copy_from_slice(a.as_bytes());
    w
}

fn word_bool(b: bool) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[31] = b as u8;
    w
}

// ── Struct hashes ────────────────────────────────────────────────────────────

/// Struct hash of a bilateral bet commitment (contract-verifying domain).
pub fn hash_commitment(domain: &TypedDomain, c: &BilateralCommitment) -> Digest {
    let typehash = keccak256(
        b"BilateralCommitment(bytes32 tradesRoot,address creator,address filler,uint128 creatorAmount,uint128 fillerAmount,uint64 resolutionDeadline,uint64 nonce,uint64 signatureExpiry)",
    );
    let mut h = Keccak256::new();
    h.update(typehash.as_bytes());
    h.update(c.trades_root.as_bytes());
    h.update(word_address(&c.creator));
    h.update(word_address(&c.filler));
    h.update(word_u128(c.creator_amount));
    h.update(word_u128(c.filler_amount));
    h.update(word_i64(c.resolution_deadline));
    h.update(word_u64(c.nonce));
    h.update(word_i64(c.signature_expiry));
    domain.digest(&finalize(h))
}

/// Struct hash of a settlement agreement (contract-verifying domain).
pub fn hash_settlement_agreement(domain: &TypedDomain, a: &SettlementAgreement) -> Digest {
    let typehash =
        keccak256(b"SettlementAgreement(uint64 betId,address winner,uint64 nonce)");
    let mut h = Keccak256::new();
    h.update(typehash.as_bytes());
    h.update(word_u64(a.bet_id.0));
    h.update(word_address(&a.winner));
    h.update(word_u64(a.nonce));
    domain.digest(&finalize(h))
}

/// Struct hash of a custom payout split (contract-verifying domain).
pub fn hash_custom_payout(domain: &TypedDomain, p: &CustomPayout) -> Digest {
    let typehash = keccak256(
        b"CustomPayout(uint64 betId,uint128 creatorPayout,uint128 fillerPayout,uint64 nonce)",
    );
    let mut h = Keccak256::new();
    h.update(typehash.as_bytes());
    h.update(word_u64(p.bet_id.0));
    h.update(word_u128(p.creator_payout));
    h.update(word_u128(p.filler_payout));
    h.update(word_u64(p.nonce));
    domain.digest(&finalize(h))
}

/// Signable digest of a settlement proposal (P2P domain). The signature
/// field itself is excluded; an absent winner or exit-prices hash encodes
/// as the zero word.
pub fn hash_settlement_proposal(domain: &TypedDomain, p: &SettlementProposal) -> Digest {
    let typehash = keccak256(
        b"SettlementProposal(uint64 betId,address winner,uint32 winsCount,uint32 validTrades,bool isTie,address proposer,uint64 settlementNonce,uint64 proposalExpiry,bytes32 exitPricesHash)",
    );
    let mut h = Keccak256::new();
    h.update(typehash.as_bytes());
    h.update(word_u64(p.bet_id.0));
    h.update(word_address(&p.claimed_winner.unwrap_or(Address([0u8; 20]))));
    h.update(word_u64(p.wins_count as u64));
    h.update(word_u64(p.valid_trades as u64));
    h.update(word_bool(p.is_tie));
    h.update(word_address(&p.proposer));
    h.update(word_u64(p.settlement_nonce));
    h.update(word_i64(p.proposal_expiry));
    h.update(p.exit_prices_hash.unwrap_or(Digest([0u8; 32])).as_bytes());
    domain.digest(&finalize(h))
}

/// Signable digest of an off-chain trade proposition or acceptance
/// (P2P domain). Both sides sign the same fields; `accepting` distinguishes
/// the two message kinds.
#[allow(clippy::too_many_arguments)]
pub fn hash_trade_exchange(
    domain: &TypedDomain,
    proposer: &Address,
    counterparty: &Address,
    trades_root: &Digest,
    creator_amount: Amount,
    filler_amount: Amount,
    resolution_deadline: Timestamp,
    expiry: Timestamp,
    nonce: u64,
    accepting: bool,
) -> Digest {
    let typehash = keccak256(
        b"TradeExchange(address proposer,address counterparty,bytes32 tradesRoot,uint128 creatorAmount,uint128 fillerAmount,uint64 resolutionDeadline,uint64 expiry,uint64 nonce,bool accepting)",
    );
    let mut h = Keccak256::new();
    h.update(typehash.as_bytes());
    h.update(word_address(proposer));
    h.update(word_address(counterparty));
    h.update(trades_root.as_bytes());
    h.update(word_u128(creator_amount));
    h.update(word_u128(filler_amount));
    h.update(word_i64(resolution_deadline));
    h.update(word_i64(expiry));
    h.update(word_u64(nonce));
    h.update(word_bool(accepting));
    domain.digest(&finalize(h))
}

/// Digest authenticating `GET /p2p/trades/{bet-id}`: keccak(betId ‖ timestamp).
pub fn trades_request_digest(bet_id: BetId, timestamp: Timestamp) -> Digest {
    let mut h = Keccak256::new();
    h.update(word_u64(bet_id.0));
    h.update(word_i64(timestamp));
    finalize(h)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commitment() -> BilateralCommitment {
        BilateralCommitment {
            trades_root: Digest([7u8; 32]),
            creator: Address([1u8; 20]),
            filler: Address([2u8; 20]),
            creator_amount: 1_000_000_000_000_000_000,
            filler_amount: 1_000_000_000_000_000_000,
            resolution_deadline: 1_900_000_000,
            nonce: 4,
            signature_expiry: 1_900_000_600,
        }
    }

    #[test]
    fn domain_separator_depends_on_chain_id() {
        let a = TypedDomain::p2p("Windward", "1", 1);
        let b = TypedDomain::p2p("Windward", "1", 8453);
        assert_ne!(a.separator(), b.separator());
    }

    #[test]
    fn contract_and_p2p_domains_differ() {
        let p2p = TypedDomain::p2p("Windward", "1", 1);
        let contract = TypedDomain::contract("Windward", "1", 1, Address([9u8; 20]));
        assert_ne!(p2p.separator(), contract.separator());
    }

    #[test]
    fn commitment_digest_is_deterministic_and_field_sensitive() {
        let domain = TypedDomain::contract("Windward", "1", 1, Address([9u8; 20]));
        let c = commitment();
        assert_eq!(hash_commitment(&domain, &c), hash_commitment(&domain, &c));

        let mut tweaked = commitment();
        tweaked.nonce += 1;
        assert_ne!(hash_commitment(&domain, &c), hash_commitment(&domain, &tweaked));
    }

    #[test]
    fn proposition_and_acceptance_digests_differ() {
        let domain = TypedDomain::p2p("Windward", "1", 1);
        let proposer = Address([1u8; 20]);
        let counterparty = Address([2u8; 20]);
        let root = Digest([5u8; 32]);
        let propose = hash_trade_exchange(
            &domain, &proposer, &counterparty, &root, 10, 10, 100, 200, 1, false,
        );
        let accept = hash_trade_exchange(
            &domain, &proposer, &counterparty, &root, 10, 10, 100, 200, 1, true,
        );
        assert_ne!(propose, accept);
    }
}
