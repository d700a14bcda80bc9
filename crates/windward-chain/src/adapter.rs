use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use windward_core::types::{
    Address, Amount, Bet, BetId, BilateralCommitment, CustomPayout, Digest, Nonce,
    SettlementAgreement, Signature, VaultBalance,
};

use crate::error::ChainError;

/// Registry entry for a bot, as stored on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotRecord {
    pub address: Address,
    pub endpoint: String,
    pub pubkey_hash: Digest,
    pub active: bool,
}

/// The boundary to the smart-contract layer.
///
/// Implementations guarantee that a successful return from any
/// transaction-submitting method implies the transaction was mined. All
/// signing methods operate locally on the adapter's key material under the
/// canonical contract-verifying domain.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    // ── Collateral token ─────────────────────────────────────────────────────

    async fn approve(&self, spender: Address, amount: Amount) -> Result<(), ChainError>;
    async fn balance(&self) -> Result<Amount, ChainError>;

    // ── Registry ─────────────────────────────────────────────────────────────

    async fn register_bot(&self, endpoint: &str, pubkey_hash: Digest) -> Result<(), ChainError>;
    async fn deregister_bot(&self) -> Result<(), ChainError>;
    async fn get_bot(&self, address: Address) -> Result<Option<BotRecord>, ChainError>;
    async fn get_all_active_bots(&self) -> Result<Vec<BotRecord>, ChainError>;

    // ── Vault ────────────────────────────────────────────────────────────────

    async fn deposit_to_vault(&self, amount: Amount) -> Result<(), ChainError>;
    async fn withdraw_from_vault(&self, amount: Amount) -> Result<(), ChainError>;
    async fn get_vault_balance(&self, address: Address) -> Result<VaultBalance, ChainError>;
    async fn get_vault_nonce(&self, address: Address) -> Result<Nonce, ChainError>;

    // ── Bilateral bets ───────────────────────────────────────────────────────

    fn sign_bilateral_commitment(
        &self,
        commitment: &BilateralCommitment,
    ) -> Result<Signature, ChainError>;

    async fn commit_bilateral_bet(
        &self,
        commitment: &BilateralCommitment,
        creator_sig: &Signature,
        filler_sig: &Signature,
    ) -> Result<BetId, ChainError>;

    // ── Settlement ───────────────────────────────────────────────────────────

    fn sign_settlement_agreement(
        &self,
        agreement: &SettlementAgreement,
    ) -> Result<Signature, ChainError>;

    async fn settle_by_agreement(
        &self,
        agreement: &SettlementAgreement,
        creator_sig: &Signature,
        filler_sig: &Signature,
    ) -> Result<(), ChainError>;

    fn sign_custom_payout(&self, payout: &CustomPayout) -> Result<Signature, ChainError>;

    async fn custom_payout(
        &self,
        payout: &CustomPayout,
        creator_sig: &Signature,
        filler_sig: &Signature,
    ) -> Result<(), ChainError>;

    async fn request_arbitration(&self, bet_id: BetId) -> Result<(), ChainError>;

    async fn get_bet(&self, bet_id: BetId) -> Result<Bet, ChainError>;

    /// The address whose key this adapter signs with.
    fn signer_address(&self) -> Address;
}
