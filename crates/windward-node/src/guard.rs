//! Breaker-guarded chain adapter.
//!
//! Wraps the real adapter behind the per-process "chain" circuit breaker:
//! transport-class failures feed the breaker, contract-level rejections do
//! not (a revert proves the dependency reachable). While the breaker is
//! open every call returns a typed circuit-open error without touching the
//! network.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use windward_chain::{BotRecord, ChainAdapter, ChainError};
use windward_core::types::{
    Address, Amount, Bet, BetId, BilateralCommitment, CustomPayout, Digest, Nonce,
    SettlementAgreement, Signature, VaultBalance,
};
use windward_resilience::CircuitBreaker;

pub struct GuardedChain {
    inner: Arc<dyn ChainAdapter>,
    breaker: Arc<CircuitBreaker>,
}

impl GuardedChain {
    pub fn new(inner: Arc<dyn ChainAdapter>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    async fn guard<T, F, Fut>(&self, op: F) -> Result<T, ChainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        self.breaker
            .admit()
            .map_err(|_| ChainError::CircuitOpen(self.breaker.name().to_string()))?;
        match op().await {
            Ok(v) => {
                self.breaker.record_success();
                Ok(v)
            }
            Err(e) => {
                if e.is_retryable() {
                    self.breaker.record_failure();
                } else {
                    // The chain answered; only availability failures count.
                    self.breaker.record_success();
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ChainAdapter for GuardedChain {
    async fn approve(&self, spender: Address, amount: Amount) -> Result<(), ChainError> {
        self.guard(|| self.inner.approve(spender, amount)).await
    }

    async fn balance(&self) -> Result<Amount, ChainError> {
        self.guard(|| self.inner.balance()).await
    }

    async fn register_bot(&self, endpoint: &str, pubkey_hash: Digest) -> Result<(), ChainError> {
        self.guard(|| self.inner.register_bot(endpoint, pubkey_hash)).await
    }

    async fn deregister_bot(&self) -> Result<(), ChainError> {
        self.guard(|| self.inner.deregister_bot()).await
    }

    async fn get_bot(&self, address: Address) -> Result<Option<BotRecord>, ChainError> {
        self.guard(|| self.inner.get_bot(address)).await
    }

    async fn get_all_active_bots(&self) -> Result<Vec<BotRecord>, ChainError> {
        self.guard(|| self.inner.get_all_active_bots()).await
    }

    async fn deposit_to_vault(&self, amount: Amount) -> Result<(), ChainError> {
        self.guard(|| self.inner.deposit_to_vault(amount)).await
    }

    async fn withdraw_from_vault(&self, amount: Amount) -> Result<(), ChainError> {
        self.guard(|| self.inner.withdraw_from_vault(amount)).await
    }

    async fn get_vault_balance(&self, address: Address) -> Result<VaultBalance, ChainError> {
        self.guard(|| self.inner.get_vault_balance(address)).await
    }

    async fn get_vault_nonce(&self, address: Address) -> Result<Nonce, ChainError> {
        self.guard(|| self.inner.get_vault_nonce(address)).await
    }

    fn sign_bilateral_commitment(
        &self,
        commitment: &BilateralCommitment,
    ) -> Result<Signature, ChainError> {
        // Local signing never touches the dependency.
        self.inner.sign_bilateral_commitment(commitment)
    }

    async fn commit_bilateral_bet(
        &self,
        commitment: &BilateralCommitment,
        creator_sig: &Signature,
        filler_sig: &Signature,
    ) -> Result<BetId, ChainError> {
        self.guard(|| self.inner.commit_bilateral_bet(commitment, creator_sig, filler_sig))
            .await
    }

    fn sign_settlement_agreement(
        &self,
        agreement: &SettlementAgreement,
    ) -> Result<Signature, ChainError> {
        self.inner.sign_settlement_agreement(agreement)
    }

    async fn settle_by_agreement(
        &self,
        agreement: &SettlementAgreement,
        creator_sig: &Signature,
        filler_sig: &Signature,
    ) -> Result<(), ChainError> {
        self.guard(|| self.inner.settle_by_agreement(agreement, creator_sig, filler_sig))
            .await
    }

    fn sign_custom_payout(&self, payout: &CustomPayout) -> Result<Signature, ChainError> {
        self.inner.sign_custom_payout(payout)
    }

    async fn custom_payout(
        &self,
        payout: &CustomPayout,
        creator_sig: &Signature,
        filler_sig: &Signature,
    ) -> Result<(), ChainError> {
        self.guard(|| self.inner.custom_payout(payout, creator_sig, filler_sig)).await
    }

    async fn request_arbitration(&self, bet_id: BetId) -> Result<(), ChainError> {
        self.guard(|| self.inner.request_arbitration(bet_id)).await
    }

    async fn get_bet(&self, bet_id: BetId) -> Result<Bet, ChainError> {
        self.guard(|| self.inner.get_bet(bet_id)).await
    }

    fn signer_address(&self) -> Address {
        self.inner.signer_address()
    }
}
