//! JSON-RPC chain adapter.
//!
//! Talks JSON-RPC 2.0 to a chain gateway over raw HTTP POST with
//! serde_json, keeping the binding lean. All typed-data signing happens
//! locally with the injected keypair; the gateway only sees finished
//! signatures.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use windward_core::retry::{retry_async, RetryPolicy};
use windward_core::types::{
    Address, Amount, Bet, BetId, BilateralCommitment, CustomPayout, Digest, Nonce,
    SettlementAgreement, Signature, VaultBalance,
};
use windward_crypto::typed_data::{
    hash_commitment, hash_custom_payout, hash_settlement_agreement,
};
use windward_crypto::{KeyPair, TypedDomain};

use crate::adapter::{BotRecord, ChainAdapter};
use crate::error::{classify_rpc_error, ChainError};

/// Configuration for [`RpcChainAdapter`].
#[derive(Debug, Clone)]
pub struct RpcChainConfig {
    /// Chain gateway URL.
    pub url: String,
    pub chain_id: u64,
    /// Settlement contract address — the verifying contract of the
    /// contract-verifying domain.
    pub settlement_contract: Address,
    pub domain_name: String,
    pub domain_version: String,
    pub retry: RetryPolicy,
    /// Receipt poll cadence while waiting for a submitted tx to mine.
    pub receipt_poll: Duration,
    /// Give up waiting for a receipt after this long.
    pub receipt_timeout: Duration,
}

impl Default for RpcChainConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8545".into(),
            chain_id: 1,
            settlement_contract: Address([0u8; 20]),
            domain_name: "Windward".into(),
            domain_version: "1".into(),
            retry: RetryPolicy::default(),
            receipt_poll: Duration::from_millis(500),
            receipt_timeout: Duration::from_secs(60),
        }
    }
}

/// Chain adapter over a JSON-RPC gateway.
pub struct RpcChainAdapter {
    config: RpcChainConfig,
    domain: TypedDomain,
    keypair: KeyPair,
    client: reqwest::Client,
}

impl RpcChainAdapter {
    pub fn new(config: RpcChainConfig, keypair: KeyPair) -> Self {
        let domain = TypedDomain::contract(
            &config.domain_name,
            &config.domain_version,
            config.chain_id,
            config.settlement_contract,
        );
        Self { config, domain, keypair, client: reqwest::Client::new() }
    }

    pub fn domain(&self) -> &TypedDomain {
        &self.domain
    }

    /// One JSON-RPC call under the retry envelope; returns the `result`.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ChainError> {
        let result = retry_async(&self.config.retry, method, |_attempt| {
            self.call_once(method, params.clone())
        })
        .await?;
        serde_json::from_value(result)
            .map_err(|e| ChainError::BadResponse(format!("{method}: {e}")))
    }

    async fn call_once(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(format!("{method}: {e}")))?;

        if resp.status().is_server_error() {
            return Err(ChainError::Transport(format!(
                "{method}: HTTP {}",
                resp.status()
            )));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChainError::BadResponse(format!("{method}: {e}")))?;

        if let Some(err) = json.get("error") {
            let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown rpc error");
            return Err(classify_rpc_error(code, message));
        }

        Ok(json.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }

    /// Poll the receipt until mined. Transport errors while polling are
    /// tolerated (re-query on reconnect) up to the receipt deadline.
    async fn wait_mined(&self, tx_hash: &str) -> Result<(), ChainError> {
        let deadline = Instant::now() + self.config.receipt_timeout;
        loop {
            match self
                .call_once("chain_getReceipt", json!([tx_hash]))
                .await
            {
                Ok(receipt) => match receipt.get("status").and_then(|s| s.as_str()) {
                    Some("mined") => return Ok(()),
                    Some("failed") => {
                        let reason = receipt
                            .get("reason")
                            .and_then(|r| r.as_str())
                            .unwrap_or("transaction failed");
                        return Err(ChainError::Reverted(reason.to_string()));
                    }
                    _ => debug!(%tx_hash, "receipt pending"),
                },
                Err(e) if e.is_retryable() => {
                    warn!(%tx_hash, error = %e, "receipt query failed, will re-query");
                }
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Err(ChainError::Timeout {
                    ms: self.config.receipt_timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.config.receipt_poll).await;
        }
    }

    /// Submit a transaction-shaped call, then block until it is mined.
    async fn submit(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ChainError> {
        let result: serde_json::Value = self.call(method, params).await?;
        let tx_hash = result
            .get("tx_hash")
            .and_then(|h| h.as_str())
            .ok_or_else(|| ChainError::BadResponse(format!("{method}: missing tx_hash")))?
            .to_string();
        self.wait_mined(&tx_hash).await?;
        Ok(result)
    }
}

#[async_trait]
impl ChainAdapter for RpcChainAdapter {
    async fn approve(&self, spender: Address, amount: Amount) -> Result<(), ChainError> {
        self.submit("wind_approve", json!([spender, amount.to_string()]))
            .await?;
        Ok(())
    }

    async fn balance(&self) -> Result<Amount, ChainError> {
        let s: String = self
            .call("wind_balanceOf", json!([self.keypair.address]))
            .await?;
        s.parse()
            .map_err(|e| ChainError::BadResponse(format!("balance '{s}': {e}")))
    }

    async fn register_bot(&self, endpoint: &str, pubkey_hash: Digest) -> Result<(), ChainError> {
        self.submit("registry_registerBot", json!([endpoint, pubkey_hash]))
            .await?;
        Ok(())
    }

    async fn deregister_bot(&self) -> Result<(), ChainError> {
        self.submit("registry_deregisterBot", json!([])).await?;
        Ok(())
    }

    async fn get_bot(&self, address: Address) -> Result<Option<BotRecord>, ChainError> {
        self.call("registry_getBot", json!([address])).await
    }

    async fn get_all_active_bots(&self) -> Result<Vec<BotRecord>, ChainError> {
        self.call("registry_getAllActiveBots", json!([])).await
    }

    async fn deposit_to_vault(&self, amount: Amount) -> Result<(), ChainError> {
        self.submit("vault_deposit", json!([amount.to_string()])).await?;
        Ok(())
    }

    async fn withdraw_from_vault(&self, amount: Amount) -> Result<(), ChainError> {
        self.submit("vault_withdraw", json!([amount.to_string()])).await?;
        Ok(())
    }

    async fn get_vault_balance(&self, address: Address) -> Result<VaultBalance, ChainError> {
        self.call("vault_getBalance", json!([address])).await
    }

    async fn get_vault_nonce(&self, address: Address) -> Result<Nonce, ChainError> {
        self.call("vault_getNonce", json!([address])).await
    }

    fn sign_bilateral_commitment(
        &self,
        commitment: &BilateralCommitment,
    ) -> Result<Signature, ChainError> {
        let digest = hash_commitment(&self.domain, commitment);
        Ok(self.keypair.sign_digest(&digest))
    }

    async fn commit_bilateral_bet(
        &self,
        commitment: &BilateralCommitment,
        creator_sig: &Signature,
        filler_sig: &Signature,
    ) -> Result<BetId, ChainError> {
        let result = self
            .submit(
                "settlement_commitBet",
                json!([commitment, creator_sig, filler_sig]),
            )
            .await?;
        let bet_id = result
            .get("bet_id")
            .and_then(|b| b.as_u64())
            .ok_or_else(|| ChainError::BadResponse("commitBet: missing bet_id".into()))?;
        Ok(BetId(bet_id))
    }

    fn sign_settlement_agreement(
        &self,
        agreement: &SettlementAgreement,
    ) -> Result<Signature, ChainError> {
        let digest = hash_settlement_agreement(&self.domain, agreement);
        Ok(self.keypair.sign_digest(&digest))
    }

    async fn settle_by_agreement(
        &self,
        agreement: &SettlementAgreement,
        creator_sig: &Signature,
        filler_sig: &Signature,
    ) -> Result<(), ChainError> {
        self.submit(
            "settlement_settleByAgreement",
            json!([agreement, creator_sig, filler_sig]),
        )
        .await?;
        Ok(())
    }

    fn sign_custom_payout(&self, payout: &CustomPayout) -> Result<Signature, ChainError> {
        let digest = hash_custom_payout(&self.domain, payout);
        Ok(self.keypair.sign_digest(&digest))
    }

    async fn custom_payout(
        &self,
        payout: &CustomPayout,
        creator_sig: &Signature,
        filler_sig: &Signature,
    ) -> Result<(), ChainError> {
        self.submit(
            "settlement_customPayout",
            json!([payout, creator_sig, filler_sig]),
        )
        .await?;
        Ok(())
    }

    async fn request_arbitration(&self, bet_id: BetId) -> Result<(), ChainError> {
        self.submit("settlement_requestArbitration", json!([bet_id])).await?;
        Ok(())
    }

    async fn get_bet(&self, bet_id: BetId) -> Result<Bet, ChainError> {
        self.call("settlement_getBet", json!([bet_id])).await
    }

    fn signer_address(&self) -> Address {
        self.keypair.address
    }
}
