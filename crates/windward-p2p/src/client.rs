//! Outbound P2P client.
//!
//! Typed request/response over HTTP/1.1 JSON, wrapped in the shared retry
//! envelope: up to three attempts with exponential backoff, per-attempt
//! timeout, and immediate surfacing of 400/401 rejections. Broadcast fans
//! out concurrently and returns per-peer results.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use windward_core::error::WindwardError;
use windward_core::retry::{retry_async, RetryPolicy};
use windward_core::types::{
    Address, BetId, PeerRecord, SettlementProposal, SettlementReply, Timestamp,
};
use windward_crypto::typed_data::trades_request_digest;
use windward_crypto::KeyPair;
use windward_settlement::{SettlementReadiness, SettlementTransport};

use crate::messages::{
    AcceptResponse, CommitmentSignRequest, CommitmentSignResponse, ErrorBody, HealthResponse,
    InfoResponse, ProposeResponse, TradeAcceptance, TradeProposition, TradesListResponse,
    TradesUpload, TradesUploadResponse,
};

pub struct P2pClient {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl Default for P2pClient {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl P2pClient {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { client: reqwest::Client::new(), retry }
    }

    fn url(endpoint: &str, path: &str) -> String {
        format!("{}{path}", endpoint.trim_end_matches('/'))
    }

    async fn post<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        path: &str,
        body: &B,
    ) -> Result<R, WindwardError> {
        let url = Self::url(endpoint, path);
        retry_async(&self.retry, path, |attempt| {
            let url = url.clone();
            async move {
                debug!(%url, attempt, "p2p request");
                let resp = self
                    .client
                    .post(&url)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| WindwardError::Transport(format!("{url}: {e}")))?;
                Self::read_response(resp, &url).await
            }
        })
        .await
    }

    async fn get<R: DeserializeOwned>(
        &self,
        endpoint: &str,
        path: &str,
        headers: &[(&str, String)],
    ) -> Result<R, WindwardError> {
        let url = Self::url(endpoint, path);
        retry_async(&self.retry, path, |_attempt| {
            let url = url.clone();
            async move {
                let mut req = self.client.get(&url);
                for (name, value) in headers {
                    req = req.header(*name, value);
                }
                let resp = req
                    .send()
                    .await
                    .map_err(|e| WindwardError::Transport(format!("{url}: {e}")))?;
                Self::read_response(resp, &url).await
            }
        })
        .await
    }

    async fn read_response<R: DeserializeOwned>(
        resp: reqwest::Response,
        url: &str,
    ) -> Result<R, WindwardError> {
        let status = resp.status();
        if status.is_success() {
            return resp
                .json()
                .await
                .map_err(|e| WindwardError::Serialization(format!("{url}: {e}")));
        }
        // Peers answer errors with a JSON body; fold its message into the
        // typed status error so 400/401 classify non-retryable upstream.
        let message = resp
            .json::<ErrorBody>()
            .await
            .map(|b| b.message)
            .unwrap_or_else(|_| status.to_string());
        debug!(%url, status = status.as_u16(), %message, "p2p error response");
        Err(WindwardError::HttpStatus { status: status.as_u16(), url: url.to_string() })
    }

    // ── Typed surface ────────────────────────────────────────────────────────

    pub async fn health(&self, endpoint: &str) -> Result<HealthResponse, WindwardError> {
        self.get(endpoint, "/p2p/health", &[]).await
    }

    pub async fn info(&self, endpoint: &str) -> Result<InfoResponse, WindwardError> {
        self.get(endpoint, "/p2p/info", &[]).await
    }

    pub async fn propose(
        &self,
        endpoint: &str,
        proposition: &TradeProposition,
    ) -> Result<ProposeResponse, WindwardError> {
        self.post(endpoint, "/p2p/propose", proposition).await
    }

    pub async fn accept(
        &self,
        endpoint: &str,
        acceptance: &TradeAcceptance,
    ) -> Result<AcceptResponse, WindwardError> {
        self.post(endpoint, "/p2p/accept", acceptance).await
    }

    pub async fn sign_commitment(
        &self,
        endpoint: &str,
        request: &CommitmentSignRequest,
    ) -> Result<CommitmentSignResponse, WindwardError> {
        self.post(endpoint, "/p2p/commitment/sign", request).await
    }

    pub async fn upload_trades(
        &self,
        endpoint: &str,
        upload: &TradesUpload,
    ) -> Result<TradesUploadResponse, WindwardError> {
        self.post(endpoint, "/p2p/trades", upload).await
    }

    /// Authenticated portfolio fetch: the caller signs keccak(bet-id,
    /// timestamp) and sends it in headers.
    pub async fn fetch_trades(
        &self,
        endpoint: &str,
        bet_id: BetId,
        keypair: &KeyPair,
        timestamp: Timestamp,
    ) -> Result<TradesListResponse, WindwardError> {
        let digest = trades_request_digest(bet_id, timestamp);
        let signature = keypair.sign_digest(&digest);
        let headers = [
            ("X-Signature", signature.to_hex()),
            ("X-Requestor", keypair.address.to_hex()),
            ("X-Timestamp", timestamp.to_string()),
        ];
        self.get(endpoint, &format!("/p2p/trades/{}", bet_id.0), &headers)
            .await
    }

    pub async fn settlement_status(
        &self,
        endpoint: &str,
        bet_id: BetId,
    ) -> Result<SettlementReadiness, WindwardError> {
        self.get(endpoint, &format!("/p2p/settlement/{}", bet_id.0), &[])
            .await
    }

    /// Fan a request out to every peer concurrently; each peer gets the
    /// full retry envelope independently.
    pub async fn broadcast<B, R>(
        &self,
        peers: &[PeerRecord],
        path: &str,
        body: &B,
    ) -> Vec<(Address, Result<R, WindwardError>)>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let sends = peers.iter().map(|peer| async move {
            let result = self.post(&peer.endpoint, path, body).await;
            (peer.address, result)
        });
        futures::future::join_all(sends).await
    }
}

#[async_trait]
impl SettlementTransport for P2pClient {
    async fn send_proposal(
        &self,
        endpoint: &str,
        proposal: &SettlementProposal,
    ) -> Result<SettlementReply, WindwardError> {
        self.post(endpoint, "/p2p/propose-settlement", proposal).await
    }
}
