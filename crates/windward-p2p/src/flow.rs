//! Commit-side flow.
//!
//! Takes an agreed portfolio from signed commitment to an on-chain
//! bilateral bet: sign as creator, collect the filler's countersignature
//! over HTTP, submit the commitment, then persist the portfolio locally
//! and replicate it to the counterparty so either side can settle alone.

use tracing::{info, warn};

use windward_chain::ChainAdapter;
use windward_core::error::WindwardError;
use windward_core::types::{BetId, BilateralCommitment, Trade};
use windward_crypto::KeyPair;
use windward_settlement::TradeStore;

use crate::auth::trades_upload_digest;
use crate::client::P2pClient;
use crate::messages::{CommitmentSignRequest, TradesUpload};

/// Drive one commitment through countersigning and on-chain commit.
/// The caller is the creator; `partner_endpoint` belongs to the filler.
pub async fn commit_bilateral_bet(
    chain: &dyn ChainAdapter,
    client: &P2pClient,
    keypair: &KeyPair,
    trades_store: &TradeStore,
    partner_endpoint: &str,
    commitment: &BilateralCommitment,
    snapshot_id: &str,
    trades: &[Trade],
) -> Result<BetId, WindwardError> {
    let creator_sig = chain.sign_bilateral_commitment(commitment)?;

    let response = client
        .sign_commitment(
            partner_endpoint,
            &CommitmentSignRequest {
                commitment: commitment.clone(),
                requester_signature: creator_sig.clone(),
                expiry: commitment.signature_expiry,
            },
        )
        .await?;
    let filler_sig = match (response.accepted, response.signature) {
        (true, Some(sig)) => sig,
        _ => {
            warn!(
                reason = response.reason.as_deref().unwrap_or("none given"),
                "filler declined to countersign"
            );
            return Err(WindwardError::SignatureRejected);
        }
    };

    let bet_id = chain
        .commit_bilateral_bet(commitment, &creator_sig, &filler_sig)
        .await?;
    info!(%bet_id, "bilateral bet committed");

    // Persist our copy first; settlement must never depend on the partner.
    trades_store.save(bet_id, snapshot_id, trades)?;

    let root = windward_hash::root(snapshot_id, trades);
    let digest = trades_upload_digest(bet_id, &root, snapshot_id);
    let upload = TradesUpload {
        bet_id,
        snapshot_id: snapshot_id.to_string(),
        payload: windward_hash::encode(trades)?,
        signer: keypair.address,
        signature: keypair.sign_digest(&digest),
    };
    if let Err(e) = client.upload_trades(partner_endpoint, &upload).await {
        // The bet is live either way; the partner can still pull the list
        // through GET /p2p/trades/{bet-id}.
        warn!(%bet_id, error = %e, "trade replication to partner failed");
    }

    Ok(bet_id)
}
