//! Inbound P2P server.
//!
//! axum router for the full P2P surface. Every mutating request is
//! verified before it touches state: the signature must recover to a
//! registered, active sender; the enclosed nonce and expiry must be fresh
//! against the chain; and the content hash must not have been accepted
//! before.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use windward_chain::ChainAdapter;
use windward_core::error::WindwardError;
use windward_core::types::{BetId, Digest, SettlementProposal, Signature, Timestamp};
use windward_crypto::typed_data::{hash_commitment, hash_settlement_proposal, trades_request_digest};
use windward_crypto::{recover_address, KeyPair, TypedDomain};
use windward_resilience::MetricsCollector;
use windward_settlement::{SettlementCoordinator, TradeStore};

use crate::auth::{require_fresh_nonce, require_registered, trades_upload_digest, ReplayCache};
use crate::messages::{
    AcceptResponse, CommitmentSignRequest, CommitmentSignResponse, ErrorBody, HealthResponse,
    IndexedTrade, InfoResponse, ProposeResponse, TradeAcceptance, TradeProposition,
    TradesListResponse, TradesUpload, TradesUploadResponse,
};

#[derive(Debug, Clone)]
pub struct P2pServerConfig {
    /// Public URL peers reach us at; reported by GET /p2p/info.
    pub public_endpoint: String,
    pub version: String,
    /// Accepted clock skew for header-authenticated requests.
    pub freshness_window_secs: i64,
}

impl Default for P2pServerConfig {
    fn default() -> Self {
        Self {
            public_endpoint: "http://127.0.0.1:9044".into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            freshness_window_secs: 300,
        }
    }
}

/// Shared state behind every handler.
pub struct ServerContext {
    pub config: P2pServerConfig,
    pub keypair: Arc<KeyPair>,
    pub chain: Arc<dyn ChainAdapter>,
    pub coordinator: Arc<SettlementCoordinator>,
    pub trades: Arc<TradeStore>,
    pub p2p_domain: TypedDomain,
    pub contract_domain: TypedDomain,
    pub replay: ReplayCache,
    pub metrics: Arc<MetricsCollector>,
    pub started_at: Instant,
}

type Ctx = Arc<ServerContext>;

/// Bind and serve. Returns the bound address (useful with port 0) and the
/// serving task handle.
pub async fn start(ctx: Ctx, addr: SocketAddr) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/p2p/health", get(health))
        .route("/p2p/info", get(server_info))
        .route("/p2p/propose", post(propose))
        .route("/p2p/accept", post(accept))
        .route("/p2p/commitment/sign", post(commitment_sign))
        .route("/p2p/trades", post(trades_upload))
        .route("/p2p/trades/:bet_id", get(trades_get))
        .route("/p2p/propose-settlement", post(propose_settlement))
        .route("/p2p/settlement/:bet_id", get(settlement_status))
        .layer(cors)
        .with_state(ctx);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "p2p server exited");
        }
    });
    info!(%local_addr, "P2P server started");
    Ok((local_addr, handle))
}

// ── Error mapping ─────────────────────────────────────────────────────────────

struct ApiError(WindwardError);

impl From<WindwardError> for ApiError {
    fn from(e: WindwardError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            WindwardError::SignatureRejected
            | WindwardError::MalformedSignature(_)
            | WindwardError::UnknownSender(_) => StatusCode::UNAUTHORIZED,
            WindwardError::Replay(_)
            | WindwardError::Expired { .. }
            | WindwardError::NonceMismatch { .. }
            | WindwardError::BetNotActive(_)
            | WindwardError::DeadlineNotPassed { .. }
            | WindwardError::HashMismatch(_)
            | WindwardError::InvalidPortfolio(_)
            | WindwardError::RateLimited(_) => StatusCode::BAD_REQUEST,
            WindwardError::MissingTrades(_) | WindwardError::TaskNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: true,
            message: self.0.to_string(),
            code: Some(status.as_u16()),
        };
        (status, Json(body)).into_response()
    }
}

fn unix_now() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn health(State(ctx): State<Ctx>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        timestamp: unix_now(),
        uptime: ctx.started_at.elapsed().as_secs(),
    })
}

async fn server_info(State(ctx): State<Ctx>) -> Json<InfoResponse> {
    Json(InfoResponse {
        address: ctx.keypair.address,
        endpoint: ctx.config.public_endpoint.clone(),
        pubkey_hash: ctx.keypair.pubkey_hash(),
        version: ctx.config.version.clone(),
        uptime: ctx.started_at.elapsed().as_secs(),
    })
}

async fn propose(
    State(ctx): State<Ctx>,
    Json(proposition): Json<TradeProposition>,
) -> Result<Json<ProposeResponse>, ApiError> {
    let now = unix_now();
    if now > proposition.expiry {
        return Err(WindwardError::Expired { expiry: proposition.expiry, now }.into());
    }

    let digest = proposition.digest(&ctx.p2p_domain);
    let recovered = recover_address(&digest, &proposition.signature)?;
    if recovered != proposition.proposer {
        return Err(WindwardError::SignatureRejected.into());
    }
    require_registered(ctx.chain.as_ref(), proposition.proposer).await?;
    require_fresh_nonce(ctx.chain.as_ref(), proposition.proposer, proposition.nonce).await?;
    ctx.replay.check_and_insert(digest)?;

    // The compressed payload must hash to the claimed root.
    let trades = windward_hash::decode(&proposition.payload)?;
    let root = windward_hash::root(&proposition.snapshot_id, &trades);
    if root != proposition.trades_root {
        return Err(WindwardError::HashMismatch(format!(
            "payload root {root} != claimed {}",
            proposition.trades_root
        ))
        .into());
    }

    ctx.metrics.record_p2p_request(true);
    info!(proposer = %proposition.proposer, trades = trades.len(), "trade proposition received");
    Ok(Json(ProposeResponse { received: true, proposal_hash: digest, message: None }))
}

async fn accept(
    State(ctx): State<Ctx>,
    Json(acceptance): Json<TradeAcceptance>,
) -> Result<Json<AcceptResponse>, ApiError> {
    let now = unix_now();
    if now > acceptance.expiry {
        return Err(WindwardError::Expired { expiry: acceptance.expiry, now }.into());
    }

    let digest = acceptance.digest(&ctx.p2p_domain);
    let recovered = recover_address(&digest, &acceptance.signature)?;
    // Acceptances come from the counterparty of the original proposition.
    if recovered != acceptance.counterparty {
        return Err(WindwardError::SignatureRejected.into());
    }
    require_registered(ctx.chain.as_ref(), acceptance.counterparty).await?;
    require_fresh_nonce(ctx.chain.as_ref(), acceptance.counterparty, acceptance.nonce).await?;
    ctx.replay.check_and_insert(digest)?;

    ctx.metrics.record_p2p_request(true);
    info!(acceptor = %acceptance.counterparty, "trade acceptance received");
    Ok(Json(AcceptResponse { received: true, acceptance_hash: digest, message: None }))
}

async fn commitment_sign(
    State(ctx): State<Ctx>,
    Json(request): Json<CommitmentSignRequest>,
) -> Result<Json<CommitmentSignResponse>, ApiError> {
    let now = unix_now();
    let commitment = &request.commitment;
    if now > request.expiry || now > commitment.signature_expiry {
        return Err(WindwardError::Expired {
            expiry: request.expiry.min(commitment.signature_expiry),
            now,
        }
        .into());
    }

    // The requester signs the commitment under the contract-verifying
    // domain; their signature must recover to the commitment's creator.
    let digest = hash_commitment(&ctx.contract_domain, commitment);
    let recovered = recover_address(&digest, &request.requester_signature)?;
    if recovered != commitment.creator {
        return Err(WindwardError::SignatureRejected.into());
    }
    require_registered(ctx.chain.as_ref(), commitment.creator).await?;
    require_fresh_nonce(ctx.chain.as_ref(), commitment.creator, commitment.nonce).await?;
    ctx.replay.check_and_insert(digest)?;

    // Countersigning commits our collateral; refuse politely when the
    // commitment is not ours to fill or we cannot cover it.
    if commitment.filler != ctx.keypair.address {
        return Ok(Json(CommitmentSignResponse {
            accepted: false,
            signature: None,
            reason: Some("commitment names a different filler".into()),
        }));
    }
    let vault = ctx.chain.get_vault_balance(ctx.keypair.address).await.map_err(WindwardError::from)?;
    if vault.available < commitment.filler_amount {
        return Ok(Json(CommitmentSignResponse {
            accepted: false,
            signature: None,
            reason: Some("insufficient vault balance for filler stake".into()),
        }));
    }

    let signature = ctx
        .chain
        .sign_bilateral_commitment(commitment)
        .map_err(WindwardError::from)?;
    info!(creator = %commitment.creator, "commitment countersigned");
    Ok(Json(CommitmentSignResponse { accepted: true, signature: Some(signature), reason: None }))
}

async fn trades_upload(
    State(ctx): State<Ctx>,
    Json(upload): Json<TradesUpload>,
) -> Result<Json<TradesUploadResponse>, ApiError> {
    let trades = windward_hash::decode(&upload.payload)?;
    let root = windward_hash::root(&upload.snapshot_id, &trades);
    let digest = trades_upload_digest(upload.bet_id, &root, &upload.snapshot_id);
    let recovered = recover_address(&digest, &upload.signature)?;
    if recovered != upload.signer {
        return Err(WindwardError::SignatureRejected.into());
    }
    require_registered(ctx.chain.as_ref(), upload.signer).await?;

    // Only a party of the bet may replicate its portfolio, and only to the
    // other party.
    let bet = ctx.chain.get_bet(upload.bet_id).await.map_err(WindwardError::from)?;
    if !bet.is_party(&upload.signer) || !bet.is_party(&ctx.keypair.address) {
        return Err(WindwardError::UnknownSender(upload.signer.to_hex()).into());
    }
    if bet.trades_root != root {
        return Err(WindwardError::HashMismatch(format!(
            "payload root {root} != on-chain {}",
            bet.trades_root
        ))
        .into());
    }
    ctx.replay.check_and_insert(digest)?;

    ctx.trades.save(upload.bet_id, &upload.snapshot_id, &trades)?;
    info!(bet_id = %upload.bet_id, trades = trades.len(), "trade list replicated");
    Ok(Json(TradesUploadResponse { received: true, bet_id: upload.bet_id }))
}

async fn trades_get(
    State(ctx): State<Ctx>,
    Path(bet_id): Path<u64>,
    headers: HeaderMap,
) -> Result<Json<TradesListResponse>, ApiError> {
    let bet_id = BetId(bet_id);
    let signature = header(&headers, "X-Signature")?;
    let requestor = header(&headers, "X-Requestor")?;
    let timestamp = header(&headers, "X-Timestamp")?;

    let timestamp: Timestamp = timestamp
        .parse()
        .map_err(|_| WindwardError::MalformedSignature("X-Timestamp".into()))?;
    let now = unix_now();
    if (now - timestamp).abs() > ctx.config.freshness_window_secs {
        return Err(WindwardError::Expired { expiry: timestamp, now }.into());
    }

    let requestor = windward_core::types::Address::from_hex(&requestor)
        .map_err(|e| WindwardError::MalformedSignature(format!("X-Requestor: {e}")))?;
    let signature = Signature::from_hex(&signature)
        .map_err(|e| WindwardError::MalformedSignature(format!("X-Signature: {e}")))?;

    let digest = trades_request_digest(bet_id, timestamp);
    if recover_address(&digest, &signature)? != requestor {
        return Err(WindwardError::SignatureRejected.into());
    }

    // Portfolios are bilateral secrets: only the bet's parties may read.
    let bet = ctx.chain.get_bet(bet_id).await.map_err(WindwardError::from)?;
    if !bet.is_party(&requestor) {
        return Err(WindwardError::UnknownSender(requestor.to_hex()).into());
    }

    let stored = ctx
        .trades
        .load(bet_id)
        .ok_or(WindwardError::MissingTrades(bet_id.0))?;
    let trades = stored
        .trades
        .into_iter()
        .enumerate()
        .map(|(i, t)| IndexedTrade {
            index: i as u32,
            ticker: t.ticker,
            method: t.method,
            entry_price: t.entry_price,
        })
        .collect();
    Ok(Json(TradesListResponse { bet_id, snapshot_id: stored.snapshot_id, trades }))
}

async fn propose_settlement(
    State(ctx): State<Ctx>,
    Json(proposal): Json<SettlementProposal>,
) -> Result<Json<windward_core::types::SettlementReply>, ApiError> {
    let digest: Digest = hash_settlement_proposal(&ctx.p2p_domain, &proposal);
    ctx.replay.check_and_insert(digest)?;
    let reply = ctx.coordinator.handle_incoming(proposal).await?;
    Ok(Json(reply))
}

async fn settlement_status(
    State(ctx): State<Ctx>,
    Path(bet_id): Path<u64>,
) -> Json<windward_settlement::SettlementReadiness> {
    Json(ctx.coordinator.readiness(BetId(bet_id)))
}

fn header(headers: &HeaderMap, name: &str) -> Result<String, WindwardError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| WindwardError::MalformedSignature(format!("missing header {name}")))
}
