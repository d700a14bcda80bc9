//! In-process server round-trips: a real axum listener on a loopback port,
//! driven by the typed client. Covers signature attribution, replay
//! rejection, header-authenticated portfolio reads, commitment
//! countersigning and the settlement exchange over HTTP.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use windward_chain::{BotRecord, ChainAdapter, ChainError};
use windward_core::error::WindwardError;
use windward_core::types::{
    Address, Amount, Bet, BetId, BetStatus, BilateralCommitment, CustomPayout, Digest, Nonce,
    ReplyStatus, SettlementAgreement, SettlementProposal, Signature, Trade, VaultBalance,
};
use windward_crypto::typed_data::{
    hash_commitment, hash_settlement_agreement, hash_settlement_proposal,
};
use windward_crypto::{recover_address, KeyPair, TypedDomain};
use windward_discovery::{DiscoveryConfig, PeerDirectory};
use windward_p2p::auth::trades_upload_digest;
use windward_p2p::messages::{CommitmentSignRequest, TradeProposition, TradesUpload};
use windward_p2p::{P2pClient, P2pServerConfig, ReplayCache, ServerContext};
use windward_resilience::{MetricsCollector, ResilienceLog};
use windward_settlement::{
    ExitPrice, PriceSource, SettlementConfig, SettlementCoordinator, SettlementTransport,
    TradeStore,
};

const WIND: Amount = 1_000_000_000_000_000_000;

fn contract_domain() -> TypedDomain {
    TypedDomain::contract("Windward", "1", 1, Address([0xCC; 20]))
}

fn p2p_domain() -> TypedDomain {
    TypedDomain::p2p("Windward", "1", 1)
}

// ── Mock chain ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ChainState {
    bots: Vec<BotRecord>,
    bets: HashMap<BetId, Bet>,
    nonces: HashMap<Address, Nonce>,
    balances: HashMap<Address, VaultBalance>,
}

struct MockChain {
    state: Arc<Mutex<ChainState>>,
    keypair: Arc<KeyPair>,
}

#[async_trait]
impl ChainAdapter for MockChain {
    async fn approve(&self, _: Address, _: Amount) -> Result<(), ChainError> {
        Ok(())
    }
    async fn balance(&self) -> Result<Amount, ChainError> {
        Ok(0)
    }
    async fn register_bot(&self, _: &str, _: Digest) -> Result<(), ChainError> {
        Ok(())
    }
    async fn deregister_bot(&self) -> Result<(), ChainError> {
        Ok(())
    }
    async fn get_bot(&self, address: Address) -> Result<Option<BotRecord>, ChainError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .bots
            .iter()
            .find(|b| b.address == address)
            .cloned())
    }
    async fn get_all_active_bots(&self) -> Result<Vec<BotRecord>, ChainError> {
        Ok(self.state.lock().unwrap().bots.clone())
    }
    async fn deposit_to_vault(&self, _: Amount) -> Result<(), ChainError> {
        Ok(())
    }
    async fn withdraw_from_vault(&self, _: Amount) -> Result<(), ChainError> {
        Ok(())
    }
    async fn get_vault_balance(&self, address: Address) -> Result<VaultBalance, ChainError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .balances
            .get(&address)
            .copied()
            .unwrap_or(VaultBalance { available: 10 * WIND, locked: 0, total: 10 * WIND }))
    }
    async fn get_vault_nonce(&self, address: Address) -> Result<Nonce, ChainError> {
        Ok(*self.state.lock().unwrap().nonces.get(&address).unwrap_or(&0))
    }
    fn sign_bilateral_commitment(
        &self,
        c: &BilateralCommitment,
    ) -> Result<Signature, ChainError> {
        Ok(self.keypair.sign_digest(&hash_commitment(&contract_domain(), c)))
    }
    async fn commit_bilateral_bet(
        &self,
        c: &BilateralCommitment,
        _: &Signature,
        _: &Signature,
    ) -> Result<BetId, ChainError> {
        let mut state = self.state.lock().unwrap();
        let bet_id = BetId(state.bets.len() as u64 + 1);
        state.bets.insert(
            bet_id,
            Bet {
                bet_id,
                trades_root: c.trades_root,
                creator: c.creator,
                filler: c.filler,
                creator_amount: c.creator_amount,
                filler_amount: c.filler_amount,
                deadline: c.resolution_deadline,
                created_at: 0,
                status: BetStatus::Active,
            },
        );
        Ok(bet_id)
    }
    fn sign_settlement_agreement(
        &self,
        a: &SettlementAgreement,
    ) -> Result<Signature, ChainError> {
        Ok(self
            .keypair
            .sign_digest(&hash_settlement_agreement(&contract_domain(), a)))
    }
    async fn settle_by_agreement(
        &self,
        _: &SettlementAgreement,
        _: &Signature,
        _: &Signature,
    ) -> Result<(), ChainError> {
        Ok(())
    }
    fn sign_custom_payout(&self, p: &CustomPayout) -> Result<Signature, ChainError> {
        Ok(self
            .keypair
            .sign_digest(&windward_crypto::typed_data::hash_custom_payout(&contract_domain(), p)))
    }
    async fn custom_payout(
        &self,
        _: &CustomPayout,
        _: &Signature,
        _: &Signature,
    ) -> Result<(), ChainError> {
        Ok(())
    }
    async fn request_arbitration(&self, _: BetId) -> Result<(), ChainError> {
        Ok(())
    }
    async fn get_bet(&self, bet_id: BetId) -> Result<Bet, ChainError> {
        self.state
            .lock()
            .unwrap()
            .bets
            .get(&bet_id)
            .cloned()
            .ok_or_else(|| ChainError::Reverted("unknown bet".into()))
    }
    fn signer_address(&self) -> Address {
        self.keypair.address
    }
}

struct FixedPrices(Vec<ExitPrice>);

#[async_trait]
impl PriceSource for FixedPrices {
    async fn exit_prices(
        &self,
        _: BetId,
        _: &str,
        _: &[String],
    ) -> Result<Vec<ExitPrice>, WindwardError> {
        Ok(self.0.clone())
    }
}

struct NoTransport;

#[async_trait]
impl SettlementTransport for NoTransport {
    async fn send_proposal(
        &self,
        _: &str,
        _: &SettlementProposal,
    ) -> Result<windward_core::types::SettlementReply, WindwardError> {
        Err(WindwardError::Transport("server side never initiates here".into()))
    }
}

// ── Fixture ───────────────────────────────────────────────────────────────────

struct Fixture {
    endpoint: String,
    client: P2pClient,
    server_kp: Arc<KeyPair>,
    peer_kp: Arc<KeyPair>,
    state: Arc<Mutex<ChainState>>,
    #[allow(dead_code)] // keeps the agent dir alive for the test's duration
    dir: tempfile::TempDir,
}

async fn start_fixture(prices: Vec<ExitPrice>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let server_kp = Arc::new(KeyPair::generate());
    let peer_kp = Arc::new(KeyPair::generate());

    let state = Arc::new(Mutex::new(ChainState::default()));
    {
        let mut s = state.lock().unwrap();
        s.bots = vec![
            BotRecord {
                address: server_kp.address,
                endpoint: "http://server".into(),
                pubkey_hash: server_kp.pubkey_hash(),
                active: true,
            },
            BotRecord {
                address: peer_kp.address,
                endpoint: "http://peer".into(),
                pubkey_hash: peer_kp.pubkey_hash(),
                active: true,
            },
        ];
        s.nonces.insert(peer_kp.address, 2);
        s.nonces.insert(server_kp.address, 5);
    }

    let chain: Arc<dyn ChainAdapter> =
        Arc::new(MockChain { state: Arc::clone(&state), keypair: Arc::clone(&server_kp) });
    let trades = Arc::new(TradeStore::open(dir.path()).unwrap());
    let log = Arc::new(ResilienceLog::new(dir.path().join("resilience.log")));
    let metrics = Arc::new(MetricsCollector::new());
    let discovery = Arc::new(PeerDirectory::new(
        Arc::clone(&chain),
        server_kp.address,
        DiscoveryConfig::default(),
    ));
    let coordinator = Arc::new(SettlementCoordinator::new(
        Arc::clone(&chain),
        Arc::new(NoTransport),
        discovery,
        Arc::new(FixedPrices(prices)),
        Arc::clone(&trades),
        Arc::clone(&server_kp),
        SettlementConfig::new(p2p_domain()),
        Arc::clone(&log),
        Arc::clone(&metrics),
    ));

    let ctx = Arc::new(ServerContext {
        config: P2pServerConfig::default(),
        keypair: Arc::clone(&server_kp),
        chain,
        coordinator,
        trades,
        p2p_domain: p2p_domain(),
        contract_domain: contract_domain(),
        replay: ReplayCache::new(Duration::from_secs(600)),
        metrics,
        started_at: Instant::now(),
    });

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (local_addr, _handle) = windward_p2p::start(ctx, addr).await.unwrap();

    Fixture {
        endpoint: format!("http://{local_addr}"),
        client: P2pClient::default(),
        server_kp,
        peer_kp,
        state,
        dir,
    }
}

fn portfolio(n: usize) -> Vec<Trade> {
    (0..n)
        .map(|i| Trade {
            ticker: format!("WND{i:04}"),
            method: "up_1h".into(),
            entry_price: 1_000,
        })
        .collect()
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn signed_proposition(fx: &Fixture, trades: &[Trade]) -> TradeProposition {
    let root = windward_hash::root("snap-1", trades);
    let mut p = TradeProposition {
        proposer: fx.peer_kp.address,
        counterparty: fx.server_kp.address,
        snapshot_id: "snap-1".into(),
        trades_root: root,
        creator_amount: WIND,
        filler_amount: WIND,
        resolution_deadline: unix_now() + 3_600,
        expiry: unix_now() + 300,
        nonce: 2,
        payload: windward_hash::encode(trades).unwrap(),
        signature: Signature([0; 65]),
    };
    p.signature = fx.peer_kp.sign_digest(&p.digest(&p2p_domain()));
    p
}

/// Install an Active bet between peer (creator) and server (filler).
fn install_bet(fx: &Fixture, bet_id: BetId, trades: &[Trade]) {
    let root = windward_hash::root("snap-1", trades);
    fx.state.lock().unwrap().bets.insert(
        bet_id,
        Bet {
            bet_id,
            trades_root: root,
            creator: fx.peer_kp.address,
            filler: fx.server_kp.address,
            creator_amount: WIND,
            filler_amount: WIND,
            deadline: unix_now() - 30,
            created_at: unix_now() - 3_600,
            status: BetStatus::Active,
        },
    );
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_and_info_round_trip() {
    let fx = start_fixture(vec![]).await;

    let health = fx.client.health(&fx.endpoint).await.unwrap();
    assert_eq!(health.status, "healthy");

    let info = fx.client.info(&fx.endpoint).await.unwrap();
    assert_eq!(info.address, fx.server_kp.address);
    assert_eq!(info.pubkey_hash, fx.server_kp.pubkey_hash());
}

#[tokio::test]
async fn proposition_accepted_then_replay_rejected() {
    let fx = start_fixture(vec![]).await;
    let trades = portfolio(20);
    let proposition = signed_proposition(&fx, &trades);

    let response = fx.client.propose(&fx.endpoint, &proposition).await.unwrap();
    assert!(response.received);
    assert_eq!(response.proposal_hash, proposition.digest(&p2p_domain()));

    // The identical message is a replay: rejected with a non-retryable
    // status, so the client gives up immediately.
    let err = fx.client.propose(&fx.endpoint, &proposition).await.unwrap_err();
    assert!(matches!(err, WindwardError::HttpStatus { status: 400, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn forged_signature_is_unauthorized() {
    let fx = start_fixture(vec![]).await;
    let trades = portfolio(5);
    let mut proposition = signed_proposition(&fx, &trades);
    let mallory = KeyPair::generate();
    proposition.signature = mallory.sign_digest(&proposition.digest(&p2p_domain()));

    let err = fx.client.propose(&fx.endpoint, &proposition).await.unwrap_err();
    assert!(matches!(err, WindwardError::HttpStatus { status: 401, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn stale_nonce_is_rejected() {
    let fx = start_fixture(vec![]).await;
    let trades = portfolio(5);
    let mut proposition = signed_proposition(&fx, &trades);
    proposition.nonce = 1; // chain nonce is 2
    proposition.signature = fx.peer_kp.sign_digest(&proposition.digest(&p2p_domain()));

    let err = fx.client.propose(&fx.endpoint, &proposition).await.unwrap_err();
    assert!(matches!(err, WindwardError::HttpStatus { status: 400, .. }));
}

#[tokio::test]
async fn tampered_payload_fails_the_root_check() {
    let fx = start_fixture(vec![]).await;
    let trades = portfolio(5);
    let mut proposition = signed_proposition(&fx, &trades);
    // Swap the payload for a different portfolio without re-rooting.
    proposition.payload = windward_hash::encode(&portfolio(4)).unwrap();
    proposition.signature = fx.peer_kp.sign_digest(&proposition.digest(&p2p_domain()));

    let err = fx.client.propose(&fx.endpoint, &proposition).await.unwrap_err();
    assert!(matches!(err, WindwardError::HttpStatus { status: 400, .. }));
}

#[tokio::test]
async fn trades_replicate_and_read_back_authenticated() {
    let fx = start_fixture(vec![]).await;
    let trades = portfolio(30);
    let bet_id = BetId(7);
    install_bet(&fx, bet_id, &trades);

    let root = windward_hash::root("snap-1", &trades);
    let digest = trades_upload_digest(bet_id, &root, "snap-1");
    let upload = TradesUpload {
        bet_id,
        snapshot_id: "snap-1".into(),
        payload: windward_hash::encode(&trades).unwrap(),
        signer: fx.peer_kp.address,
        signature: fx.peer_kp.sign_digest(&digest),
    };
    let response = fx.client.upload_trades(&fx.endpoint, &upload).await.unwrap();
    assert!(response.received);

    // Authenticated read-back by the bet's creator.
    let list = fx
        .client
        .fetch_trades(&fx.endpoint, bet_id, &fx.peer_kp, unix_now())
        .await
        .unwrap();
    assert_eq!(list.trades.len(), 30);
    assert_eq!(list.snapshot_id, "snap-1");
    assert_eq!(list.trades[3].index, 3);
    assert_eq!(list.trades[3].ticker, "WND0003");

    // A stranger with a valid signature but no stake in the bet is refused.
    let stranger = KeyPair::generate();
    let err = fx
        .client
        .fetch_trades(&fx.endpoint, bet_id, &stranger, unix_now())
        .await
        .unwrap_err();
    assert!(matches!(err, WindwardError::HttpStatus { status: 401, .. }));
}

#[tokio::test]
async fn commitment_countersignature_recovers_to_server() {
    let fx = start_fixture(vec![]).await;
    let commitment = BilateralCommitment {
        trades_root: Digest([5; 32]),
        creator: fx.peer_kp.address,
        filler: fx.server_kp.address,
        creator_amount: WIND,
        filler_amount: WIND,
        resolution_deadline: unix_now() + 3_600,
        nonce: 2,
        signature_expiry: unix_now() + 600,
    };
    let digest = hash_commitment(&contract_domain(), &commitment);
    let request = CommitmentSignRequest {
        requester_signature: fx.peer_kp.sign_digest(&digest),
        commitment: commitment.clone(),
        expiry: unix_now() + 300,
    };

    let response = fx.client.sign_commitment(&fx.endpoint, &request).await.unwrap();
    assert!(response.accepted, "reason: {:?}", response.reason);
    let countersig = response.signature.unwrap();
    assert_eq!(recover_address(&digest, &countersig).unwrap(), fx.server_kp.address);
}

#[tokio::test]
async fn commitment_naming_another_filler_is_declined() {
    let fx = start_fixture(vec![]).await;
    let other = KeyPair::generate();
    let commitment = BilateralCommitment {
        trades_root: Digest([5; 32]),
        creator: fx.peer_kp.address,
        filler: other.address,
        creator_amount: WIND,
        filler_amount: WIND,
        resolution_deadline: unix_now() + 3_600,
        nonce: 2,
        signature_expiry: unix_now() + 600,
    };
    let digest = hash_commitment(&contract_domain(), &commitment);
    let request = CommitmentSignRequest {
        requester_signature: fx.peer_kp.sign_digest(&digest),
        commitment,
        expiry: unix_now() + 300,
    };

    let response = fx.client.sign_commitment(&fx.endpoint, &request).await.unwrap();
    assert!(!response.accepted);
    assert!(response.signature.is_none());
}

#[tokio::test]
async fn commit_flow_runs_sign_commit_and_replicate() {
    let fx = start_fixture(vec![]).await;
    let trades = portfolio(10);
    let root = windward_hash::root("snap-1", &trades);
    let commitment = BilateralCommitment {
        trades_root: root,
        creator: fx.peer_kp.address,
        filler: fx.server_kp.address,
        creator_amount: WIND,
        filler_amount: WIND,
        resolution_deadline: unix_now() + 3_600,
        nonce: 2,
        signature_expiry: unix_now() + 600,
    };

    // Creator-side view of the same chain, signing with the peer key.
    let creator_chain =
        MockChain { state: Arc::clone(&fx.state), keypair: Arc::clone(&fx.peer_kp) };
    let creator_dir = tempfile::tempdir().unwrap();
    let creator_store = TradeStore::open(creator_dir.path()).unwrap();

    let bet_id = windward_p2p::flow::commit_bilateral_bet(
        &creator_chain,
        &fx.client,
        &fx.peer_kp,
        &creator_store,
        &fx.endpoint,
        &commitment,
        "snap-1",
        &trades,
    )
    .await
    .unwrap();

    // On-chain bet exists and mirrors the commitment.
    let bet = fx.state.lock().unwrap().bets[&bet_id].clone();
    assert_eq!(bet.status, BetStatus::Active);
    assert_eq!(bet.trades_root, root);
    assert_eq!(bet.creator, fx.peer_kp.address);
    assert_eq!(bet.filler, fx.server_kp.address);

    // Both sides hold the portfolio: creator locally, filler via upload.
    assert_eq!(creator_store.load(bet_id).unwrap().trades, trades);
    let server_store = TradeStore::open(fx.dir.path()).unwrap();
    assert_eq!(server_store.load(bet_id).unwrap().trades, trades);
}

#[tokio::test]
async fn settlement_exchange_over_http_agrees() {
    // Creator wins 3 of 4 up-trades entered at 1000.
    let prices = vec![
        ExitPrice::Price(2_000),
        ExitPrice::Price(2_000),
        ExitPrice::Price(2_000),
        ExitPrice::Price(500),
    ];
    let fx = start_fixture(prices.clone()).await;
    let trades = portfolio(4);
    let bet_id = BetId(9);
    install_bet(&fx, bet_id, &trades);

    // Server side holds the portfolio (as the filler).
    {
        let stored = TradeStore::open(fx.dir.path()).unwrap();
        stored.save(bet_id, "snap-1", &trades).unwrap();
    }

    // The creator computes the same outcome locally and proposes it.
    let exits = prices;
    let outcome = windward_settlement::compute_outcome(
        &trades,
        &exits,
        fx.peer_kp.address,
        fx.server_kp.address,
    );
    assert_eq!(outcome.winner, Some(fx.peer_kp.address));

    let mut proposal = SettlementProposal {
        bet_id,
        claimed_winner: outcome.winner,
        wins_count: outcome.wins_count,
        valid_trades: outcome.valid_trades,
        is_tie: outcome.is_tie,
        proposer: fx.peer_kp.address,
        settlement_nonce: 5, // max(2, 5)
        proposal_expiry: unix_now() + 300,
        exit_prices_hash: None,
        signature: Signature([0; 65]),
    };
    proposal.signature = fx
        .peer_kp
        .sign_digest(&hash_settlement_proposal(&p2p_domain(), &proposal));

    let reply = fx
        .client
        .send_proposal(&fx.endpoint, &proposal)
        .await
        .unwrap();
    assert_eq!(reply.status, ReplyStatus::Agree);

    // The partner's signature covers the agreement with the shared nonce.
    let agreement = SettlementAgreement {
        bet_id,
        winner: fx.peer_kp.address,
        nonce: 5,
    };
    let digest = hash_settlement_agreement(&contract_domain(), &agreement);
    assert_eq!(
        recover_address(&digest, &reply.signature.unwrap()).unwrap(),
        fx.server_kp.address,
        "agree signature must embed the proposal's settlement nonce"
    );
}
