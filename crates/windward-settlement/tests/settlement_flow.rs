//! Paired-coordinator settlement tests.
//!
//! Two coordinators share one mock chain: identical inputs must end in
//! Agree and an on-chain settlement whose signatures carry the shared
//! nonce; a single divergent exit price must end in arbitration.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use windward_chain::{BotRecord, ChainAdapter, ChainError};
use windward_core::error::WindwardError;
use windward_core::types::{
    Address, Amount, Bet, BetId, BetStatus, BilateralCommitment, CustomPayout, Digest, Nonce,
    SettlementAgreement, SettlementProposal, SettlementReply, Signature, Trade, VaultBalance,
};
use windward_crypto::typed_data::{hash_custom_payout, hash_settlement_agreement};
use windward_crypto::{recover_address, KeyPair, TypedDomain};
use windward_discovery::{DiscoveryConfig, PeerDirectory};
use windward_resilience::{MetricsCollector, ResilienceLog};
use windward_settlement::{
    ExitPrice, PriceSource, SettleResult, SettlementConfig, SettlementCoordinator,
    SettlementTransport, TradeStore,
};

// ── Shared mock chain ─────────────────────────────────────────────────────────

#[derive(Default)]
struct ChainState {
    bets: HashMap<BetId, Bet>,
    nonces: HashMap<Address, Nonce>,
    bots: Vec<BotRecord>,
    settled: Vec<SettlementAgreement>,
    payouts: Vec<CustomPayout>,
    arbitrations: Vec<BetId>,
}

/// One party's view of the shared chain: common state, own signing key.
struct MockChain {
    state: Arc<Mutex<ChainState>>,
    keypair: Arc<KeyPair>,
    domain: TypedDomain,
}

impl MockChain {
    fn new(state: Arc<Mutex<ChainState>>, keypair: Arc<KeyPair>) -> Self {
        let domain = TypedDomain::contract("Windward", "1", 1, Address([0xCC; 20]));
        Self { state, keypair, domain }
    }
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
    async fn get_vault_balance(&self, _: Address) -> Result<VaultBalance, ChainError> {
        Ok(VaultBalance { available: 0, locked: 0, total: 0 })
    }
    async fn get_vault_nonce(&self, address: Address) -> Result<Nonce, ChainError> {
        Ok(*self.state.lock().unwrap().nonces.get(&address).unwrap_or(&0))
    }
    fn sign_bilateral_commitment(
        &self,
        c: &BilateralCommitment,
    ) -> Result<Signature, ChainError> {
        let digest = windward_crypto::typed_data::hash_commitment(&self.domain, c);
        Ok(self.keypair.sign_digest(&digest))
    }
    async fn commit_bilateral_bet(
        &self,
        _: &BilateralCommitment,
        _: &Signature,
        _: &Signature,
    ) -> Result<BetId, ChainError> {
        unimplemented!("not exercised by settlement tests")
    }
    fn sign_settlement_agreement(
        &self,
        a: &SettlementAgreement,
    ) -> Result<Signature, ChainError> {
        let digest = hash_settlement_agreement(&self.domain, a);
        Ok(self.keypair.sign_digest(&digest))
    }
    async fn settle_by_agreement(
        &self,
        agreement: &SettlementAgreement,
        creator_sig: &Signature,
        filler_sig: &Signature,
    ) -> Result<(), ChainError> {
        let mut state = self.state.lock().unwrap();
        let bet = state
            .bets
            .get(&agreement.bet_id)
            .cloned()
            .ok_or_else(|| ChainError::Reverted("unknown bet".into()))?;

        // Contract-side verification: both signatures recover to the two
        // parties over the same digest, which embeds the single nonce.
        let digest = hash_settlement_agreement(&self.domain, agreement);
        let creator = recover_address(&digest, creator_sig)
            .map_err(|_| ChainError::Rejected("creator signature".into()))?;
        let filler = recover_address(&digest, filler_sig)
            .map_err(|_| ChainError::Rejected("filler signature".into()))?;
        if creator != bet.creator || filler != bet.filler {
            return Err(ChainError::Rejected("signature recovery mismatch".into()));
        }

        state.bets.get_mut(&agreement.bet_id).unwrap().status = BetStatus::Settled;
        state.settled.push(agreement.clone());
        Ok(())
    }
    fn sign_custom_payout(&self, p: &CustomPayout) -> Result<Signature, ChainError> {
        let digest = hash_custom_payout(&self.domain, p);
        Ok(self.keypair.sign_digest(&digest))
    }
    async fn custom_payout(
        &self,
        payout: &CustomPayout,
        creator_sig: &Signature,
        filler_sig: &Signature,
    ) -> Result<(), ChainError> {
        let mut state = self.state.lock().unwrap();
        let bet = state
            .bets
            .get(&payout.bet_id)
            .cloned()
            .ok_or_else(|| ChainError::Reverted("unknown bet".into()))?;
        let digest = hash_custom_payout(&self.domain, payout);
        let creator = recover_address(&digest, creator_sig)
            .map_err(|_| ChainError::Rejected("creator signature".into()))?;
        let filler = recover_address(&digest, filler_sig)
            .map_err(|_| ChainError::Rejected("filler signature".into()))?;
        if creator != bet.creator || filler != bet.filler {
            return Err(ChainError::Rejected("signature recovery mismatch".into()));
        }
        state.bets.get_mut(&payout.bet_id).unwrap().status = BetStatus::CustomPayout;
        state.payouts.push(payout.clone());
        Ok(())
    }
    async fn request_arbitration(&self, bet_id: BetId) -> Result<(), ChainError> {
        let mut state = self.state.lock().unwrap();
        state.bets.get_mut(&bet_id).unwrap().status = BetStatus::InArbitration;
        state.arbitrations.push(bet_id);
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

// ── Transports ────────────────────────────────────────────────────────────────

/// Delivers proposals straight into the partner coordinator.
struct DirectTransport {
    partner: Mutex<Option<Arc<SettlementCoordinator>>>,
}

impl DirectTransport {
    fn unset() -> Arc<Self> {
        Arc::new(Self { partner: Mutex::new(None) })
    }

    fn connect(&self, partner: Arc<SettlementCoordinator>) {
        *self.partner.lock().unwrap() = Some(partner);
    }
}

#[async_trait]
impl SettlementTransport for DirectTransport {
    async fn send_proposal(
        &self,
        _endpoint: &str,
        proposal: &SettlementProposal,
    ) -> Result<SettlementReply, WindwardError> {
        let partner = self
            .partner
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| WindwardError::Transport("no partner wired".into()))?;
        partner.handle_incoming(proposal.clone()).await
    }
}

/// Partner endpoint answering only with transport failures.
struct DeadTransport;

#[async_trait]
impl SettlementTransport for DeadTransport {
    async fn send_proposal(
        &self,
        _: &str,
        _: &SettlementProposal,
    ) -> Result<SettlementReply, WindwardError> {
        Err(WindwardError::HttpStatus { status: 500, url: "http://peer/p2p/propose-settlement".into() })
    }
}

// ── Prices ────────────────────────────────────────────────────────────────────

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

// ── Fixture ───────────────────────────────────────────────────────────────────

const WIND: Amount = 1_000_000_000_000_000_000;

struct Party {
    keypair: Arc<KeyPair>,
    coordinator: Arc<SettlementCoordinator>,
    transport: Arc<DirectTransport>,
    #[allow(dead_code)] // keeps the agent dir alive for the test's duration
    dir: tempfile::TempDir,
}

fn build_party(
    state: Arc<Mutex<ChainState>>,
    keypair: Arc<KeyPair>,
    prices: Vec<ExitPrice>,
    transport: Arc<dyn SettlementTransport>,
    direct: Option<Arc<DirectTransport>>,
) -> Party {
    let dir = tempfile::tempdir().unwrap();
    let chain: Arc<dyn ChainAdapter> = Arc::new(MockChain::new(state, Arc::clone(&keypair)));
    let discovery = Arc::new(PeerDirectory::new(
        Arc::clone(&chain),
        keypair.address,
        DiscoveryConfig::default(),
    ));
    let trades = Arc::new(TradeStore::open(dir.path()).unwrap());
    let log = Arc::new(ResilienceLog::new(dir.path().join("resilience.log")));
    let metrics = Arc::new(MetricsCollector::new());
    let config = SettlementConfig {
        p2p_domain: TypedDomain::p2p("Windward", "1", 1),
        proposal_expiry_secs: 300,
        arbitration_timeout: Duration::from_secs(5),
    };
    let coordinator = Arc::new(SettlementCoordinator::new(
        chain,
        transport,
        discovery,
        Arc::new(FixedPrices(prices)),
        trades,
        Arc::clone(&keypair),
        config,
        log,
        metrics,
    ));
    Party {
        keypair,
        coordinator,
        transport: direct.unwrap_or_else(DirectTransport::unset),
        dir,
    }
}

/// Build creator + filler over one shared chain, both holding the same
/// 100-trade portfolio, with the given per-side exit prices.
fn build_pair(
    creator_prices: Vec<ExitPrice>,
    filler_prices: Vec<ExitPrice>,
) -> (Party, Party, Arc<Mutex<ChainState>>, BetId) {
    let portfolio_len = creator_prices.len();
    let creator_kp = Arc::new(KeyPair::generate());
    let filler_kp = Arc::new(KeyPair::generate());
    let bet_id = BetId(1);

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;

    let state = Arc::new(Mutex::new(ChainState::default()));
    {
        let mut s = state.lock().unwrap();
        s.bets.insert(
            bet_id,
            Bet {
                bet_id,
                trades_root: Digest([0x11; 32]),
                creator: creator_kp.address,
                filler: filler_kp.address,
                creator_amount: WIND,
                filler_amount: WIND,
                deadline: now - 30,
                created_at: now - 3_600,
                status: BetStatus::Active,
            },
        );
        s.nonces.insert(creator_kp.address, 4);
        s.nonces.insert(filler_kp.address, 9);
        s.bots = vec![
            BotRecord {
                address: creator_kp.address,
                endpoint: "http://creator".into(),
                pubkey_hash: creator_kp.pubkey_hash(),
                active: true,
            },
            BotRecord {
                address: filler_kp.address,
                endpoint: "http://filler".into(),
                pubkey_hash: filler_kp.pubkey_hash(),
                active: true,
            },
        ];
    }

    let creator_transport = DirectTransport::unset();
    let creator = build_party(
        Arc::clone(&state),
        creator_kp,
        creator_prices,
        Arc::clone(&creator_transport) as Arc<dyn SettlementTransport>,
        Some(creator_transport),
    );
    let filler = build_party(
        Arc::clone(&state),
        filler_kp,
        filler_prices,
        Arc::new(DeadTransport) as Arc<dyn SettlementTransport>,
        None,
    );
    creator.transport.connect(Arc::clone(&filler.coordinator));

    // Both sides hold the identical portfolio.
    let trades = portfolio(portfolio_len);
    creator.coordinator.trade_store().save(bet_id, "snap-1", &trades).unwrap();
    filler.coordinator.trade_store().save(bet_id, "snap-1", &trades).unwrap();

    (creator, filler, state, bet_id)
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

/// Exit prices where the creator wins `wins` of `n` up-trades entered at 1000.
fn prices_with_creator_wins(n: usize, wins: usize) -> Vec<ExitPrice> {
    (0..n)
        .map(|i| ExitPrice::Price(if i < wins { 2_000 } else { 500 }))
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn identical_inputs_settle_by_agreement() {
    let prices = prices_with_creator_wins(100, 60);
    let (creator, _filler, state, bet_id) = build_pair(prices.clone(), prices);

    let result = creator.coordinator.settle_bet(bet_id).await.unwrap();
    assert_eq!(result, SettleResult::Settled { winner: creator.keypair.address });

    let s = state.lock().unwrap();
    assert_eq!(s.bets[&bet_id].status, BetStatus::Settled);
    assert_eq!(s.settled.len(), 1);
    assert!(s.arbitrations.is_empty());

    // Nonce parity: the executed agreement carries max(4, 9).
    assert_eq!(s.settled[0].nonce, 9);
    assert_eq!(s.settled[0].winner, creator.keypair.address);

    // Keep the temp dirs alive through the assertions.
    drop(creator);
}

#[tokio::test]
async fn filler_majority_settles_for_filler() {
    let prices = prices_with_creator_wins(100, 30);
    let (creator, filler, state, bet_id) = build_pair(prices.clone(), prices);

    let result = creator.coordinator.settle_bet(bet_id).await.unwrap();
    assert_eq!(result, SettleResult::Settled { winner: filler.keypair.address });
    assert_eq!(state.lock().unwrap().bets[&bet_id].status, BetStatus::Settled);
}

#[tokio::test]
async fn one_divergent_price_ends_in_arbitration() {
    let creator_prices = prices_with_creator_wins(100, 51);
    let mut filler_prices = creator_prices.clone();
    // Index 7 differs: a creator win becomes a loss on the filler's side,
    // flipping 51/100 into 50/100 (a tie) over there.
    filler_prices[7] = ExitPrice::Price(500);
    let (creator, _filler, state, bet_id) = build_pair(creator_prices, filler_prices);

    let result = creator.coordinator.settle_bet(bet_id).await.unwrap();
    assert!(matches!(result, SettleResult::Escalated { .. }));

    let s = state.lock().unwrap();
    assert_eq!(s.bets[&bet_id].status, BetStatus::InArbitration);
    assert_eq!(s.arbitrations, vec![bet_id]);
    assert!(s.settled.is_empty(), "neither side may sign on divergence");
    assert!(s.payouts.is_empty());
}

#[tokio::test]
async fn unreachable_partner_ends_in_arbitration() {
    let prices = prices_with_creator_wins(10, 6);
    let (creator, _filler, state, bet_id) = build_pair(prices.clone(), prices);
    // Unwire the partner: every send now fails like a dead endpoint.
    *creator.transport.partner.lock().unwrap() = None;

    let result = creator.coordinator.settle_bet(bet_id).await.unwrap();
    assert!(matches!(result, SettleResult::Escalated { .. }));
    assert_eq!(state.lock().unwrap().bets[&bet_id].status, BetStatus::InArbitration);
}

#[tokio::test]
async fn tie_resolves_through_custom_payout() {
    let prices = prices_with_creator_wins(100, 50);
    let (creator, _filler, state, bet_id) = build_pair(prices.clone(), prices);

    let result = creator.coordinator.settle_bet(bet_id).await.unwrap();
    assert_eq!(result, SettleResult::TiePayout);

    let s = state.lock().unwrap();
    assert_eq!(s.bets[&bet_id].status, BetStatus::CustomPayout);
    assert_eq!(s.payouts.len(), 1);
    assert_eq!(s.payouts[0].creator_payout, WIND);
    assert_eq!(s.payouts[0].filler_payout, WIND);
    assert_eq!(s.payouts[0].nonce, 9);
}

#[tokio::test]
async fn settled_bet_is_rejected() {
    let prices = prices_with_creator_wins(10, 6);
    let (creator, _filler, state, bet_id) = build_pair(prices.clone(), prices);
    state.lock().unwrap().bets.get_mut(&bet_id).unwrap().status = BetStatus::Settled;

    let err = creator.coordinator.settle_bet(bet_id).await.unwrap_err();
    assert!(matches!(err, WindwardError::BetNotActive(1)));
}

#[tokio::test]
async fn future_deadline_is_rejected() {
    let prices = prices_with_creator_wins(10, 6);
    let (creator, _filler, state, bet_id) = build_pair(prices.clone(), prices);
    let far_future = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
        + 3_600;
    state.lock().unwrap().bets.get_mut(&bet_id).unwrap().deadline = far_future;

    let err = creator.coordinator.settle_bet(bet_id).await.unwrap_err();
    assert!(matches!(err, WindwardError::DeadlineNotPassed { .. }));
}

#[tokio::test]
async fn missing_trades_is_a_data_integrity_failure() {
    let prices = prices_with_creator_wins(10, 6);
    let (creator, _filler, _state, bet_id) = build_pair(prices.clone(), prices);
    creator.coordinator.trade_store().remove(bet_id).unwrap();

    let err = creator.coordinator.settle_bet(bet_id).await.unwrap_err();
    assert!(err.is_data_integrity());
    assert!(matches!(err, WindwardError::MissingTrades(1)));
}

#[tokio::test]
async fn incoming_proposal_with_forged_signer_is_rejected() {
    let prices = prices_with_creator_wins(10, 6);
    let (creator, filler, _state, bet_id) = build_pair(prices.clone(), prices);

    // A third party signs a proposal claiming to be the creator.
    let mallory = KeyPair::generate();
    let mut proposal = SettlementProposal {
        bet_id,
        claimed_winner: Some(creator.keypair.address),
        wins_count: 6,
        valid_trades: 10,
        is_tie: false,
        proposer: creator.keypair.address,
        settlement_nonce: 9,
        proposal_expiry: i64::MAX,
        exit_prices_hash: None,
        signature: Signature([0u8; 65]),
    };
    let domain = TypedDomain::p2p("Windward", "1", 1);
    let digest = windward_crypto::typed_data::hash_settlement_proposal(&domain, &proposal);
    proposal.signature = mallory.sign_digest(&digest);

    let err = filler.coordinator.handle_incoming(proposal).await.unwrap_err();
    assert!(matches!(err, WindwardError::SignatureRejected));
    drop(creator.dir);
}
