//! Settlement coordinator.
//!
//! Drives the post-commit lifecycle for one bet once its deadline has
//! passed: load the bet and its stored portfolio, fetch exit prices,
//! compute the outcome, exchange a signed proposal with the counterparty,
//! and either execute the agreement on-chain or escalate to arbitration.
//! Per bet the coordinator is single-flight: one outstanding exchange, one
//! on-chain settlement attempt.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use windward_chain::ChainAdapter;
use windward_core::constants::{
    SETTLEMENT_ARBITRATION_TIMEOUT_MS, SETTLEMENT_PROPOSAL_EXPIRY_SECS,
};
use windward_core::error::WindwardError;
use windward_core::types::{
    Address, BetId, CustomPayout, Outcome, ReplyStatus, SettlementAgreement, SettlementProposal,
    SettlementReply, Signature,
};
use windward_crypto::typed_data::hash_settlement_proposal;
use windward_crypto::{recover_address, KeyPair, TypedDomain};
use windward_discovery::PeerDirectory;
use windward_resilience::event_log::{ResilienceLog, EVENT_ARBITRATION, EVENT_SETTLEMENT};
use windward_resilience::MetricsCollector;

use crate::outcome::compute_outcome;
use crate::prices::{self, PriceSource};
use crate::store::TradeStore;

/// Sends a signed settlement proposal to a peer endpoint and returns its
/// verdict. Implementations own the retry envelope; the coordinator treats
/// any returned failure as final.
#[async_trait]
pub trait SettlementTransport: Send + Sync {
    async fn send_proposal(
        &self,
        endpoint: &str,
        proposal: &SettlementProposal,
    ) -> Result<SettlementReply, WindwardError>;
}

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// P2P-only signing domain for proposals.
    pub p2p_domain: TypedDomain,
    pub proposal_expiry_secs: i64,
    /// Budget for the arbitration request once escalation is decided.
    pub arbitration_timeout: Duration,
}

impl SettlementConfig {
    pub fn new(p2p_domain: TypedDomain) -> Self {
        Self {
            p2p_domain,
            proposal_expiry_secs: SETTLEMENT_PROPOSAL_EXPIRY_SECS,
            arbitration_timeout: Duration::from_millis(SETTLEMENT_ARBITRATION_TIMEOUT_MS),
        }
    }
}

/// Terminal result of a settlement attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleResult {
    /// Agreement executed on-chain; the named party takes the pot.
    Settled { winner: Address },
    /// Tie resolved through an agreed 50/50 custom payout.
    TiePayout,
    /// The pair could not agree; arbitration was requested on-chain.
    Escalated { reason: String },
}

/// Local readiness view served by GET /p2p/settlement/{bet-id}.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReadiness {
    pub bet_id: BetId,
    pub has_trades: bool,
    pub trade_count: usize,
    pub snapshot_id: Option<String>,
}

pub struct SettlementCoordinator {
    chain: Arc<dyn ChainAdapter>,
    transport: Arc<dyn SettlementTransport>,
    discovery: Arc<PeerDirectory>,
    price_source: Arc<dyn PriceSource>,
    trades: Arc<TradeStore>,
    keypair: Arc<KeyPair>,
    config: SettlementConfig,
    log: Arc<ResilienceLog>,
    metrics: Arc<MetricsCollector>,
    in_flight: Mutex<HashSet<BetId>>,
}

impl SettlementCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainAdapter>,
        transport: Arc<dyn SettlementTransport>,
        discovery: Arc<PeerDirectory>,
        price_source: Arc<dyn PriceSource>,
        trades: Arc<TradeStore>,
        keypair: Arc<KeyPair>,
        config: SettlementConfig,
        log: Arc<ResilienceLog>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            chain,
            transport,
            discovery,
            price_source,
            trades,
            keypair,
            config,
            log,
            metrics,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn self_address(&self) -> Address {
        self.keypair.address
    }

    pub fn trade_store(&self) -> &Arc<TradeStore> {
        &self.trades
    }

    pub fn readiness(&self, bet_id: BetId) -> SettlementReadiness {
        match self.trades.load(bet_id) {
            Some(stored) => SettlementReadiness {
                bet_id,
                has_trades: true,
                trade_count: stored.trades.len(),
                snapshot_id: Some(stored.snapshot_id),
            },
            None => SettlementReadiness {
                bet_id,
                has_trades: false,
                trade_count: 0,
                snapshot_id: None,
            },
        }
    }

    /// Settle one bet whose deadline has passed. Entry point for the
    /// deadline watcher.
    pub async fn settle_bet(&self, bet_id: BetId) -> Result<SettleResult, WindwardError> {
        let _flight = self.begin_flight(bet_id)?;
        let now = unix_now();

        // 1. The bet must exist, be Active, and be past its deadline.
        let bet = self.chain.get_bet(bet_id).await?;
        if bet.status != windward_core::types::BetStatus::Active {
            return Err(WindwardError::BetNotActive(bet_id.0));
        }
        if now <= bet.deadline {
            return Err(WindwardError::DeadlineNotPassed {
                bet_id: bet_id.0,
                deadline: bet.deadline,
                now,
            });
        }

        // 2. The local portfolio must exist; its absence is a data-integrity
        //    failure, never something to recover automatically.
        let stored = match self.trades.load(bet_id) {
            Some(s) => s,
            None => {
                error!(%bet_id, "trade list missing at settlement time");
                self.log.log(EVENT_SETTLEMENT, &format!("bet {bet_id}: trade list missing"));
                return Err(WindwardError::MissingTrades(bet_id.0));
            }
        };

        // 3–4. Exit prices for every index, then the deterministic hash.
        let tickers: Vec<String> = stored.trades.iter().map(|t| t.ticker.clone()).collect();
        let exit_prices = self
            .price_source
            .exit_prices(bet_id, &stored.snapshot_id, &tickers)
            .await?;
        prices::validate(&exit_prices, stored.trades.len(), bet_id)?;
        let exit_prices_hash = prices::hash(&exit_prices);

        // 5. Our outcome.
        let outcome = compute_outcome(&stored.trades, &exit_prices, bet.creator, bet.filler);
        info!(
            %bet_id,
            wins = outcome.wins_count,
            valid = outcome.valid_trades,
            is_tie = outcome.is_tie,
            "outcome computed"
        );

        // 6. Counterparty endpoint from discovery.
        let me = self.keypair.address;
        let partner = bet
            .counterparty_of(&me)
            .ok_or_else(|| WindwardError::UnknownSender(me.to_hex()))?;
        let peer = match self.discovery.peer(&partner).await {
            Some(p) => p,
            None => {
                return self
                    .escalate(bet_id, &format!("counterparty {partner} not in registry"))
                    .await;
            }
        };

        // 7. Settlement nonce: the maximum of both parties' vault nonces.
        let my_nonce = self.chain.get_vault_nonce(me).await?;
        let partner_nonce = self.chain.get_vault_nonce(partner).await?;
        let settlement_nonce = my_nonce.max(partner_nonce);

        // 8. Signed proposal under the P2P domain.
        let mut proposal = SettlementProposal {
            bet_id,
            claimed_winner: outcome.winner,
            wins_count: outcome.wins_count,
            valid_trades: outcome.valid_trades,
            is_tie: outcome.is_tie,
            proposer: me,
            settlement_nonce,
            proposal_expiry: now + self.config.proposal_expiry_secs,
            exit_prices_hash: Some(exit_prices_hash),
            signature: Signature([0u8; 65]),
        };
        let digest = hash_settlement_proposal(&self.config.p2p_domain, &proposal);
        proposal.signature = self.keypair.sign_digest(&digest);

        // 9. Exchange and interpret.
        let reply = match self.transport.send_proposal(&peer.endpoint, &proposal).await {
            Ok(r) => r,
            Err(e) => {
                self.metrics.record_p2p_request(false);
                return self
                    .escalate(bet_id, &format!("proposal exchange failed: {e}"))
                    .await;
            }
        };
        self.metrics.record_p2p_request(true);

        match reply.status {
            ReplyStatus::Agree => {
                let Some(partner_sig) = reply.signature else {
                    return self.escalate(bet_id, "agree reply without signature").await;
                };
                self.execute_agreement(&bet, &outcome, settlement_nonce, partner_sig)
                    .await
            }
            ReplyStatus::Counter => {
                // Policy: no automated fairness evaluation of counter
                // offers; log the offer and hand the dispute to arbitration.
                if let Some(split) = &reply.counter_proposal {
                    self.log.log_with(
                        EVENT_SETTLEMENT,
                        &format!("bet {bet_id}: counter offer received"),
                        &serde_json::json!({
                            "creator_payout": split.creator_payout.to_string(),
                            "filler_payout": split.filler_payout.to_string(),
                        }),
                    );
                }
                self.escalate(bet_id, "partner countered with a custom split").await
            }
            ReplyStatus::Disagree => {
                if let Some(theirs) = &reply.our_outcome {
                    warn!(
                        %bet_id,
                        ours = ?outcome,
                        theirs = ?theirs,
                        "partner disagrees on outcome"
                    );
                }
                self.escalate(bet_id, "partner disagrees on outcome").await
            }
        }
    }

    /// Validate an incoming proposal and reply Agree (signing with the
    /// proposer's settlement nonce) or Disagree with our own outcome.
    pub async fn handle_incoming(
        &self,
        proposal: SettlementProposal,
    ) -> Result<SettlementReply, WindwardError> {
        let now = unix_now();

        // Signature must recover to the claimed proposer.
        let digest = hash_settlement_proposal(&self.config.p2p_domain, &proposal);
        let recovered = recover_address(&digest, &proposal.signature)?;
        if recovered != proposal.proposer {
            return Err(WindwardError::SignatureRejected);
        }
        if now > proposal.proposal_expiry {
            return Err(WindwardError::Expired { expiry: proposal.proposal_expiry, now });
        }

        // Membership: the proposer must be the counterparty of a bet we are
        // in, and the bet must still be Active.
        let bet = self.chain.get_bet(proposal.bet_id).await?;
        let me = self.keypair.address;
        if bet.counterparty_of(&me) != Some(proposal.proposer) {
            return Err(WindwardError::UnknownSender(proposal.proposer.to_hex()));
        }
        if bet.status != windward_core::types::BetStatus::Active {
            return Err(WindwardError::BetNotActive(proposal.bet_id.0));
        }

        // The shared settlement nonce must cover our own chain nonce, or
        // the signature we produce with it could never execute.
        let own_nonce = self.chain.get_vault_nonce(me).await?;
        if proposal.settlement_nonce < own_nonce {
            return Err(WindwardError::NonceMismatch {
                expected: own_nonce,
                got: proposal.settlement_nonce,
            });
        }

        // Recompute our own outcome from local data.
        let stored = self
            .trades
            .load(proposal.bet_id)
            .ok_or(WindwardError::MissingTrades(proposal.bet_id.0))?;
        let tickers: Vec<String> = stored.trades.iter().map(|t| t.ticker.clone()).collect();
        let exit_prices = self
            .price_source
            .exit_prices(proposal.bet_id, &stored.snapshot_id, &tickers)
            .await?;
        prices::validate(&exit_prices, stored.trades.len(), proposal.bet_id)?;
        let ours = compute_outcome(&stored.trades, &exit_prices, bet.creator, bet.filler);

        if let Some(their_hash) = proposal.exit_prices_hash {
            if their_hash != prices::hash(&exit_prices) {
                debug!(bet_id = %proposal.bet_id, "exit-price hashes differ");
            }
        }

        if ours == proposal.claimed_outcome() {
            // Sign with the proposer's nonce so both on-chain signatures
            // share it.
            let signature = if ours.is_tie {
                self.chain.sign_custom_payout(&CustomPayout {
                    bet_id: proposal.bet_id,
                    creator_payout: bet.creator_amount,
                    filler_payout: bet.filler_amount,
                    nonce: proposal.settlement_nonce,
                })?
            } else {
                let winner = ours.winner.expect("non-tie outcome has a winner");
                self.chain.sign_settlement_agreement(&SettlementAgreement {
                    bet_id: proposal.bet_id,
                    winner,
                    nonce: proposal.settlement_nonce,
                })?
            };
            info!(bet_id = %proposal.bet_id, "outcomes match, agreeing");
            Ok(SettlementReply {
                status: ReplyStatus::Agree,
                signature: Some(signature),
                our_outcome: Some(ours),
                counter_proposal: None,
            })
        } else {
            warn!(
                bet_id = %proposal.bet_id,
                ours = ?ours,
                theirs = ?proposal.claimed_outcome(),
                "outcome mismatch, disagreeing"
            );
            Ok(SettlementReply {
                status: ReplyStatus::Disagree,
                signature: None,
                our_outcome: Some(ours),
                counter_proposal: None,
            })
        }
    }

    // ── Internals ────────────────────────────────────────────────────────────

    async fn execute_agreement(
        &self,
        bet: &windward_core::types::Bet,
        outcome: &Outcome,
        nonce: u64,
        partner_sig: Signature,
    ) -> Result<SettleResult, WindwardError> {
        let me = self.keypair.address;
        let i_am_creator = bet.creator == me;

        let result = if outcome.is_tie {
            // Ties resolve as an agreed stake-return split.
            let payout = CustomPayout {
                bet_id: bet.bet_id,
                creator_payout: bet.creator_amount,
                filler_payout: bet.filler_amount,
                nonce,
            };
            let my_sig = self.chain.sign_custom_payout(&payout)?;
            let (creator_sig, filler_sig) = if i_am_creator {
                (my_sig, partner_sig)
            } else {
                (partner_sig, my_sig)
            };
            self.chain.custom_payout(&payout, &creator_sig, &filler_sig).await?;
            SettleResult::TiePayout
        } else {
            let winner = outcome.winner.expect("non-tie outcome has a winner");
            let agreement = SettlementAgreement { bet_id: bet.bet_id, winner, nonce };
            let my_sig = self.chain.sign_settlement_agreement(&agreement)?;
            let (creator_sig, filler_sig) = if i_am_creator {
                (my_sig, partner_sig)
            } else {
                (partner_sig, my_sig)
            };
            self.chain
                .settle_by_agreement(&agreement, &creator_sig, &filler_sig)
                .await?;
            SettleResult::Settled { winner }
        };

        self.metrics.record_settlement_agreed();
        self.log.log(
            EVENT_SETTLEMENT,
            &format!("bet {}: settled by agreement (nonce {nonce})", bet.bet_id),
        );
        Ok(result)
    }

    async fn escalate(
        &self,
        bet_id: BetId,
        reason: &str,
    ) -> Result<SettleResult, WindwardError> {
        warn!(%bet_id, %reason, "escalating to arbitration");
        self.log.log(EVENT_ARBITRATION, &format!("bet {bet_id}: {reason}"));
        self.metrics.record_settlement_arbitrated();

        match tokio::time::timeout(
            self.config.arbitration_timeout,
            self.chain.request_arbitration(bet_id),
        )
        .await
        {
            Ok(Ok(())) => Ok(SettleResult::Escalated { reason: reason.to_string() }),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(WindwardError::Timeout {
                ms: self.config.arbitration_timeout.as_millis() as u64,
            }),
        }
    }

    fn begin_flight(&self, bet_id: BetId) -> Result<FlightGuard<'_>, WindwardError> {
        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
        if !in_flight.insert(bet_id) {
            return Err(WindwardError::RateLimited(format!(
                "settlement already in flight for bet {bet_id}"
            )));
        }
        Ok(FlightGuard { set: &self.in_flight, bet_id })
    }
}

struct FlightGuard<'a> {
    set: &'a Mutex<HashSet<BetId>>,
    bet_id: BetId,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.bet_id);
        }
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
