//! windward-node — the Windward bot binary.
//!
//! Startup sequence:
//!   1. Resolve configuration (CLI + environment knobs) and init tracing
//!   2. Open the agent directory: state store, task queue, event log
//!   3. Drain the crash-recovery pass (TASK_RESUME for running tasks)
//!   4. Connect the breaker-guarded chain adapter; register on-chain
//!   5. Start the P2P server, discovery refresher and settlement watcher
//!   6. Start the watchdog ticker (and the backup agent when enabled)
//!   7. Run until ctrl-c, then drain background workers and deregister

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use windward_chain::{ChainAdapter, RpcChainAdapter, RpcChainConfig};
use windward_core::constants::WATCHDOG_INTERVAL_SECS;
use windward_crypto::{KeyPair, TypedDomain};
use windward_discovery::{DiscoveryConfig, PeerDirectory};
use windward_p2p::{P2pClient, P2pServerConfig, ReplayCache, ServerContext};
use windward_resilience::event_log::{ResilienceLog, EVENT_TASK_RESUME};
use windward_resilience::{
    BackupAgent, BackupConfig, BreakerConfig, CircuitBreaker, HealthSource, MetricsCollector,
    ProcProbe, StateStore, TaskQueue, Watchdog, WatchdogThresholds,
};
use windward_settlement::{
    ExitPriceFetcher, PriceSource, SettlementConfig, SettlementCoordinator, SettlementTransport,
    TradeStore,
};

mod config;
mod guard;
mod orchestrator;

use config::{Args, NodeConfig};
use guard::GuardedChain;
use orchestrator::{drain_promotions, NodeHealthSource, NodeRecoveryHandler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,windward=debug".parse().unwrap()),
        )
        .init();

    let config = NodeConfig::resolve(Args::parse())?;
    info!("Windward node starting");

    // ── Agent directory and process-scoped facades ────────────────────────────
    std::fs::create_dir_all(&config.agent_dir)
        .with_context(|| format!("creating agent dir {}", config.agent_dir.display()))?;

    let keypair = Arc::new(load_or_generate_keypair(&config)?);
    info!(address = %keypair.address, "agent identity");

    let log = Arc::new(ResilienceLog::new(config.agent_dir.join("resilience.log")));
    let metrics = Arc::new(MetricsCollector::new());
    let state = Arc::new(StateStore::new(
        config.agent_dir.join("agent-state.json"),
        keypair.address.to_hex(),
        config.capital,
    ));
    let tasks = Arc::new(TaskQueue::open(config.agent_dir.join("task-queue.json")));

    // ── Crash-recovery pass ───────────────────────────────────────────────────
    for recovered in tasks.recover_tasks() {
        let resume = recovered.resume_from.as_deref().unwrap_or("START");
        info!(
            task_id = %recovered.task.task_id,
            task_type = %recovered.task.task_type,
            resume_from = resume,
            "resuming interrupted task"
        );
        log.log_with(
            EVENT_TASK_RESUME,
            &format!("{} resuming from {resume}", recovered.task.task_id),
            &serde_json::json!({"type": recovered.task.task_type}),
        );
    }

    // ── Chain adapter behind the chain breaker ────────────────────────────────
    let rpc = RpcChainAdapter::new(
        RpcChainConfig {
            url: config.chain_url.clone(),
            chain_id: config.chain_id,
            settlement_contract: config.settlement_contract,
            retry: config.p2p_retry,
            ..Default::default()
        },
        KeyPair::from_secret_bytes(keypair.secret_key_bytes())
            .expect("keypair bytes already validated"),
    );
    let chain_breaker = Arc::new(CircuitBreaker::new("chain", BreakerConfig::default()));
    let chain: Arc<dyn ChainAdapter> = Arc::new(GuardedChain::new(
        Arc::new(rpc),
        Arc::clone(&chain_breaker),
    ));

    bootstrap_on_chain(&config, chain.as_ref(), &keypair).await;

    // ── Settlement plumbing ───────────────────────────────────────────────────
    let p2p_domain = TypedDomain::p2p("Windward", "1", config.chain_id);
    let contract_domain = TypedDomain::contract(
        "Windward",
        "1",
        config.chain_id,
        config.settlement_contract,
    );

    let trades = Arc::new(TradeStore::open(&config.agent_dir).context("opening trade store")?);
    let prices: Arc<dyn PriceSource> =
        Arc::new(ExitPriceFetcher::new(&config.backend_url, config.settlement_retry));
    let discovery = Arc::new(PeerDirectory::new(
        Arc::clone(&chain),
        keypair.address,
        DiscoveryConfig {
            cache_ttl: config.discovery_ttl,
            probe_timeout: config.health_probe_timeout,
            ..Default::default()
        },
    ));
    let p2p_client: Arc<dyn SettlementTransport> =
        Arc::new(P2pClient::new(config.settlement_retry));

    let mut settlement_config = SettlementConfig::new(p2p_domain.clone());
    settlement_config.proposal_expiry_secs = config.proposal_expiry_secs;
    settlement_config.arbitration_timeout = config.arbitration_timeout;
    let coordinator = Arc::new(SettlementCoordinator::new(
        Arc::clone(&chain),
        Arc::clone(&p2p_client),
        Arc::clone(&discovery),
        Arc::clone(&prices),
        Arc::clone(&trades),
        Arc::clone(&keypair),
        settlement_config,
        Arc::clone(&log),
        Arc::clone(&metrics),
    ));

    // ── P2P server ────────────────────────────────────────────────────────────
    let replay_retention =
        Duration::from_secs((2 * config.proposal_expiry_secs).max(600) as u64);
    let ctx = Arc::new(ServerContext {
        config: P2pServerConfig {
            public_endpoint: config.public_endpoint.clone(),
            ..Default::default()
        },
        keypair: Arc::clone(&keypair),
        chain: Arc::clone(&chain),
        coordinator: Arc::clone(&coordinator),
        trades: Arc::clone(&trades),
        p2p_domain,
        contract_domain,
        replay: ReplayCache::new(replay_retention),
        metrics: Arc::clone(&metrics),
        started_at: std::time::Instant::now(),
    });
    let (listen_addr, _server) = windward_p2p::start(ctx, config.listen_addr)
        .await
        .context("starting P2P server")?;
    info!(%listen_addr, endpoint = %config.public_endpoint, "P2P surface up");

    // ── Background workers ────────────────────────────────────────────────────
    let (stop_tx, stop_rx) = watch::channel(false);

    let health_source: Arc<dyn HealthSource> = Arc::new(NodeHealthSource::new(
        Arc::clone(&state),
        Arc::clone(&metrics),
        chrono::Utc::now().timestamp(),
    ));
    let watchdog = Arc::new(Watchdog::new(
        WatchdogThresholds::default(),
        Arc::clone(&health_source),
        Arc::new(NodeRecoveryHandler::new(Arc::clone(&log))),
        Arc::clone(&state),
        Arc::clone(&metrics),
        Arc::clone(&log),
    ));

    spawn_heartbeat(Arc::clone(&state), stop_rx.clone());
    spawn_resilience_ticker(
        Arc::clone(&watchdog),
        Arc::clone(&chain_breaker),
        Arc::clone(&state),
        Arc::clone(&metrics),
        config.agent_dir.join("resilience-metrics.json"),
        stop_rx.clone(),
    );
    spawn_discovery_refresher(Arc::clone(&discovery), config.discovery_ttl, stop_rx.clone());
    spawn_settlement_watcher(
        Arc::clone(&coordinator),
        Arc::clone(&trades),
        Arc::clone(&chain),
        stop_rx.clone(),
    );

    // ── Backup agent (standby role) ───────────────────────────────────────────
    if config.backup_enabled {
        match config.primary_pid {
            Some(primary_pid) => {
                let (agent, events) = BackupAgent::new(
                    BackupConfig::new(&config.agent_dir),
                    Box::new(ProcProbe),
                    Arc::clone(&log),
                    Arc::clone(&metrics),
                );
                let agent = Arc::new(agent);
                agent.start_standby(primary_pid).context("entering standby")?;
                tokio::spawn(drain_promotions(events, Arc::clone(&agent), Arc::clone(&log)));
                tokio::spawn(Arc::clone(&agent).run(stop_rx.clone()));
            }
            None => warn!("BACKUP_AGENT_ENABLED set but no --primary-pid given"),
        }
    } else {
        // This process is the primary; publish our pid for the standby.
        windward_resilience::backup::write_pid_file(
            &config.agent_dir.join("primary.pid"),
            std::process::id(),
        )?;
    }

    info!("node ready");

    // ── Shutdown ──────────────────────────────────────────────────────────────
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    let _ = stop_tx.send(true);
    // Grace period for tickers to observe the flag.
    tokio::time::sleep(Duration::from_secs(2)).await;
    if let Err(e) = chain.deregister_bot().await {
        warn!(error = %e, "deregistration failed");
    }
    info!("node stopped");
    Ok(())
}

/// Load the hex secret key from disk, or generate an ephemeral identity.
fn load_or_generate_keypair(config: &NodeConfig) -> anyhow::Result<KeyPair> {
    if let Some(path) = &config.key_file {
        let hex_key = std::fs::read_to_string(path)
            .with_context(|| format!("reading key file {}", path.display()))?;
        return KeyPair::from_hex(hex_key.trim())
            .map_err(|e| anyhow::anyhow!("invalid key file: {e}"));
    }
    warn!("No --key-file provided. Generating an ephemeral identity — DO NOT USE IN PRODUCTION.");
    Ok(KeyPair::generate())
}

/// Register in the bot registry and top the vault up to the configured
/// capital. Failures here degrade the node but do not kill it; the
/// watchdog and metrics surface them.
async fn bootstrap_on_chain(config: &NodeConfig, chain: &dyn ChainAdapter, keypair: &KeyPair) {
    if let Err(e) = chain
        .register_bot(&config.public_endpoint, keypair.pubkey_hash())
        .await
    {
        warn!(error = %e, "bot registration failed");
    }

    match chain.get_vault_balance(keypair.address).await {
        Ok(vault) if vault.available < config.capital => {
            let shortfall = config.capital - vault.available;
            info!(shortfall = %shortfall, "topping up vault");
            if let Err(e) = chain.approve(config.settlement_contract, shortfall).await {
                warn!(error = %e, "collateral approval failed");
                return;
            }
            if let Err(e) = chain.deposit_to_vault(shortfall).await {
                warn!(error = %e, "vault deposit failed");
            }
        }
        Ok(_) => debug!("vault already funded"),
        Err(e) => warn!(error = %e, "vault balance check failed"),
    }
}

fn spawn_heartbeat(state: Arc<StateStore>, mut stop: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    if let Err(e) = state.update_heartbeat(now) {
                        warn!(error = %e, "heartbeat update failed");
                    }
                }
                _ = stop.changed() => if *stop.borrow() { break },
            }
        }
    });
}

/// One ticker drives the watchdog, refreshes the persisted breaker labels
/// and writes the aggregated metrics snapshot.
fn spawn_resilience_ticker(
    watchdog: Arc<Watchdog>,
    chain_breaker: Arc<CircuitBreaker>,
    state: Arc<StateStore>,
    metrics: Arc<MetricsCollector>,
    metrics_path: std::path::PathBuf,
    mut stop: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(WATCHDOG_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    let assessment = watchdog.tick(now).await;

                    let breaker = chain_breaker.snapshot();
                    let any_open = breaker.state == "OPEN";
                    let mut labels = BTreeMap::new();
                    labels.insert(breaker.name.clone(), breaker.state.clone());
                    if let Err(e) = state.update_breaker_states(labels, now) {
                        warn!(error = %e, "breaker state persist failed");
                    }

                    let recovering = state
                        .load()
                        .map(|s| s.recovery.in_progress)
                        .unwrap_or(false);
                    let snapshot = metrics.snapshot(assessment.status, any_open, recovering, now);
                    if let Err(e) = metrics.persist(&metrics_path, &snapshot) {
                        warn!(error = %e, "metrics persist failed");
                    }
                }
                _ = stop.changed() => if *stop.borrow() { break },
            }
        }
    });
}

fn spawn_discovery_refresher(
    discovery: Arc<PeerDirectory>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(5)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let healthy = discovery.healthy_peers().await;
                    debug!(healthy = healthy.len(), "peer health sweep");
                }
                _ = stop.changed() => if *stop.borrow() { break },
            }
        }
    });
}

/// Scan stored portfolios for bets whose deadline has passed and drive
/// them through settlement. The coordinator's single-flight guard makes
/// rescans harmless.
fn spawn_settlement_watcher(
    coordinator: Arc<SettlementCoordinator>,
    trades: Arc<TradeStore>,
    chain: Arc<dyn ChainAdapter>,
    mut stop: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    for bet_id in trades.bet_ids() {
                        let bet = match chain.get_bet(bet_id).await {
                            Ok(b) => b,
                            Err(e) => {
                                debug!(%bet_id, error = %e, "bet lookup failed");
                                continue;
                            }
                        };
                        if bet.status.is_terminal() {
                            // Nothing left to settle; drop the local copy.
                            if let Err(e) = trades.remove(bet_id) {
                                warn!(%bet_id, error = %e, "trade cleanup failed");
                            }
                            continue;
                        }
                        if bet.status == windward_core::types::BetStatus::Active
                            && now > bet.deadline
                        {
                            match coordinator.settle_bet(bet_id).await {
                                Ok(result) => info!(%bet_id, ?result, "settlement finished"),
                                Err(e) => warn!(%bet_id, error = %e, "settlement failed"),
                            }
                        }
                    }
                }
                _ = stop.changed() => if *stop.borrow() { break },
            }
        }
    });
}
