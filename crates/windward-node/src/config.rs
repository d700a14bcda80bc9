//! Node configuration: CLI arguments layered under the enumerated
//! environment knobs. Missing values fall back to the documented defaults
//! in `windward-core::constants`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::warn;

use windward_core::constants::{
    DISCOVERY_CACHE_TTL_MS, HEALTH_CHECK_TIMEOUT_MS, SETTLEMENT_ARBITRATION_TIMEOUT_MS,
    SETTLEMENT_MAX_RETRIES, SETTLEMENT_P2P_TIMEOUT_MS, SETTLEMENT_PROPOSAL_EXPIRY_SECS,
};
use windward_core::retry::RetryPolicy;
use windward_core::types::Address;

#[derive(Parser, Debug)]
#[command(
    name = "windward-node",
    version,
    about = "Windward bilateral-betting bot node"
)]
pub struct Args {
    /// Agent directory for state, task queue, logs and pid files.
    #[arg(long, default_value = "~/.windward/agent")]
    pub agent_dir: PathBuf,

    /// P2P listen address.
    #[arg(long, default_value = "0.0.0.0:9044")]
    pub listen_addr: SocketAddr,

    /// Public endpoint peers reach us at (registered on-chain).
    #[arg(long, default_value = "http://127.0.0.1:9044")]
    pub public_endpoint: String,

    /// Chain gateway URL.
    #[arg(long, default_value = "http://127.0.0.1:8545")]
    pub chain_url: String,

    /// Chain id for the signature domains.
    #[arg(long, default_value_t = 1)]
    pub chain_id: u64,

    /// Settlement contract address (verifying contract of the on-chain
    /// signature domain).
    #[arg(long, default_value = "0x0000000000000000000000000000000000000000")]
    pub settlement_contract: String,

    /// Hex secret key file. Generated ephemeral when absent.
    #[arg(long)]
    pub key_file: Option<PathBuf>,

    /// Initial capital in WIND base units (informational, persisted into
    /// extended state on first run).
    #[arg(long, default_value = "10000000000000000000")]
    pub capital: String,

    /// Pid of the primary process; presence switches this node into the
    /// standby backup role.
    #[arg(long)]
    pub primary_pid: Option<u32>,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub agent_dir: PathBuf,
    pub listen_addr: SocketAddr,
    pub public_endpoint: String,
    pub chain_url: String,
    pub chain_id: u64,
    pub settlement_contract: Address,
    pub key_file: Option<PathBuf>,
    pub capital: u128,
    pub primary_pid: Option<u32>,

    // Environment-tunable knobs.
    pub backup_enabled: bool,
    pub backend_url: String,
    pub discovery_ttl: Duration,
    pub health_probe_timeout: Duration,
    pub p2p_retry: RetryPolicy,
    pub settlement_retry: RetryPolicy,
    pub arbitration_timeout: Duration,
    pub proposal_expiry_secs: i64,
}

impl NodeConfig {
    pub fn resolve(args: Args) -> anyhow::Result<Self> {
        let settlement_contract = Address::from_hex(&args.settlement_contract)
            .map_err(|e| anyhow::anyhow!("invalid --settlement-contract: {e}"))?;
        let capital = args
            .capital
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid --capital: {e}"))?;

        let p2p_retry = RetryPolicy {
            max_attempts: env_parse("P2P_MAX_RETRIES").unwrap_or(RetryPolicy::default().max_attempts),
            base_delay: Duration::from_millis(
                env_parse("P2P_BASE_DELAY_MS").unwrap_or(RetryPolicy::default().base_delay.as_millis() as u64),
            ),
            max_delay: Duration::from_millis(
                env_parse("P2P_MAX_DELAY_MS").unwrap_or(RetryPolicy::default().max_delay.as_millis() as u64),
            ),
            attempt_timeout: Duration::from_millis(
                env_parse("P2P_TIMEOUT_MS").unwrap_or(RetryPolicy::default().attempt_timeout.as_millis() as u64),
            ),
        };

        let settlement_retry = RetryPolicy {
            max_attempts: env_parse("SETTLEMENT_MAX_RETRIES").unwrap_or(SETTLEMENT_MAX_RETRIES),
            attempt_timeout: Duration::from_millis(
                env_parse("SETTLEMENT_P2P_TIMEOUT_MS").unwrap_or(SETTLEMENT_P2P_TIMEOUT_MS),
            ),
            ..p2p_retry
        };

        Ok(Self {
            agent_dir: expand_tilde(&args.agent_dir),
            listen_addr: args.listen_addr,
            public_endpoint: args.public_endpoint,
            chain_url: args.chain_url,
            chain_id: args.chain_id,
            settlement_contract,
            key_file: args.key_file,
            capital,
            primary_pid: args.primary_pid,

            backup_enabled: env_flag("BACKUP_AGENT_ENABLED"),
            backend_url: std::env::var("BACKEND_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:4000".into()),
            discovery_ttl: Duration::from_millis(
                env_parse("P2P_DISCOVERY_CACHE_TTL_MS").unwrap_or(DISCOVERY_CACHE_TTL_MS),
            ),
            health_probe_timeout: Duration::from_millis(
                env_parse("P2P_HEALTH_CHECK_TIMEOUT_MS").unwrap_or(HEALTH_CHECK_TIMEOUT_MS),
            ),
            p2p_retry,
            settlement_retry,
            arbitration_timeout: Duration::from_millis(
                env_parse("SETTLEMENT_ARBITRATION_TIMEOUT_MS")
                    .unwrap_or(SETTLEMENT_ARBITRATION_TIMEOUT_MS),
            ),
            proposal_expiry_secs: env_parse("SETTLEMENT_PROPOSAL_EXPIRY_SECONDS")
                .unwrap_or(SETTLEMENT_PROPOSAL_EXPIRY_SECS),
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(%name, %raw, "unparseable environment value, using default");
            None
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &std::path::Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
