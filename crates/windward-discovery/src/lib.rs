//! windward-discovery
//!
//! Registry-backed peer directory with a TTL cache and bounded concurrent
//! health probing. Chain-read failures degrade to stale data rather than
//! an empty peer set; probe failures only flip the per-peer health flag.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use windward_chain::ChainAdapter;
use windward_core::constants::{
    DISCOVERY_CACHE_TTL_MS, HEALTH_CHECK_CONCURRENCY, HEALTH_CHECK_TIMEOUT_MS,
};
use windward_core::types::{Address, PeerRecord};

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub cache_ttl: Duration,
    pub probe_timeout: Duration,
    pub probe_concurrency: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_millis(DISCOVERY_CACHE_TTL_MS),
            probe_timeout: Duration::from_millis(HEALTH_CHECK_TIMEOUT_MS),
            probe_concurrency: HEALTH_CHECK_CONCURRENCY,
        }
    }
}

#[derive(Default)]
struct Cache {
    peers: HashMap<Address, PeerRecord>,
    last_refresh: Option<Instant>,
}

pub struct PeerDirectory {
    chain: Arc<dyn ChainAdapter>,
    self_address: Address,
    config: DiscoveryConfig,
    client: reqwest::Client,
    cache: Mutex<Cache>,
}

impl PeerDirectory {
    pub fn new(chain: Arc<dyn ChainAdapter>, self_address: Address, config: DiscoveryConfig) -> Self {
        Self {
            chain,
            self_address,
            config,
            client: reqwest::Client::new(),
            cache: Mutex::new(Cache::default()),
        }
    }

    /// Current peer set. Served from cache while fresh; otherwise re-reads
    /// the registry and merges. On chain-read failure returns stale data.
    pub async fn fetch_peers(&self) -> Vec<PeerRecord> {
        {
            let cache = self.cache.lock().await;
            if let Some(at) = cache.last_refresh {
                if at.elapsed() < self.config.cache_ttl {
                    return cache.peers.values().cloned().collect();
                }
            }
        }

        // Not fresh: read the registry without holding the lock.
        match self.chain.get_all_active_bots().await {
            Ok(bots) => {
                let now = unix_now();
                let mut cache = self.cache.lock().await;
                let mut merged: HashMap<Address, PeerRecord> = HashMap::new();
                for bot in bots {
                    if bot.address == self.self_address {
                        continue;
                    }
                    let record = match cache.peers.get(&bot.address) {
                        // Endpoint change invalidates whatever health we knew.
                        Some(prev) if prev.endpoint == bot.endpoint => PeerRecord {
                            address: bot.address,
                            endpoint: bot.endpoint,
                            pubkey_hash: bot.pubkey_hash,
                            last_known_healthy: prev.last_known_healthy,
                            last_checked: prev.last_checked,
                        },
                        _ => PeerRecord {
                            address: bot.address,
                            endpoint: bot.endpoint,
                            pubkey_hash: bot.pubkey_hash,
                            last_known_healthy: false,
                            last_checked: now,
                        },
                    };
                    merged.insert(bot.address, record);
                }
                cache.peers = merged;
                cache.last_refresh = Some(Instant::now());
                debug!(count = cache.peers.len(), "peer registry refreshed");
                cache.peers.values().cloned().collect()
            }
            Err(e) => {
                warn!(error = %e, "registry read failed, serving stale peers");
                let cache = self.cache.lock().await;
                cache.peers.values().cloned().collect()
            }
        }
    }

    /// Peers that answered the health probe just now. Probes run under a
    /// concurrency bound; failures update the per-peer flag and are not
    /// fatal to discovery.
    pub async fn healthy_peers(&self) -> Vec<PeerRecord> {
        let peers = self.fetch_peers().await;
        let semaphore = Arc::new(Semaphore::new(self.config.probe_concurrency.max(1)));

        let probes = peers.into_iter().map(|peer| {
            let semaphore = Arc::clone(&semaphore);
            let client = self.client.clone();
            let timeout = self.config.probe_timeout;
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let healthy = probe_health(&client, &peer.endpoint, timeout).await;
                (peer, healthy)
            }
        });
        let results = futures::future::join_all(probes).await;

        let now = unix_now();
        let mut cache = self.cache.lock().await;
        let mut healthy = Vec::new();
        for (mut peer, is_healthy) in results {
            peer.last_known_healthy = is_healthy;
            peer.last_checked = now;
            if let Some(entry) = cache.peers.get_mut(&peer.address) {
                entry.last_known_healthy = is_healthy;
                entry.last_checked = now;
            }
            if is_healthy {
                healthy.push(peer);
            }
        }
        healthy
    }

    /// Cached record for one peer, if the registry listed it.
    pub async fn peer(&self, address: &Address) -> Option<PeerRecord> {
        // Serve through fetch_peers so a cold cache still resolves.
        self.fetch_peers()
            .await
            .into_iter()
            .find(|p| p.address == *address)
    }
}

/// A peer is healthy iff GET /p2p/health returns 200 with `status: "healthy"`
/// within the timeout.
async fn probe_health(client: &reqwest::Client, endpoint: &str, timeout: Duration) -> bool {
    let url = format!("{}/p2p/health", endpoint.trim_end_matches('/'));
    let response = match tokio::time::timeout(timeout, client.get(&url).send()).await {
        Ok(Ok(r)) => r,
        _ => return false,
    };
    if !response.status().is_success() {
        return false;
    }
    match response.json::<serde_json::Value>().await {
        Ok(body) => body.get("status").and_then(|s| s.as_str()) == Some("healthy"),
        Err(_) => false,
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    use windward_chain::{BotRecord, ChainError};
    use windward_core::types::{
        Amount, Bet, BetId, BilateralCommitment, CustomPayout, Digest, Nonce,
        SettlementAgreement, Signature, VaultBalance,
    };

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    fn bot(b: u8, endpoint: &str) -> BotRecord {
        BotRecord {
            address: addr(b),
            endpoint: endpoint.to_string(),
            pubkey_hash: Digest::from_bytes([b; 32]),
            active: true,
        }
    }

    /// Registry stub: scripted bot lists, counted reads, optional failure.
    struct StubChain {
        bots: StdMutex<Result<Vec<BotRecord>, ()>>,
        reads: AtomicU32,
    }

    impl StubChain {
        fn with(bots: Vec<BotRecord>) -> Self {
            Self { bots: StdMutex::new(Ok(bots)), reads: AtomicU32::new(0) }
        }

        fn set(&self, bots: Result<Vec<BotRecord>, ()>) {
            *self.bots.lock().unwrap() = bots;
        }

        fn reads(&self) -> u32 {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChainAdapter for StubChain {
        async fn approve(&self, _: Address, _: Amount) -> Result<(), ChainError> {
            unimplemented!()
        }
        async fn balance(&self) -> Result<Amount, ChainError> {
            unimplemented!()
        }
        async fn register_bot(&self, _: &str, _: Digest) -> Result<(), ChainError> {
            unimplemented!()
        }
        async fn deregister_bot(&self) -> Result<(), ChainError> {
            unimplemented!()
        }
        async fn get_bot(&self, _: Address) -> Result<Option<BotRecord>, ChainError> {
            unimplemented!()
        }
        async fn get_all_active_bots(&self) -> Result<Vec<BotRecord>, ChainError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.bots
                .lock()
                .unwrap()
                .clone()
                .map_err(|_| ChainError::Transport("registry unreachable".into()))
        }
        async fn deposit_to_vault(&self, _: Amount) -> Result<(), ChainError> {
            unimplemented!()
        }
        async fn withdraw_from_vault(&self, _: Amount) -> Result<(), ChainError> {
            unimplemented!()
        }
        async fn get_vault_balance(&self, _: Address) -> Result<VaultBalance, ChainError> {
            unimplemented!()
        }
        async fn get_vault_nonce(&self, _: Address) -> Result<Nonce, ChainError> {
            unimplemented!()
        }
        fn sign_bilateral_commitment(
            &self,
            _: &BilateralCommitment,
        ) -> Result<Signature, ChainError> {
            unimplemented!()
        }
        async fn commit_bilateral_bet(
            &self,
            _: &BilateralCommitment,
            _: &Signature,
            _: &Signature,
        ) -> Result<BetId, ChainError> {
            unimplemented!()
        }
        fn sign_settlement_agreement(
            &self,
            _: &SettlementAgreement,
        ) -> Result<Signature, ChainError> {
            unimplemented!()
        }
        async fn settle_by_agreement(
            &self,
            _: &SettlementAgreement,
            _: &Signature,
            _: &Signature,
        ) -> Result<(), ChainError> {
            unimplemented!()
        }
        fn sign_custom_payout(&self, _: &CustomPayout) -> Result<Signature, ChainError> {
            unimplemented!()
        }
        async fn custom_payout(
            &self,
            _: &CustomPayout,
            _: &Signature,
            _: &Signature,
        ) -> Result<(), ChainError> {
            unimplemented!()
        }
        async fn request_arbitration(&self, _: BetId) -> Result<(), ChainError> {
            unimplemented!()
        }
        async fn get_bet(&self, _: BetId) -> Result<Bet, ChainError> {
            unimplemented!()
        }
        fn signer_address(&self) -> Address {
            addr(0)
        }
    }

    fn directory(chain: Arc<StubChain>, ttl: Duration) -> PeerDirectory {
        let config = DiscoveryConfig {
            cache_ttl: ttl,
            probe_timeout: Duration::from_millis(300),
            probe_concurrency: 4,
        };
        PeerDirectory::new(chain, addr(0xFF), config)
    }

    #[tokio::test]
    async fn fresh_cache_skips_the_chain() {
        let chain = Arc::new(StubChain::with(vec![bot(1, "http://a"), bot(2, "http://b")]));
        let dir = directory(Arc::clone(&chain), Duration::from_secs(60));

        let first = dir.fetch_peers().await;
        let second = dir.fetch_peers().await;
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_eq!(chain.reads(), 1, "second call within TTL must not re-read");
    }

    #[tokio::test]
    async fn expired_cache_rereads_and_merges() {
        let chain = Arc::new(StubChain::with(vec![bot(1, "http://a"), bot(2, "http://b")]));
        let dir = directory(Arc::clone(&chain), Duration::from_millis(10));

        dir.fetch_peers().await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        // Peer 2 vanished from the registry; peer 3 appeared.
        chain.set(Ok(vec![bot(1, "http://a"), bot(3, "http://c")]));
        let peers = dir.fetch_peers().await;

        assert_eq!(chain.reads(), 2);
        let addrs: Vec<Address> = peers.iter().map(|p| p.address).collect();
        assert!(addrs.contains(&addr(1)));
        assert!(addrs.contains(&addr(3)));
        assert!(!addrs.contains(&addr(2)), "vanished peers are removed");
    }

    #[tokio::test]
    async fn endpoint_change_resets_healthiness() {
        let chain = Arc::new(StubChain::with(vec![bot(1, "http://a")]));
        let dir = directory(Arc::clone(&chain), Duration::from_millis(10));

        dir.fetch_peers().await;
        {
            // Pretend a probe had marked it healthy.
            let mut cache = dir.cache.lock().await;
            cache.peers.get_mut(&addr(1)).unwrap().last_known_healthy = true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
        chain.set(Ok(vec![bot(1, "http://moved")]));
        let peers = dir.fetch_peers().await;

        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].endpoint, "http://moved");
        assert!(!peers[0].last_known_healthy, "endpoint change invalidates health");
    }

    #[tokio::test]
    async fn self_is_excluded() {
        let chain = Arc::new(StubChain::with(vec![bot(1, "http://a"), bot(0xFF, "http://me")]));
        let dir = directory(chain, Duration::from_secs(60));
        let peers = dir.fetch_peers().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].address, addr(1));
    }

    #[tokio::test]
    async fn chain_failure_serves_stale_data() {
        let chain = Arc::new(StubChain::with(vec![bot(1, "http://a")]));
        let dir = directory(Arc::clone(&chain), Duration::from_millis(10));

        assert_eq!(dir.fetch_peers().await.len(), 1);
        tokio::time::sleep(Duration::from_millis(25)).await;
        chain.set(Err(()));
        let stale = dir.fetch_peers().await;
        assert_eq!(stale.len(), 1, "stale peers are better than none");
        assert_eq!(stale[0].address, addr(1));
    }

    #[tokio::test]
    async fn unreachable_peer_is_marked_unhealthy() {
        // Nothing listens on port 9 on loopback.
        let chain = Arc::new(StubChain::with(vec![bot(1, "http://127.0.0.1:9")]));
        let dir = directory(chain, Duration::from_secs(60));

        let healthy = dir.healthy_peers().await;
        assert!(healthy.is_empty());

        let cached = dir.fetch_peers().await;
        assert!(!cached[0].last_known_healthy);
    }
}
