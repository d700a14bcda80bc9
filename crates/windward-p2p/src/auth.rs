//! Inbound request attribution and replay protection.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha3::Digest as _;

use windward_chain::ChainAdapter;
use windward_core::error::WindwardError;
use windward_core::types::{Address, BetId, Digest};
use windward_crypto::Keccak256;

/// Remembers accepted commitments/proposals by content hash so the same
/// message cannot be accepted twice. Retention must cover at least the
/// longest proposal expiry in use; entries are pruned opportunistically on
/// insert.
pub struct ReplayCache {
    retention: Duration,
    seen: Mutex<HashMap<Digest, Instant>>,
}

impl ReplayCache {
    pub fn new(retention: Duration) -> Self {
        Self { retention, seen: Mutex::new(HashMap::new()) }
    }

    /// Admit a fresh content hash, or reject a replay.
    pub fn check_and_insert(&self, digest: Digest) -> Result<(), WindwardError> {
        let mut seen = self.seen.lock().expect("replay cache lock poisoned");
        let now = Instant::now();
        seen.retain(|_, at| now.duration_since(*at) < self.retention);
        if seen.contains_key(&digest) {
            return Err(WindwardError::Replay(digest.to_hex()));
        }
        seen.insert(digest, now);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().expect("replay cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Require `address` to be a registered, active bot.
pub async fn require_registered(
    chain: &dyn ChainAdapter,
    address: Address,
) -> Result<(), WindwardError> {
    match chain.get_bot(address).await {
        Ok(Some(bot)) if bot.active => Ok(()),
        Ok(_) => Err(WindwardError::UnknownSender(address.to_hex())),
        Err(e) => Err(e.into()),
    }
}

/// Require the enclosed nonce to be fresh against the sender's current
/// chain nonce: anything older than the on-chain value is already spent.
pub async fn require_fresh_nonce(
    chain: &dyn ChainAdapter,
    sender: Address,
    nonce: u64,
) -> Result<(), WindwardError> {
    let current = chain.get_vault_nonce(sender).await?;
    if nonce < current {
        return Err(WindwardError::NonceMismatch { expected: current, got: nonce });
    }
    Ok(())
}

/// Digest a trades upload commits to: bet id, portfolio root and snapshot.
pub fn trades_upload_digest(bet_id: BetId, root: &Digest, snapshot_id: &str) -> Digest {
    let mut h = Keccak256::new();
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&bet_id.0.to_be_bytes());
    h.update(word);
    h.update(root.as_bytes());
    h.update(windward_crypto::keccak256(snapshot_id.as_bytes()).as_bytes());
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    Digest::from_bytes(arr)
}
