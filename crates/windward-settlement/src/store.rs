//! Replicated per-bet trade storage.
//!
//! The full portfolio for each committed bet is persisted under the agent
//! directory (`trades/{bet-id}.json`) together with its snapshot id, so
//! settlement can resolve it after a crash without the counterparty's help.
//! Absence at settlement time is a data-integrity failure, not something
//! to recover from.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use windward_core::error::WindwardError;
use windward_core::types::{BetId, Trade};
use windward_resilience::fsutil::write_atomic;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTrades {
    pub bet_id: BetId,
    pub snapshot_id: String,
    pub trades: Vec<Trade>,
}

pub struct TradeStore {
    dir: PathBuf,
}

impl TradeStore {
    /// Open a store rooted at `{agent_dir}/trades`.
    pub fn open(agent_dir: impl Into<PathBuf>) -> Result<Self, WindwardError> {
        let dir = agent_dir.into().join("trades");
        std::fs::create_dir_all(&dir)
            .map_err(|e| WindwardError::Io(format!("{}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    fn path(&self, bet_id: BetId) -> PathBuf {
        self.dir.join(format!("{}.json", bet_id.0))
    }

    pub fn save(
        &self,
        bet_id: BetId,
        snapshot_id: &str,
        trades: &[Trade],
    ) -> Result<(), WindwardError> {
        let stored = StoredTrades {
            bet_id,
            snapshot_id: snapshot_id.to_string(),
            trades: trades.to_vec(),
        };
        let bytes = serde_json::to_vec(&stored)?;
        write_atomic(&self.path(bet_id), &bytes)
            .map_err(|e| WindwardError::Io(format!("trades {}: {e}", bet_id)))
    }

    pub fn load(&self, bet_id: BetId) -> Option<StoredTrades> {
        let bytes = std::fs::read(self.path(bet_id)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn has(&self, bet_id: BetId) -> bool {
        self.path(bet_id).exists()
    }

    /// Every bet id with a stored portfolio (the settlement watcher scans
    /// these for passed deadlines).
    pub fn bet_ids(&self) -> Vec<BetId> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut ids: Vec<BetId> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.path()
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse().ok())
                    .map(BetId)
            })
            .collect();
        ids.sort();
        ids
    }

    pub fn remove(&self, bet_id: BetId) -> Result<(), WindwardError> {
        match std::fs::remove_file(self.path(bet_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WindwardError::Io(format!("trades {}: {e}", bet_id))),
        }
    }
}
