//! Extended agent state, atomically persisted.
//!
//! One JSON object per process (`agent-state.json`), replaced wholesale via
//! write-temp + rename on every mutation. Only the process whose pid is in
//! `primary.pid` may mutate it; the backup agent writes only its shadow
//! copy.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use windward_core::error::WindwardError;
use windward_core::types::{Amount, Timestamp};

use crate::fsutil::write_atomic;
use crate::recovery::RecoveryLevel;

/// Coarse activity phase the agent reports to the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Research,
    Evaluation,
    Execution,
}

impl Phase {
    /// Phase budget before the watchdog declares the agent stuck.
    pub fn timeout_secs(&self) -> Option<i64> {
        use windward_core::constants::*;
        match self {
            Phase::Idle => None,
            Phase::Research => Some(PHASE_TIMEOUT_RESEARCH_SECS),
            Phase::Evaluation => Some(PHASE_TIMEOUT_EVALUATION_SECS),
            Phase::Execution => Some(PHASE_TIMEOUT_EXECUTION_SECS),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryState {
    pub attempts: u32,
    pub last_recovery_time: Option<Timestamp>,
    pub current_level: Option<RecoveryLevel>,
    pub in_progress: bool,
}

/// Opaque resumable state owned by the producing task types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoverableState {
    pub last_checkpoint: Option<String>,
    pub checkpoint_data: BTreeMap<String, serde_json::Value>,
    pub pending_task_ids: BTreeSet<String>,
    pub snapshot_time: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedState {
    pub agent_identity: String,
    #[serde(with = "windward_core::types::amount_string")]
    pub capital: Amount,
    #[serde(with = "windward_core::types::amount_string")]
    pub current_balance: Amount,
    pub phase: Phase,
    pub phase_start_time: Timestamp,
    pub last_heartbeat: Timestamp,
    pub current_task_id: Option<String>,
    pub recovery: RecoveryState,
    /// Per-dependency breaker state labels at the last snapshot.
    pub breaker_states: BTreeMap<String, String>,
    pub recoverable: RecoverableState,
}

impl ExtendedState {
    pub fn initial(identity: impl Into<String>, capital: Amount, now: Timestamp) -> Self {
        Self {
            agent_identity: identity.into(),
            capital,
            current_balance: capital,
            phase: Phase::Idle,
            phase_start_time: now,
            last_heartbeat: now,
            current_task_id: None,
            recovery: RecoveryState::default(),
            breaker_states: BTreeMap::new(),
            recoverable: RecoverableState::default(),
        }
    }
}

/// Owner of `agent-state.json`. All helpers are read-modify-write under one
/// lock, finishing with an atomic rename; nothing suspends while the lock
/// is held.
pub struct StateStore {
    path: PathBuf,
    identity: String,
    initial_capital: Amount,
    lock: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, identity: impl Into<String>, initial_capital: Amount) -> Self {
        Self {
            path: path.into(),
            identity: identity.into(),
            initial_capital,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state. Missing or invalid files return `None`;
    /// callers treat that as "first run, initialize defaults".
    pub fn load(&self) -> Option<ExtendedState> {
        let bytes = std::fs::read(&self.path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state file failed validation");
                None
            }
        }
    }

    /// Current state, or a fresh default stamped at `now`.
    pub fn load_or_init(&self, now: Timestamp) -> ExtendedState {
        self.load()
            .unwrap_or_else(|| ExtendedState::initial(self.identity.clone(), self.initial_capital, now))
    }

    pub fn save(&self, state: &ExtendedState) -> Result<(), WindwardError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path, &bytes)
            .map_err(|e| WindwardError::StateUnreadable(format!("{}: {e}", self.path.display())))
    }

    /// Read-modify-write one mutation atomically.
    pub fn update<F>(&self, now: Timestamp, mutate: F) -> Result<ExtendedState, WindwardError>
    where
        F: FnOnce(&mut ExtendedState),
    {
        let _guard = self.lock.lock().expect("state lock poisoned");
        let mut state = self.load_or_init(now);
        mutate(&mut state);
        self.save(&state)?;
        Ok(state)
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    pub fn update_heartbeat(&self, now: Timestamp) -> Result<(), WindwardError> {
        self.update(now, |s| s.last_heartbeat = now).map(|_| ())
    }

    pub fn start_phase(&self, phase: Phase, now: Timestamp) -> Result<(), WindwardError> {
        self.update(now, |s| {
            s.phase = phase;
            s.phase_start_time = now;
        })
        .map(|_| ())
    }

    pub fn set_current_task(&self, task_id: Option<String>, now: Timestamp) -> Result<(), WindwardError> {
        self.update(now, |s| s.current_task_id = task_id).map(|_| ())
    }

    pub fn record_recovery_attempt(
        &self,
        level: RecoveryLevel,
        now: Timestamp,
    ) -> Result<(), WindwardError> {
        self.update(now, |s| {
            s.recovery.attempts += 1;
            s.recovery.last_recovery_time = Some(now);
            s.recovery.current_level = Some(level);
            s.recovery.in_progress = true;
        })
        .map(|_| ())
    }

    pub fn complete_recovery(&self, now: Timestamp) -> Result<(), WindwardError> {
        self.update(now, |s| s.recovery.in_progress = false).map(|_| ())
    }

    pub fn reset_recovery_counter(&self, now: Timestamp) -> Result<(), WindwardError> {
        self.update(now, |s| {
            s.recovery.attempts = 0;
            s.recovery.current_level = None;
        })
        .map(|_| ())
    }

    /// True iff more than the reset window has passed since the last recovery.
    pub fn should_reset_recovery_counter(&self, now: Timestamp) -> bool {
        self.load()
            .and_then(|s| s.recovery.last_recovery_time)
            .map(|t| now - t > windward_core::constants::RECOVERY_RESET_SECS)
            .unwrap_or(false)
    }

    pub fn update_breaker_states(
        &self,
        states: BTreeMap<String, String>,
        now: Timestamp,
    ) -> Result<(), WindwardError> {
        self.update(now, |s| s.breaker_states = states).map(|_| ())
    }

    pub fn save_checkpoint(
        &self,
        name: &str,
        data: serde_json::Value,
        now: Timestamp,
    ) -> Result<(), WindwardError> {
        self.update(now, |s| {
            s.recoverable.last_checkpoint = Some(name.to_string());
            s.recoverable.checkpoint_data.insert(name.to_string(), data);
            s.recoverable.snapshot_time = now;
        })
        .map(|_| ())
    }

    pub fn clear_recoverable_state(&self, now: Timestamp) -> Result<(), WindwardError> {
        self.update(now, |s| {
            s.recoverable = RecoverableState { snapshot_time: now, ..Default::default() };
        })
        .map(|_| ())
    }

    pub fn add_pending_task(&self, task_id: &str, now: Timestamp) -> Result<(), WindwardError> {
        self.update(now, |s| {
            s.recoverable.pending_task_ids.insert(task_id.to_string());
        })
        .map(|_| ())
    }

    pub fn remove_pending_task(&self, task_id: &str, now: Timestamp) -> Result<(), WindwardError> {
        self.update(now, |s| {
            s.recoverable.pending_task_ids.remove(task_id);
        })
        .map(|_| ())
    }
}
