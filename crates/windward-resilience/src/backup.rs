//! Hot-standby backup agent.
//!
//! A secondary process starts in STANDBY with the primary's pid, replicates
//! the primary's state file on a fixed cadence, probes the primary's
//! liveness, and promotes itself to PRIMARY when the probe fails: it
//! restores the replicated state onto the primary path, takes over the
//! primary-pid file, and publishes Failover then Promoted on the promotion
//! channel. The host application subscribes to that channel to restart
//! traffic; the backup core does not itself reopen sockets.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use windward_core::constants::{BACKUP_LIVENESS_INTERVAL_SECS, BACKUP_REPLICATION_INTERVAL_SECS};
use windward_core::error::WindwardError;

use crate::event_log::{ResilienceLog, EVENT_FAILOVER, EVENT_PROMOTION};
use crate::fsutil::copy_atomic;
use crate::metrics::MetricsCollector;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackupMode {
    Disabled,
    Standby,
    Primary,
}

/// Published on promotion, in this order, at most once per promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionEvent {
    Failover,
    Promoted,
}

/// Answers "does this pid exist". Injected so tests can script primary
/// death without killing processes.
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Default probe: checks `/proc/<pid>` (the deploy target is Linux).
pub struct ProcProbe;

impl ProcessProbe for ProcProbe {
    fn is_alive(&self, pid: u32) -> bool {
        Path::new(&format!("/proc/{pid}")).exists()
    }
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Agent directory holding the state and pid files.
    pub agent_dir: PathBuf,
    pub replication_interval: Duration,
    pub liveness_interval: Duration,
}

impl BackupConfig {
    pub fn new(agent_dir: impl Into<PathBuf>) -> Self {
        Self {
            agent_dir: agent_dir.into(),
            replication_interval: Duration::from_secs(BACKUP_REPLICATION_INTERVAL_SECS),
            liveness_interval: Duration::from_secs(BACKUP_LIVENESS_INTERVAL_SECS),
        }
    }

    pub fn primary_state_path(&self) -> PathBuf {
        self.agent_dir.join("agent-state.json")
    }

    pub fn backup_state_path(&self) -> PathBuf {
        self.agent_dir.join("backup-state.json")
    }

    pub fn primary_pid_path(&self) -> PathBuf {
        self.agent_dir.join("primary.pid")
    }

    pub fn backup_pid_path(&self) -> PathBuf {
        self.agent_dir.join("backup.pid")
    }
}

pub struct BackupAgent {
    config: BackupConfig,
    probe: Box<dyn ProcessProbe>,
    mode: Mutex<BackupMode>,
    primary_pid: AtomicU32,
    own_pid: u32,
    failovers: AtomicU64,
    events: mpsc::UnboundedSender<PromotionEvent>,
    log: Arc<ResilienceLog>,
    metrics: Arc<MetricsCollector>,
}

impl BackupAgent {
    /// Build the agent and its promotion-event receiver. The receiver must
    /// be wired up before [`start_standby`](Self::start_standby).
    pub fn new(
        config: BackupConfig,
        probe: Box<dyn ProcessProbe>,
        log: Arc<ResilienceLog>,
        metrics: Arc<MetricsCollector>,
    ) -> (Self, mpsc::UnboundedReceiver<PromotionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let agent = Self {
            config,
            probe,
            mode: Mutex::new(BackupMode::Disabled),
            primary_pid: AtomicU32::new(0),
            own_pid: std::process::id(),
            failovers: AtomicU64::new(0),
            events: tx,
            log,
            metrics,
        };
        (agent, rx)
    }

    pub fn mode(&self) -> BackupMode {
        *self.mode.lock().expect("backup mode lock poisoned")
    }

    pub fn failovers_performed(&self) -> u64 {
        self.failovers.load(Ordering::SeqCst)
    }

    /// Enter STANDBY against `primary_pid`: write both pid files and begin
    /// accepting replication/liveness ticks.
    pub fn start_standby(&self, primary_pid: u32) -> Result<(), WindwardError> {
        write_pid_file(&self.config.backup_pid_path(), self.own_pid)?;
        write_pid_file(&self.config.primary_pid_path(), primary_pid)?;
        self.primary_pid.store(primary_pid, Ordering::SeqCst);
        *self.mode.lock().expect("backup mode lock poisoned") = BackupMode::Standby;
        info!(primary_pid, own_pid = self.own_pid, "backup agent in standby");
        Ok(())
    }

    /// Copy the primary's state file into the backup shadow copy. A missing
    /// primary file (primary not yet initialized) is not an error.
    pub fn replicate_once(&self) -> Result<(), WindwardError> {
        if self.mode() != BackupMode::Standby {
            return Ok(());
        }
        let src = self.config.primary_state_path();
        if !src.exists() {
            return Ok(());
        }
        copy_atomic(&src, &self.config.backup_state_path())
            .map_err(|e| WindwardError::Io(format!("replication: {e}")))
    }

    /// Probe the primary; on failure, promote.
    pub fn check_primary(&self) -> BackupMode {
        if self.mode() != BackupMode::Standby {
            return self.mode();
        }
        let pid = self.primary_pid.load(Ordering::SeqCst);
        if self.probe.is_alive(pid) {
            return BackupMode::Standby;
        }
        warn!(primary_pid = pid, "primary liveness probe failed");
        self.promote();
        self.mode()
    }

    /// Promote to PRIMARY. Idempotent: a second call while already PRIMARY
    /// is a no-op that reports failure.
    pub fn promote(&self) -> bool {
        {
            let mut mode = self.mode.lock().expect("backup mode lock poisoned");
            if *mode == BackupMode::Primary {
                warn!("promote called while already primary");
                return false;
            }
            *mode = BackupMode::Primary;
        }

        // Restore the replicated snapshot onto the primary state path.
        let backup = self.config.backup_state_path();
        if backup.exists() {
            if let Err(e) = copy_atomic(&backup, &self.config.primary_state_path()) {
                warn!(error = %e, "failed to restore backup state onto primary path");
            }
        }

        if let Err(e) = write_pid_file(&self.config.primary_pid_path(), self.own_pid) {
            warn!(error = %e, "failed to take over primary pid file");
        }

        self.failovers.fetch_add(1, Ordering::SeqCst);
        self.metrics.record_failover();
        self.log.log(EVENT_FAILOVER, "primary dead, backup taking over");

        // Failover first, then Promoted; a dropped receiver is logged, never
        // propagated.
        for event in [PromotionEvent::Failover, PromotionEvent::Promoted] {
            if let Err(e) = self.events.send(event) {
                warn!(error = %e, "promotion event delivery failed");
            }
        }
        self.log.log(EVENT_PROMOTION, "backup agent is now primary");
        info!("backup agent promoted to primary");
        true
    }

    /// Drive replication and liveness tickers until the stop flag flips or
    /// promotion ends the standby duties.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut replicate = tokio::time::interval(self.config.replication_interval);
        let mut liveness = tokio::time::interval(self.config.liveness_interval);
        replicate.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = replicate.tick() => {
                    if let Err(e) = self.replicate_once() {
                        warn!(error = %e, "state replication failed");
                    }
                }
                _ = liveness.tick() => {
                    if self.check_primary() == BackupMode::Primary {
                        // Promotion ends probing; replication is also moot.
                        break;
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        info!("backup agent stopping");
                        break;
                    }
                }
            }
        }
    }
}

// ── Pid files ────────────────────────────────────────────────────────────────

pub fn write_pid_file(path: &Path, pid: u32) -> Result<(), WindwardError> {
    crate::fsutil::write_atomic(path, pid.to_string().as_bytes())
        .map_err(|e| WindwardError::Io(format!("{}: {e}", path.display())))
}

pub fn read_pid_file(path: &Path) -> Result<u32, WindwardError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| WindwardError::Io(format!("{}: {e}", path.display())))?;
    content
        .trim()
        .parse()
        .map_err(|_| WindwardError::PidFileCorrupt(format!("{}: '{}'", path.display(), content.trim())))
}
