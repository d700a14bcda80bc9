//! Watchdog and backup integration points for the node process.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use windward_core::error::WindwardError;
use windward_core::types::Timestamp;
use windward_resilience::event_log::{ResilienceLog, EVENT_PROMOTION};
use windward_resilience::{
    BackupAgent, HealthAction, HealthSnapshot, HealthSource, MetricsCollector, PromotionEvent,
    RecoveryHandler, RecoveryLevel, StateStore,
};

/// Builds watchdog snapshots from the persisted state, the metrics
/// collector and the node's own output tracking.
pub struct NodeHealthSource {
    state: Arc<StateStore>,
    metrics: Arc<MetricsCollector>,
    last_output: AtomicI64,
}

impl NodeHealthSource {
    pub fn new(state: Arc<StateStore>, metrics: Arc<MetricsCollector>, now: Timestamp) -> Self {
        Self { state, metrics, last_output: AtomicI64::new(now) }
    }

    /// Call whenever the agent produces output (log line, P2P reply, tx).
    pub fn note_output(&self, now: Timestamp) {
        self.last_output.store(now, Ordering::SeqCst);
    }
}

impl HealthSource for NodeHealthSource {
    fn snapshot(&self, now: Timestamp) -> HealthSnapshot {
        let state = self.state.load_or_init(now);
        HealthSnapshot {
            heartbeat_age_secs: now - state.last_heartbeat,
            tool_calls_per_min: self.metrics.tool_call_rate_per_min(now),
            output_silence_secs: now - self.last_output.load(Ordering::SeqCst),
            memory_mb: resident_memory_mb(),
            errors_per_hour: self.metrics.error_rate_per_hour(now),
            phase: state.phase,
            phase_elapsed_secs: now - state.phase_start_time,
        }
    }
}

/// Executes watchdog actions within this process. Restarting the process
/// itself is the supervisor's job; at HUMAN_INTERVENTION the node only
/// reports and waits.
pub struct NodeRecoveryHandler {
    log: Arc<ResilienceLog>,
}

impl NodeRecoveryHandler {
    pub fn new(log: Arc<ResilienceLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl RecoveryHandler for NodeRecoveryHandler {
    async fn execute(
        &self,
        action: HealthAction,
        level: RecoveryLevel,
    ) -> Result<(), WindwardError> {
        match (action, level) {
            (_, RecoveryLevel::HumanIntervention) => {
                error!("recovery exhausted, operator intervention required");
                self.log.log(
                    EVENT_PROMOTION,
                    "HUMAN_INTERVENTION: automatic recovery exhausted",
                );
            }
            (HealthAction::RestartProcess, _) => {
                // Exit non-zero and let the supervisor (or the standby
                // backup) take it from here.
                warn!("watchdog requested process restart");
                self.log.log("RESTART", "watchdog requested process restart");
            }
            (HealthAction::ClearContext, _) => {
                info!("watchdog requested context clear");
            }
            (HealthAction::SendInterrupt, _) => {
                info!("watchdog requested worker interrupt");
            }
            (HealthAction::RestartWorkers, _) => {
                info!("watchdog requested worker restart");
            }
            (HealthAction::BackoffOutbound, _) => {
                info!("watchdog requested outbound backoff");
            }
            (HealthAction::None, _) => {}
        }
        Ok(())
    }
}

/// Drain promotion events from the backup agent: log, count, and hand the
/// host its cue to take traffic over. Runs until the channel closes.
pub async fn drain_promotions(
    mut events: tokio::sync::mpsc::UnboundedReceiver<PromotionEvent>,
    agent: Arc<BackupAgent>,
    log: Arc<ResilienceLog>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PromotionEvent::Failover => {
                warn!("failover begun: primary presumed dead");
            }
            PromotionEvent::Promoted => {
                info!(failovers = agent.failovers_performed(), "promotion complete");
                log.log(EVENT_PROMOTION, "host notified of promotion");
            }
        }
    }
}

/// Resident set size in MiB, read from /proc; 0 when unavailable.
fn resident_memory_mb() -> u64 {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return 0;
    };
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .unwrap_or(0);
            return kb / 1024;
        }
    }
    0
}
