//! Multi-dimensional health watchdog.
//!
//! A periodic ticker samples a [`HealthSnapshot`], classifies it through a
//! strict priority ladder (stale heartbeat dominates everything, then
//! tool-call rate, output stall, phase timeout, error rate) and executes at
//! most one recovery action per tick. Recoveries are serialized: a second
//! one cannot start until the previous `complete_recovery` ran.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use windward_core::constants::{
    ERROR_RATE_MAX_PER_HOUR, HEARTBEAT_STALE_SECS, OUTPUT_STALL_SECS, TOOL_CALL_RATE_MAX_PER_MIN,
    WATCHDOG_INTERVAL_SECS,
};
use windward_core::error::WindwardError;
use windward_core::types::Timestamp;

use crate::event_log::{ResilienceLog, EVENT_RECOVERY, EVENT_WATCHDOG};
use crate::metrics::MetricsCollector;
use crate::recovery::{RecoveryLadder, RecoveryLevel};
use crate::state_store::{Phase, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Warning,
    Stuck,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthAction {
    None,
    RestartProcess,
    ClearContext,
    SendInterrupt,
    RestartWorkers,
    BackoffOutbound,
}

/// One sampled view of the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub heartbeat_age_secs: i64,
    pub tool_calls_per_min: f64,
    pub output_silence_secs: i64,
    pub memory_mb: u64,
    pub errors_per_hour: f64,
    pub phase: Phase,
    pub phase_elapsed_secs: i64,
}

/// Classifier thresholds; defaults match the documented table.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogThresholds {
    pub heartbeat_stale_secs: i64,
    pub tool_call_rate_max: f64,
    pub output_stall_secs: i64,
    pub error_rate_max: f64,
}

impl Default for WatchdogThresholds {
    fn default() -> Self {
        Self {
            heartbeat_stale_secs: HEARTBEAT_STALE_SECS,
            tool_call_rate_max: TOOL_CALL_RATE_MAX_PER_MIN,
            output_stall_secs: OUTPUT_STALL_SECS,
            error_rate_max: ERROR_RATE_MAX_PER_HOUR,
        }
    }
}

/// The classifier verdict for one snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HealthAssessment {
    pub status: HealthStatus,
    pub action: HealthAction,
    pub reason: String,
}

/// Priority-ordered classification; returns at most one action.
pub fn classify(s: &HealthSnapshot, t: &WatchdogThresholds) -> HealthAssessment {
    if s.heartbeat_age_secs > t.heartbeat_stale_secs {
        return HealthAssessment {
            status: HealthStatus::Critical,
            action: HealthAction::RestartProcess,
            reason: format!("heartbeat stale for {}s", s.heartbeat_age_secs),
        };
    }
    if s.tool_calls_per_min > t.tool_call_rate_max {
        return HealthAssessment {
            status: HealthStatus::Warning,
            action: HealthAction::ClearContext,
            reason: format!("tool-call rate {:.0}/min", s.tool_calls_per_min),
        };
    }
    if s.output_silence_secs > t.output_stall_secs {
        return HealthAssessment {
            status: HealthStatus::Stuck,
            action: HealthAction::SendInterrupt,
            reason: format!("no output for {}s", s.output_silence_secs),
        };
    }
    if let Some(budget) = s.phase.timeout_secs() {
        if s.phase_elapsed_secs > budget {
            return HealthAssessment {
                status: HealthStatus::Stuck,
                action: HealthAction::RestartWorkers,
                reason: format!("phase {:?} exceeded {budget}s budget", s.phase),
            };
        }
    }
    if s.errors_per_hour > t.error_rate_max {
        return HealthAssessment {
            status: HealthStatus::Degraded,
            action: HealthAction::BackoffOutbound,
            reason: format!("error rate {:.0}/hour", s.errors_per_hour),
        };
    }
    HealthAssessment {
        status: HealthStatus::Healthy,
        action: HealthAction::None,
        reason: "all dimensions within thresholds".into(),
    }
}

/// Supplies the watchdog with fresh snapshots; the orchestrator implements
/// this over the state store, metrics and its own output tracking.
pub trait HealthSource: Send + Sync {
    fn snapshot(&self, now: Timestamp) -> HealthSnapshot;
}

/// Executes a chosen recovery action at a given escalation level. The host
/// decides what a restart actually means.
#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    async fn execute(&self, action: HealthAction, level: RecoveryLevel) -> Result<(), WindwardError>;
}

pub struct Watchdog {
    thresholds: WatchdogThresholds,
    interval: Duration,
    source: Arc<dyn HealthSource>,
    handler: Arc<dyn RecoveryHandler>,
    state: Arc<StateStore>,
    metrics: Arc<MetricsCollector>,
    log: Arc<ResilienceLog>,
    ladder: Mutex<RecoveryLadder>,
    // Serializes recovery execution across ticks.
    gate: tokio::sync::Mutex<()>,
}

impl Watchdog {
    pub fn new(
        thresholds: WatchdogThresholds,
        source: Arc<dyn HealthSource>,
        handler: Arc<dyn RecoveryHandler>,
        state: Arc<StateStore>,
        metrics: Arc<MetricsCollector>,
        log: Arc<ResilienceLog>,
    ) -> Self {
        let persisted = state.load();
        let ladder = persisted
            .map(|s| RecoveryLadder::from_state(s.recovery.attempts, s.recovery.last_recovery_time))
            .unwrap_or_default();
        Self {
            thresholds,
            interval: Duration::from_secs(WATCHDOG_INTERVAL_SECS),
            source,
            handler,
            state,
            metrics,
            log,
            ladder: Mutex::new(ladder),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sample, classify, and run recovery if the verdict demands one.
    pub async fn tick(&self, now: Timestamp) -> HealthAssessment {
        let snapshot = self.source.snapshot(now);
        let assessment = classify(&snapshot, &self.thresholds);

        if assessment.action != HealthAction::None {
            warn!(
                status = ?assessment.status,
                action = ?assessment.action,
                reason = %assessment.reason,
                "watchdog verdict"
            );
            self.log.log_with(
                EVENT_WATCHDOG,
                &assessment.reason,
                &serde_json::json!({"status": assessment.status, "action": assessment.action}),
            );
            self.recover(&assessment, now).await;
        }

        assessment
    }

    async fn recover(&self, assessment: &HealthAssessment, now: Timestamp) {
        // One recovery at a time; a second verdict waits here until
        // complete_recovery has run for the first.
        let _gate = self.gate.lock().await;

        let level = {
            let mut ladder = self.ladder.lock().expect("ladder lock poisoned");
            if ladder.should_reset(now) {
                ladder.attempts = 0;
                if let Err(e) = self.state.reset_recovery_counter(now) {
                    warn!(error = %e, "failed to reset recovery counter");
                }
            }
            ladder.determine_level(now)
        };

        if let Err(e) = self.state.record_recovery_attempt(level, now) {
            warn!(error = %e, "failed to record recovery attempt");
        }
        self.metrics.record_recovery();
        info!(level = level.label(), action = ?assessment.action, "executing recovery");
        self.log.log_with(
            EVENT_RECOVERY,
            &format!("{} for {}", level.label(), assessment.reason),
            &serde_json::json!({"action": assessment.action, "level": level.label()}),
        );

        if let Err(e) = self.handler.execute(assessment.action, level).await {
            error!(error = %e, "recovery handler failed");
        }

        if let Err(e) = self.state.complete_recovery(now) {
            warn!(error = %e, "failed to mark recovery complete");
        }
    }

    /// Drive ticks until the stop flag flips.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    let _ = self.tick(now).await;
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        info!("watchdog stopping");
                        break;
                    }
                }
            }
        }
    }
}
