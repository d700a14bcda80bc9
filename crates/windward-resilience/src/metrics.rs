//! Aggregated resilience metrics.
//!
//! One collector per process, passed by reference to everything that
//! records. Counters are monotonically non-decreasing within a process;
//! the snapshot is persisted atomically to `resilience-metrics.json` and
//! carries the derived overall status for external alerting.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use windward_core::error::WindwardError;
use windward_core::types::Timestamp;

use crate::fsutil::write_atomic;
use crate::watchdog::HealthStatus;

/// User-visible health rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Recovering,
    Unhealthy,
}

#[derive(Debug, Default)]
struct Counters {
    tool_calls: u64,
    errors: u64,
    tasks_completed: u64,
    tasks_failed: u64,
    p2p_requests: u64,
    p2p_failures: u64,
    settlements_agreed: u64,
    settlements_arbitrated: u64,
    recoveries_performed: u64,
    failovers_performed: u64,
    breaker_rejections: u64,
    // Timestamps for windowed rates; pruned as they age out.
    tool_call_times: VecDeque<Timestamp>,
    error_times: VecDeque<Timestamp>,
}

/// Persisted snapshot of the collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub status: OverallStatus,
    pub tool_calls: u64,
    pub errors: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub task_success_rate: f64,
    pub p2p_requests: u64,
    pub p2p_failures: u64,
    pub settlements_agreed: u64,
    pub settlements_arbitrated: u64,
    pub recoveries_performed: u64,
    pub failovers_performed: u64,
    pub breaker_rejections: u64,
    pub snapshot_time: Timestamp,
}

pub struct MetricsCollector {
    inner: Mutex<Counters>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Counters::default()) }
    }

    pub fn record_tool_call(&self, now: Timestamp) {
        let mut c = self.lock();
        c.tool_calls += 1;
        c.tool_call_times.push_back(now);
        prune(&mut c.tool_call_times, now - 60);
    }

    pub fn record_error(&self, now: Timestamp) {
        let mut c = self.lock();
        c.errors += 1;
        c.error_times.push_back(now);
        prune(&mut c.error_times, now - 3_600);
    }

    pub fn record_task_completed(&self) {
        self.lock().tasks_completed += 1;
    }

    pub fn record_task_failed(&self) {
        self.lock().tasks_failed += 1;
    }

    pub fn record_p2p_request(&self, ok: bool) {
        let mut c = self.lock();
        c.p2p_requests += 1;
        if !ok {
            c.p2p_failures += 1;
        }
    }

    pub fn record_settlement_agreed(&self) {
        self.lock().settlements_agreed += 1;
    }

    pub fn record_settlement_arbitrated(&self) {
        self.lock().settlements_arbitrated += 1;
    }

    pub fn record_recovery(&self) {
        self.lock().recoveries_performed += 1;
    }

    pub fn record_failover(&self) {
        self.lock().failovers_performed += 1;
    }

    pub fn record_breaker_rejection(&self) {
        self.lock().breaker_rejections += 1;
    }

    /// Tool calls in the trailing minute.
    pub fn tool_call_rate_per_min(&self, now: Timestamp) -> f64 {
        let mut c = self.lock();
        prune(&mut c.tool_call_times, now - 60);
        c.tool_call_times.len() as f64
    }

    /// Errors in the trailing hour.
    pub fn error_rate_per_hour(&self, now: Timestamp) -> f64 {
        let mut c = self.lock();
        prune(&mut c.error_times, now - 3_600);
        c.error_times.len() as f64
    }

    pub fn failovers_performed(&self) -> u64 {
        self.lock().failovers_performed
    }

    /// Fraction of finished tasks that completed (1.0 when none finished).
    pub fn task_success_rate(&self) -> f64 {
        let c = self.lock();
        let finished = c.tasks_completed + c.tasks_failed;
        if finished == 0 {
            1.0
        } else {
            c.tasks_completed as f64 / finished as f64
        }
    }

    /// Build the externally visible snapshot.
    pub fn snapshot(
        &self,
        watchdog: HealthStatus,
        any_breaker_open: bool,
        recovery_in_progress: bool,
        now: Timestamp,
    ) -> MetricsSnapshot {
        let success_rate = self.task_success_rate();
        let status = derive_status(watchdog, any_breaker_open, recovery_in_progress, success_rate);
        let c = self.lock();
        MetricsSnapshot {
            status,
            tool_calls: c.tool_calls,
            errors: c.errors,
            tasks_completed: c.tasks_completed,
            tasks_failed: c.tasks_failed,
            task_success_rate: success_rate,
            p2p_requests: c.p2p_requests,
            p2p_failures: c.p2p_failures,
            settlements_agreed: c.settlements_agreed,
            settlements_arbitrated: c.settlements_arbitrated,
            recoveries_performed: c.recoveries_performed,
            failovers_performed: c.failovers_performed,
            breaker_rejections: c.breaker_rejections,
            snapshot_time: now,
        }
    }

    /// Persist a snapshot atomically.
    pub fn persist(&self, path: &Path, snapshot: &MetricsSnapshot) -> Result<(), WindwardError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(path, &bytes).map_err(|e| WindwardError::Io(format!("{}: {e}", path.display())))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.inner.lock().expect("metrics lock poisoned")
    }
}

fn prune(times: &mut VecDeque<Timestamp>, cutoff: Timestamp) {
    while times.front().is_some_and(|&t| t < cutoff) {
        times.pop_front();
    }
}

/// Derive the overall status from the latest watchdog result, breaker
/// states and task success rate.
pub fn derive_status(
    watchdog: HealthStatus,
    any_breaker_open: bool,
    recovery_in_progress: bool,
    task_success_rate: f64,
) -> OverallStatus {
    if recovery_in_progress {
        return OverallStatus::Recovering;
    }
    if watchdog == HealthStatus::Critical || task_success_rate < 0.5 {
        return OverallStatus::Unhealthy;
    }
    if watchdog != HealthStatus::Healthy || any_breaker_open {
        return OverallStatus::Degraded;
    }
    OverallStatus::Healthy
}
