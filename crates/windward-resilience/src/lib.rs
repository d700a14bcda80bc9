//! windward-resilience
//!
//! The resilience envelope around the betting core: per-dependency circuit
//! breakers, the watchdog and its progressive recovery ladder, the
//! crash-resumable task queue, the atomically persisted extended state, the
//! append-only event log with aggregated metrics, and the hot-standby
//! backup agent.

pub mod backup;
pub mod breaker;
pub mod event_log;
pub mod fsutil;
pub mod metrics;
pub mod recovery;
pub mod state_store;
pub mod task_queue;
pub mod watchdog;

pub use backup::{BackupAgent, BackupConfig, BackupMode, ProcProbe, ProcessProbe, PromotionEvent};
pub use breaker::{BreakerConfig, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use event_log::ResilienceLog;
pub use metrics::{MetricsCollector, MetricsSnapshot, OverallStatus};
pub use recovery::{RecoveryLadder, RecoveryLevel};
pub use state_store::{ExtendedState, Phase, StateStore};
pub use task_queue::{RecoveredTask, Task, TaskQueue, TaskStatus};
pub use watchdog::{
    classify, HealthAction, HealthAssessment, HealthSnapshot, HealthSource, HealthStatus,
    RecoveryHandler, Watchdog, WatchdogThresholds,
};
