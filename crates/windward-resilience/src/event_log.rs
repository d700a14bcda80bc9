//! Append-only resilience event log.
//!
//! One line per event: `ISO-timestamp | EVENT | message [| {json}]`.
//! Rotation is a rename once the file passes the size cap; concurrent
//! appenders are tolerated via OS append semantics.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use tracing::warn;

use windward_core::constants::LOG_ROTATE_BYTES;

// Well-known event names used across the crate.
pub const EVENT_TASK_RESUME: &str = "TASK_RESUME";
pub const EVENT_RECOVERY: &str = "RECOVERY";
pub const EVENT_FAILOVER: &str = "FAILOVER";
pub const EVENT_PROMOTION: &str = "PROMOTION";
pub const EVENT_BREAKER: &str = "BREAKER";
pub const EVENT_WATCHDOG: &str = "WATCHDOG";
pub const EVENT_SETTLEMENT: &str = "SETTLEMENT";
pub const EVENT_ARBITRATION: &str = "ARBITRATION";

pub struct ResilienceLog {
    path: PathBuf,
    max_bytes: u64,
    lock: Mutex<()>,
}

impl ResilienceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), max_bytes: LOG_ROTATE_BYTES, lock: Mutex::new(()) }
    }

    pub fn with_max_bytes(path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self { path: path.into(), max_bytes, lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event line. Logging failures are reported via tracing and
    /// otherwise swallowed — the log must never take the process down.
    pub fn log(&self, event: &str, message: &str) {
        self.append(event, message, None);
    }

    /// Append one event line with a structured JSON payload.
    pub fn log_with(&self, event: &str, message: &str, payload: &serde_json::Value) {
        self.append(event, message, Some(payload));
    }

    fn append(&self, event: &str, message: &str, payload: Option<&serde_json::Value>) {
        let _guard = self.lock.lock().expect("log lock poisoned");
        self.rotate_if_needed();

        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let line = match payload {
            Some(p) => format!("{ts} | {event} | {message} | {p}\n"),
            None => format!("{ts} | {event} | {message}\n"),
        };

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "event log append failed");
        }
    }

    fn rotate_if_needed(&self) {
        let len = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if len <= self.max_bytes {
            return;
        }
        let rotated = self.path.with_extension("log.1");
        if let Err(e) = std::fs::rename(&self.path, &rotated) {
            warn!(path = %self.path.display(), error = %e, "event log rotation failed");
        }
    }
}
