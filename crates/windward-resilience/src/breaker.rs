//! Per-dependency circuit breaker.
//!
//! CLOSED → OPEN when consecutive failures reach the threshold; OPEN →
//! HALF_OPEN automatically once the cooldown has elapsed since the last
//! failure; HALF_OPEN → CLOSED after enough consecutive successes, and back
//! to OPEN on any failure. While OPEN, calls are rejected with a typed
//! circuit-open error unless the caller supplied a fallback.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use windward_core::constants::{
    BREAKER_COOLDOWN_SECS, BREAKER_FAILURE_THRESHOLD, BREAKER_SUCCESS_THRESHOLD,
};
use windward_core::error::WindwardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn label(&self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: BREAKER_FAILURE_THRESHOLD,
            cooldown: Duration::from_secs(BREAKER_COOLDOWN_SECS),
            success_threshold: BREAKER_SUCCESS_THRESHOLD,
        }
    }
}

/// Externally visible counters and state for one breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: String,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub times_opened: u64,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
    total_calls: u64,
    total_failures: u64,
    total_successes: u64,
    times_opened: u64,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                last_failure: None,
                total_calls: 0,
                total_failures: 0,
                total_successes: 0,
                times_opened: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Admit or reject a call. An OPEN breaker whose cooldown has elapsed
    /// transitions to HALF_OPEN and admits the probe.
    pub fn admit(&self) -> Result<(), WindwardError> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.total_calls += 1;
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let cooled = inner
                    .last_failure
                    .map(|t| t.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if cooled {
                    self.transition(&mut inner, BreakerState::HalfOpen, "cooldown elapsed");
                    Ok(())
                } else {
                    Err(WindwardError::CircuitOpen(self.name.clone()))
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.total_successes += 1;
        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    self.transition(&mut inner, BreakerState::Closed, "probe succeeded");
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.total_failures += 1;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, BreakerState::Open, "failure threshold reached");
                }
            }
            BreakerState::HalfOpen => {
                self.transition(&mut inner, BreakerState::Open, "probe failed");
            }
            BreakerState::Open => {}
        }
    }

    /// Run `op` through the breaker.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, WindwardError>
    where
        E: Into<WindwardError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit()?;
        match op().await {
            Ok(v) => {
                self.record_success();
                Ok(v)
            }
            Err(e) => {
                self.record_failure();
                Err(e.into())
            }
        }
    }

    /// Like [`call`], but an OPEN rejection yields `fallback` instead of an
    /// error. Real failures still surface.
    pub async fn call_or<T, E, F, Fut>(&self, fallback: T, op: F) -> Result<T, WindwardError>
    where
        E: Into<WindwardError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.call(op).await {
            Err(WindwardError::CircuitOpen(name)) => {
                warn!(breaker = %name, "circuit open, returning fallback");
                Ok(fallback)
            }
            other => other,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state.label().to_string(),
            consecutive_failures: inner.consecutive_failures,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            times_opened: inner.times_opened,
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState, reason: &str) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        match to {
            BreakerState::Open => {
                inner.times_opened += 1;
                inner.half_open_successes = 0;
            }
            BreakerState::HalfOpen => inner.half_open_successes = 0,
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
                inner.half_open_successes = 0;
            }
        }
        info!(
            breaker = %self.name,
            from = from.label(),
            to = to.label(),
            %reason,
            "breaker transition"
        );
    }
}
