//! Fill rate limiting and cancellation scoring.
//!
//! The strategy itself is outside the core; these are the guardrails it
//! runs inside. Fills are admitted against a sliding-window counter, and
//! open bets are scored 0–100 for cancellation from deadline proximity,
//! partner health and fill pressure.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use windward_core::constants::{CANCEL_SCORE_THRESHOLD, FILL_WINDOW_SECS, MAX_FILLS_PER_WINDOW};
use windward_core::error::WindwardError;

/// Sliding-window fill counter.
pub struct FillRateLimiter {
    window: Duration,
    max_fills: u32,
    fills: Mutex<VecDeque<Instant>>,
}

impl Default for FillRateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(FILL_WINDOW_SECS), MAX_FILLS_PER_WINDOW)
    }
}

impl FillRateLimiter {
    pub fn new(window: Duration, max_fills: u32) -> Self {
        Self { window, max_fills, fills: Mutex::new(VecDeque::new()) }
    }

    /// Admit one fill, or reject with a policy error when the window is full.
    pub fn try_acquire(&self) -> Result<(), WindwardError> {
        let mut fills = self.fills.lock().expect("rate limiter lock poisoned");
        let cutoff = Instant::now() - self.window;
        while fills.front().is_some_and(|&t| t < cutoff) {
            fills.pop_front();
        }
        if fills.len() as u32 >= self.max_fills {
            return Err(WindwardError::RateLimited(format!(
                "{} fills in the last {:?}",
                fills.len(),
                self.window
            )));
        }
        fills.push_back(Instant::now());
        Ok(())
    }

    /// Window utilization in [0, 1].
    pub fn load(&self) -> f64 {
        let mut fills = self.fills.lock().expect("rate limiter lock poisoned");
        let cutoff = Instant::now() - self.window;
        while fills.front().is_some_and(|&t| t < cutoff) {
            fills.pop_front();
        }
        fills.len() as f64 / self.max_fills.max(1) as f64
    }
}

/// Inputs to the per-bet cancel score.
#[derive(Debug, Clone, Copy)]
pub struct CancelInputs {
    /// Seconds until the bet's resolution deadline.
    pub secs_to_deadline: i64,
    /// Full horizon of the bet (deadline − created-at).
    pub horizon_secs: i64,
    pub partner_healthy: bool,
    /// Fill-window utilization in [0, 1].
    pub fill_load: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CancelPolicy {
    pub threshold: u32,
}

impl Default for CancelPolicy {
    fn default() -> Self {
        Self { threshold: CANCEL_SCORE_THRESHOLD }
    }
}

impl CancelPolicy {
    /// Score a bet for cancellation, 0 (keep) to 100 (cancel now).
    /// An unhealthy partner contributes 40 points, deadline proximity up to
    /// 30, and fill pressure up to 30.
    pub fn score(&self, inputs: &CancelInputs) -> u32 {
        let mut score = 0.0;
        if !inputs.partner_healthy {
            score += 40.0;
        }

        let frac_remaining = if inputs.horizon_secs <= 0 {
            0.0
        } else {
            (inputs.secs_to_deadline.max(0) as f64 / inputs.horizon_secs as f64).min(1.0)
        };
        score += 30.0 * (1.0 - frac_remaining);

        score += 30.0 * inputs.fill_load.clamp(0.0, 1.0);

        (score.round() as u32).min(100)
    }

    pub fn should_cancel(&self, inputs: &CancelInputs) -> bool {
        self.score(inputs) >= self.threshold
    }
}
