use thiserror::Error;

use crate::retry::{AttemptTimeout, Retryable};

#[derive(Debug, Error)]
pub enum WindwardError {
    // ── Transient transport ──────────────────────────────────────────────────
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("request timed out after {ms} ms")]
    Timeout { ms: u64 },

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    // ── Permanent protocol ───────────────────────────────────────────────────
    #[error("signature rejected")]
    SignatureRejected,

    #[error("invalid signature encoding: {0}")]
    MalformedSignature(String),

    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("commitment or proposal expired at {expiry}, now {now}")]
    Expired { expiry: i64, now: i64 },

    #[error("bet {0} is not active")]
    BetNotActive(u64),

    #[error("deadline for bet {bet_id} has not passed (deadline {deadline}, now {now})")]
    DeadlineNotPassed { bet_id: u64, deadline: i64, now: i64 },

    #[error("sender {0} is not a registered active bot")]
    UnknownSender(String),

    #[error("replayed message: {0}")]
    Replay(String),

    #[error("peer {0} has no known endpoint")]
    PeerUnreachable(String),

    // ── Policy denied ────────────────────────────────────────────────────────
    #[error("circuit '{0}' is open")]
    CircuitOpen(String),

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    // ── Data integrity (never auto-recovered) ────────────────────────────────
    #[error("missing trade list for bet {0}")]
    MissingTrades(u64),

    #[error("missing exit prices for bet {bet_id}: {missing} of {total} indices absent")]
    MissingExitPrices { bet_id: u64, missing: usize, total: usize },

    #[error("hash mismatch: {0}")]
    HashMismatch(String),

    #[error("invalid portfolio encoding: {0}")]
    InvalidPortfolio(String),

    // ── Internal ─────────────────────────────────────────────────────────────
    #[error("state file unreadable: {0}")]
    StateUnreadable(String),

    #[error("pid file corrupt: {0}")]
    PidFileCorrupt(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    // ── Carriers ─────────────────────────────────────────────────────────────
    #[error("chain call failed: {message}")]
    Chain { message: String, retryable: bool },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),
}

impl WindwardError {
    /// True for failures the retry envelope may re-attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            WindwardError::Transport(_) | WindwardError::Timeout { .. } => true,
            // 400/401 are protocol rejections; everything else is worth a retry.
            WindwardError::HttpStatus { status, .. } => !matches!(status, 400 | 401),
            WindwardError::Chain { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// True for failures that must surface to the operator, never be retried.
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            WindwardError::MissingTrades(_)
                | WindwardError::MissingExitPrices { .. }
                | WindwardError::HashMismatch(_)
        )
    }
}

impl Retryable for WindwardError {
    fn is_retryable(&self) -> bool {
        WindwardError::is_retryable(self)
    }
}

impl From<AttemptTimeout> for WindwardError {
    fn from(t: AttemptTimeout) -> Self {
        WindwardError::Timeout { ms: t.ms }
    }
}

impl From<std::io::Error> for WindwardError {
    fn from(e: std::io::Error) -> Self {
        WindwardError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for WindwardError {
    fn from(e: serde_json::Error) -> Self {
        WindwardError::Serialization(e.to_string())
    }
}
