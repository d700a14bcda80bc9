use thiserror::Error;

use windward_core::error::WindwardError;
use windward_core::retry::{AttemptTimeout, Retryable};

/// Typed failure of a chain-adapter call.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Local shortfall: gas or token balance. Not retryable as-is.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Signature or nonce rejected. Permanent for the current nonce.
    #[error("rejected by chain: {0}")]
    Rejected(String),

    /// Contract-level revert with the extracted reason string. Permanent
    /// for the same inputs.
    #[error("contract reverted: {0}")]
    Reverted(String),

    /// Transport failure or node unavailability. Retryable.
    #[error("chain transport failure: {0}")]
    Transport(String),

    /// A single attempt exceeded its deadline. Retryable.
    #[error("chain request timed out after {ms} ms")]
    Timeout { ms: u64 },

    /// The node answered with something we cannot interpret.
    #[error("malformed chain response: {0}")]
    BadResponse(String),

    /// The chain breaker is open; the call was never attempted.
    #[error("circuit open: {0}")]
    CircuitOpen(String),
}

impl ChainError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Transport(_) | ChainError::Timeout { .. })
    }
}

impl Retryable for ChainError {
    fn is_retryable(&self) -> bool {
        ChainError::is_retryable(self)
    }
}

impl From<AttemptTimeout> for ChainError {
    fn from(t: AttemptTimeout) -> Self {
        ChainError::Timeout { ms: t.ms }
    }
}

impl From<ChainError> for WindwardError {
    fn from(e: ChainError) -> Self {
        let retryable = e.is_retryable();
        WindwardError::Chain { message: e.to_string(), retryable }
    }
}

/// Classify a JSON-RPC error object returned by the chain gateway.
pub(crate) fn classify_rpc_error(code: i64, message: &str) -> ChainError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("insufficient") {
        return ChainError::InsufficientFunds(message.to_string());
    }
    if lower.contains("nonce") || lower.contains("signature") {
        return ChainError::Rejected(message.to_string());
    }
    if let Some(idx) = lower.find("execution reverted") {
        // Extract the reason after the marker, if the node included one.
        let tail = message[idx + "execution reverted".len()..]
            .trim_start_matches([':', ' ']);
        let reason = if tail.is_empty() { message } else { tail };
        return ChainError::Reverted(reason.to_string());
    }
    if lower.contains("revert") {
        return ChainError::Reverted(message.to_string());
    }
    ChainError::BadResponse(format!("rpc error {code}: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revert_reason_is_extracted() {
        let e = classify_rpc_error(3, "execution reverted: BetNotActive");
        assert!(matches!(e, ChainError::Reverted(ref r) if r == "BetNotActive"));
    }

    #[test]
    fn nonce_and_signature_failures_are_permanent() {
        assert!(!classify_rpc_error(-32000, "invalid nonce").is_retryable());
        assert!(!classify_rpc_error(-32000, "bad signature recovery").is_retryable());
    }

    #[test]
    fn only_transport_class_retries() {
        assert!(ChainError::Transport("connect refused".into()).is_retryable());
        assert!(ChainError::Timeout { ms: 5_000 }.is_retryable());
        assert!(!ChainError::InsufficientFunds("gas".into()).is_retryable());
        assert!(!ChainError::Reverted("r".into()).is_retryable());
    }
}
