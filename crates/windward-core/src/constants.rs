//! ─── Windward Protocol Constants ─────────────────────────────────────────────
//!
//! Collateral token: WIND (18 decimals on-chain; all amounts are base units).
//! Every tunable below is the documented default; the node config may override
//! it from the environment knobs it reads at startup.

// ── Collateral ───────────────────────────────────────────────────────────────

/// 1 WIND expressed in base units.
pub const BASE_UNITS_PER_WIND: u128 = 1_000_000_000_000_000_000;

/// Protocol fee on the settled pot, in basis points (fee = pot · bps / 10_000).
pub const PROTOCOL_FEE_BPS: u128 = 100;

// ── P2P transport ────────────────────────────────────────────────────────────

/// Outbound attempts per P2P request (first try included).
pub const P2P_MAX_RETRIES: u32 = 3;

/// Base backoff delay between attempts; doubles per retry.
pub const P2P_BASE_DELAY_MS: u64 = 200;

/// Backoff delay ceiling.
pub const P2P_MAX_DELAY_MS: u64 = 2_000;

/// Per-attempt request timeout.
pub const P2P_TIMEOUT_MS: u64 = 5_000;

// ── Peer discovery ───────────────────────────────────────────────────────────

/// How long a registry snapshot stays fresh before a re-read.
pub const DISCOVERY_CACHE_TTL_MS: u64 = 60_000;

/// Per-peer health probe timeout.
pub const HEALTH_CHECK_TIMEOUT_MS: u64 = 5_000;

/// Concurrent health probes in flight at once.
pub const HEALTH_CHECK_CONCURRENCY: usize = 10;

// ── Circuit breaker ──────────────────────────────────────────────────────────

/// Consecutive failures that trip CLOSED → OPEN.
pub const BREAKER_FAILURE_THRESHOLD: u32 = 3;

/// Cooldown after the last failure before OPEN → HALF_OPEN.
pub const BREAKER_COOLDOWN_SECS: u64 = 60;

/// Consecutive HALF_OPEN successes required to close.
pub const BREAKER_SUCCESS_THRESHOLD: u32 = 1;

// ── Watchdog ─────────────────────────────────────────────────────────────────

/// Sampling interval for the watchdog ticker.
pub const WATCHDOG_INTERVAL_SECS: u64 = 60;

/// Heartbeat older than this is CRITICAL.
pub const HEARTBEAT_STALE_SECS: i64 = 600;

/// Tool-call rate above this per minute is WARNING.
pub const TOOL_CALL_RATE_MAX_PER_MIN: f64 = 60.0;

/// No output for this long is STUCK.
pub const OUTPUT_STALL_SECS: i64 = 300;

/// Per-phase elapsed-time budgets (seconds).
pub const PHASE_TIMEOUT_RESEARCH_SECS: i64 = 900;
pub const PHASE_TIMEOUT_EVALUATION_SECS: i64 = 600;
pub const PHASE_TIMEOUT_EXECUTION_SECS: i64 = 300;

/// Error rate above this per hour is DEGRADED.
pub const ERROR_RATE_MAX_PER_HOUR: f64 = 10.0;

/// Recovery attempt counter resets after this much quiet time.
pub const RECOVERY_RESET_SECS: i64 = 3_600;

// ── Backup agent ─────────────────────────────────────────────────────────────

/// Primary-state replication interval for the standby.
pub const BACKUP_REPLICATION_INTERVAL_SECS: u64 = 30;

/// Primary liveness probe interval for the standby.
pub const BACKUP_LIVENESS_INTERVAL_SECS: u64 = 10;

// ── Persistence ──────────────────────────────────────────────────────────────

/// Event log rotates past this size.
pub const LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;

// ── Settlement ───────────────────────────────────────────────────────────────

/// Outbound attempts for a settlement proposal exchange.
pub const SETTLEMENT_MAX_RETRIES: u32 = 3;

/// Per-attempt timeout for the proposal exchange.
pub const SETTLEMENT_P2P_TIMEOUT_MS: u64 = 10_000;

/// Overall budget for the arbitration request path.
pub const SETTLEMENT_ARBITRATION_TIMEOUT_MS: u64 = 30_000;

/// Lifetime of an outbound settlement proposal.
pub const SETTLEMENT_PROPOSAL_EXPIRY_SECS: i64 = 300;

/// Exit-price cache TTL per (bet, snapshot).
pub const EXIT_PRICE_CACHE_TTL_SECS: u64 = 300;

// ── Rate limiting / cancellation ─────────────────────────────────────────────

/// Sliding window over which fills are counted.
pub const FILL_WINDOW_SECS: u64 = 60;

/// Maximum fills admitted per window.
pub const MAX_FILLS_PER_WINDOW: u32 = 20;

/// Cancel is advised at or above this score (0–100).
pub const CANCEL_SCORE_THRESHOLD: u32 = 70;
