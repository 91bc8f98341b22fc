//! Centralized default constants for statesync.
//!
//! **This module is the single source of truth** for shared default values.
//! Config structs in every crate fall back to these when the corresponding
//! environment variable is unset.

// =============================================================================
// DIRECTORY READ-PATH LAG
// =============================================================================

/// Forward membership re-reads before a missing membership is reverse-checked.
pub const MEMBERSHIP_RETRY_ATTEMPTS: u32 = 3;

/// Fixed delay between forward membership re-reads (milliseconds).
pub const MEMBERSHIP_RETRY_DELAY_MS: u64 = 2_000;

/// Maximum users validated concurrently within one category.
pub const VALIDATION_USER_CONCURRENCY: usize = 4;

// =============================================================================
// EXTERNAL CALL POLICY
// =============================================================================

/// Per-call timeout for directory calls (milliseconds).
pub const DIRECTORY_CALL_TIMEOUT_MS: u64 = 10_000;

/// Per-call timeout for secret store calls (milliseconds).
pub const SECRETS_CALL_TIMEOUT_MS: u64 = 10_000;

/// Per-call timeout for record store calls (milliseconds).
pub const RECORDS_CALL_TIMEOUT_MS: u64 = 5_000;

/// Attempts per external call, including the first.
pub const CALL_MAX_ATTEMPTS: u32 = 3;

/// Record store calls are not retried by the engine; the pool retries acquisition.
pub const RECORDS_MAX_ATTEMPTS: u32 = 1;

/// First retry delay (milliseconds); doubles per attempt.
pub const CALL_INITIAL_BACKOFF_MS: u64 = 200;

/// Upper bound for a single retry delay (milliseconds).
pub const CALL_MAX_BACKOFF_MS: u64 = 5_000;

/// Random jitter applied to each retry delay, as a fraction of the delay.
pub const CALL_BACKOFF_JITTER: f64 = 0.1;

// =============================================================================
// CIRCUIT BREAKER
// =============================================================================

/// Failure ratio within the sampling window that opens the breaker.
pub const BREAKER_FAILURE_RATIO: f64 = 0.5;

/// Minimum calls in the window before the ratio is evaluated.
pub const BREAKER_MINIMUM_THROUGHPUT: u32 = 10;

/// Sampling window length (seconds).
pub const BREAKER_SAMPLING_WINDOW_SECS: u64 = 60;

/// How long an open breaker short-circuits calls (seconds).
pub const BREAKER_BREAK_SECS: u64 = 30;

// =============================================================================
// SWEEP SCHEDULING
// =============================================================================

/// Interval between background sweep cycles (seconds).
pub const SWEEP_INTERVAL_SECS: u64 = 900;

/// Pause between tenants within one cycle (milliseconds).
pub const SWEEP_TENANT_PAUSE_MS: u64 = 500;

/// Upper bound on one tenant's sweep in the background loop (seconds).
pub const SWEEP_TENANT_TIMEOUT_SECS: u64 = 300;

/// How long a cached sweep result stays visible (seconds).
pub const SWEEP_CACHE_TTL_SECS: u64 = 1_800;

/// Maximum tenants kept in the result cache.
pub const SWEEP_CACHE_CAPACITY: u64 = 10_000;

/// Broadcast capacity for scheduler events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// SECRET TAGS
// =============================================================================

/// Tag naming the tenant that owns a secret.
pub const TAG_TENANT_ID: &str = "tenant_id";

/// Tag mirroring the owning credential's logical activation state.
pub const TAG_IS_ACTIVE: &str = "is_active";

/// Tags a consolidated credential secret must carry.
pub const CONSOLIDATED_REQUIRED_TAGS: &[&str] = &["engine", "server", "database", "username"];

// =============================================================================
// HTTP ADAPTERS
// =============================================================================

/// Default directory REST endpoint.
pub const DIRECTORY_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Default directory HTTP timeout (seconds).
pub const DIRECTORY_TIMEOUT_SECS: u64 = 30;

/// Default secret store API version.
pub const VAULT_API_VERSION: &str = "7.4";

/// Default secret store HTTP timeout (seconds).
pub const VAULT_TIMEOUT_SECS: u64 = 30;
