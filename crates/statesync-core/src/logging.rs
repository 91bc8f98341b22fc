//! Structured logging schema and field name constants for statesync.
//!
//! All crates use these names for structured `tracing` fields so sweep
//! activity can be queried uniformly in log aggregation.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue: retry, open breaker, unverifiable item |
//! | INFO  | Lifecycle events, sweep and repair completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration (one group, one secret) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "directory", "secrets", "engine", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "validator", "repairer", "coordinator", "scheduler", "breaker"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "validate_all", "repair_collaboration_group", "group_exists"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Tenant UUID being reconciled.
pub const TENANT_ID: &str = "tenant_id";

/// Platform user UUID.
pub const USER_ID: &str = "user_id";

/// Directory object id of a user.
pub const EXTERNAL_ID: &str = "external_id";

/// Directory group id.
pub const GROUP_ID: &str = "group_id";

/// Credential record UUID.
pub const CREDENTIAL_ID: &str = "credential_id";

/// External service name a call policy is guarding.
pub const SERVICE: &str = "service";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Attempt number of a retried call (1-based).
pub const ATTEMPT: &str = "attempt";

/// Number of drift errors in a result.
pub const ERROR_COUNT: &str = "error_count";

/// Number of drift warnings in a result.
pub const WARNING_COUNT: &str = "warning_count";

/// Number of repair writes performed.
pub const REPAIR_COUNT: &str = "repair_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
