//! Error types for statesync.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using statesync's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for statesync operations.
///
/// Drift is never reported through this type; drift lands in a
/// [`ValidationResult`](crate::ValidationResult). These variants describe
/// operations that could not complete.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Tenant not found
    #[error("Tenant not found: {0}")]
    TenantNotFound(Uuid),

    /// User not found
    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    /// Directory service call failed
    #[error("Directory error: {0}")]
    Directory(String),

    /// Secret store call failed
    #[error("Secret store error: {0}")]
    SecretStore(String),

    /// External call exceeded its timeout
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Circuit breaker for a service is open
    #[error("Circuit open for {0}")]
    CircuitOpen(String),

    /// A sweep for this tenant is already in flight
    #[error("Sweep already running for tenant {0}")]
    SweepAlreadyRunning(Uuid),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input (programming-contract violation)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same call may succeed.
    ///
    /// Open circuits and contract violations are never transient; the caller
    /// must not spend retry budget on them.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Request(_) => true,
            Error::Directory(msg) | Error::SecretStore(msg) => is_transient_status(msg),
            Error::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

/// Status-bearing adapter messages are formatted as `"<status>: <detail>"`.
fn is_transient_status(msg: &str) -> bool {
    let status = msg
        .split(|c: char| !c.is_ascii_digit())
        .find(|s| s.len() == 3)
        .and_then(|s| s.parse::<u16>().ok());
    match status {
        Some(code) => code == 429 || code == 408 || (500..600).contains(&code),
        // No status means the request itself failed (connect, reset).
        None => true,
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}
