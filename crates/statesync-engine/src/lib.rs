//! # statesync-engine
//!
//! Validation and repair for statesync.
//!
//! The [`Validator`] compares intended state in the record store with actual
//! state in the directory and the secret store and reports drift without
//! writing anything. The [`Repairer`] pushes copies back toward their
//! canonical source. Both reach external services through an
//! [`EngineContext`], whose clients are wrapped in a [`CallPolicy`]
//! (timeout, retry with backoff, circuit breaker).

pub mod context;
pub mod repairer;
pub mod resilience;
pub mod validator;

pub use context::EngineContext;
pub use repairer::{RepairOutcome, Repairer};
pub use resilience::{
    CallPolicy, CircuitBreaker, CircuitState, PolicyConfig, ResilienceConfig, ResilientDirectory,
    ResilientSecretStore,
};
pub use validator::{diff_sets, Validator, ValidatorConfig};
