//! # statesync-core
//!
//! Core types, traits, and abstractions for the statesync reconciliation engine.
//!
//! This crate provides the record model shared by every other crate, the
//! result shapes produced by validation and repair, and the collaborator
//! traits (record store, directory, secret store) the engine is written
//! against.

pub mod defaults;
pub mod error;
pub mod logging;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod models;
pub mod secrets;
pub mod traits;
pub mod validation;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use secrets::{Secret, SecretReference, SecretRole};
pub use traits::*;
pub use validation::{
    ComprehensiveStateSyncResult, Diagnostic, DiagnosticValue, ResourceCategory, ValidationResult,
};
