//! # statesync-clients
//!
//! REST adapters for the external systems statesync reconciles against.
//!
//! - [`GraphDirectoryClient`]: directory service (groups and memberships)
//! - [`KeyVaultSecretClient`]: secret store (secret versions and tags)
//!
//! Both map failures to `"<status>: <detail>"` messages so
//! [`Error::is_transient`](statesync_core::Error::is_transient) can classify
//! them for retry.

pub mod graph;
pub mod keyvault;
pub mod types;

pub use graph::{GraphConfig, GraphDirectoryClient};
pub use keyvault::{KeyVaultConfig, KeyVaultSecretClient};
