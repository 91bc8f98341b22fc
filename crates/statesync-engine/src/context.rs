//! Shared handles to the three systems being reconciled.

use std::future::Future;
use std::sync::Arc;

use statesync_core::{DirectoryClient, RecordStore, Result, SecretStoreClient};

use crate::resilience::{CallPolicy, ResilienceConfig, ResilientDirectory, ResilientSecretStore};

/// Record store plus policy-wrapped directory and secret store clients.
///
/// Cloning is cheap; every clone shares the same circuit breakers.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn RecordStore>,
    pub directory: Arc<dyn DirectoryClient>,
    pub secrets: Arc<dyn SecretStoreClient>,
    records: CallPolicy,
}

impl EngineContext {
    /// Wrap the external clients in their call policies.
    pub fn new(
        store: Arc<dyn RecordStore>,
        directory: Arc<dyn DirectoryClient>,
        secrets: Arc<dyn SecretStoreClient>,
        config: &ResilienceConfig,
    ) -> Self {
        Self {
            store,
            directory: Arc::new(ResilientDirectory::new(
                directory,
                CallPolicy::new(config.directory.clone()),
            )),
            secrets: Arc::new(ResilientSecretStore::new(
                secrets,
                CallPolicy::new(config.secrets.clone()),
            )),
            records: CallPolicy::new(config.records.clone()),
        }
    }

    /// Run a record store call under the records policy.
    pub async fn record<T, F, Fut>(&self, op: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.records.call(op, operation).await
    }
}
