//! Read-only validation of intended state against actual state.
//!
//! Every operation returns a [`ValidationResult`]: confirmed drift is an
//! error, soft or unverifiable drift a warning. External failures are caught
//! per item and become "could not verify" warnings; only contract violations
//! (nil ids, empty external ids) surface as `Err(Error::InvalidInput)`.

mod assignments;
mod comprehensive;
mod credentials;
mod groups;
mod users;

use std::time::Duration;

use statesync_core::defaults::{
    MEMBERSHIP_RETRY_ATTEMPTS, MEMBERSHIP_RETRY_DELAY_MS, VALIDATION_USER_CONCURRENCY,
};
use statesync_core::Error;

use crate::context::EngineContext;

pub use assignments::diff_sets;
pub(crate) use credentials::{credential_secret_refs, fetch_secret};
pub(crate) use groups::distinct_ids;

/// Validator tuning.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Forward re-reads of a user's groups before reverse-checking.
    pub membership_retry_attempts: u32,
    /// Fixed delay between forward re-reads.
    pub membership_retry_delay: Duration,
    /// Users validated concurrently within one category.
    pub user_concurrency: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            membership_retry_attempts: MEMBERSHIP_RETRY_ATTEMPTS,
            membership_retry_delay: Duration::from_millis(MEMBERSHIP_RETRY_DELAY_MS),
            user_concurrency: VALIDATION_USER_CONCURRENCY,
        }
    }
}

impl ValidatorConfig {
    /// Create config from environment variables.
    ///
    /// - `MEMBERSHIP_RETRY_ATTEMPTS`: forward re-reads (default: 3)
    /// - `MEMBERSHIP_RETRY_DELAY_MS`: delay between re-reads (default: 2000)
    /// - `VALIDATION_USER_CONCURRENCY`: per-category user parallelism (default: 4)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            membership_retry_attempts: std::env::var("MEMBERSHIP_RETRY_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.membership_retry_attempts),
            membership_retry_delay: std::env::var("MEMBERSHIP_RETRY_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.membership_retry_delay),
            user_concurrency: std::env::var("VALIDATION_USER_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.user_concurrency),
        }
    }

    pub fn with_membership_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.membership_retry_attempts = attempts;
        self.membership_retry_delay = delay;
        self
    }

    pub fn with_user_concurrency(mut self, n: usize) -> Self {
        self.user_concurrency = n.max(1);
        self
    }
}

/// Read-only consistency checker.
#[derive(Clone)]
pub struct Validator {
    ctx: EngineContext,
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(ctx: EngineContext, config: ValidatorConfig) -> Self {
        Self { ctx, config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }
}

/// Warning text for an item an external failure kept us from checking.
pub(crate) fn unverified(what: impl std::fmt::Display, e: &Error) -> String {
    format!("could not verify {}: {}", what, e)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use statesync_core::mock::{InMemoryRecordStore, MockDirectory, MockSecretStore};

    use super::{Validator, ValidatorConfig};
    use crate::context::EngineContext;
    use crate::resilience::ResilienceConfig;

    pub struct Harness {
        pub store: InMemoryRecordStore,
        pub directory: MockDirectory,
        pub secrets: MockSecretStore,
        pub validator: Validator,
    }

    pub fn harness(directory: MockDirectory) -> Harness {
        let store = InMemoryRecordStore::new();
        let secrets = MockSecretStore::new();
        let ctx = EngineContext::new(
            Arc::new(store.clone()),
            Arc::new(directory.clone()),
            Arc::new(secrets.clone()),
            &ResilienceConfig::default(),
        );
        let validator = Validator::new(
            ctx,
            ValidatorConfig::default().with_membership_retry(3, Duration::from_millis(2_000)),
        );
        Harness {
            store,
            directory,
            secrets,
            validator,
        }
    }
}
