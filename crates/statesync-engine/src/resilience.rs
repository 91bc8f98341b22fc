//! Call resilience: timeout, retry with backoff, and a per-service circuit
//! breaker, composed into one [`CallPolicy`] per external call type.
//!
//! The breaker opens when the failure ratio inside a sampling window reaches
//! a threshold (once a minimum number of calls has been seen), short-circuits
//! calls for a break duration, then lets a single trial call through.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use statesync_core::defaults::*;
use statesync_core::{DirectoryClient, Error, Result, Secret, SecretStoreClient};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Timeout, retry and breaker settings for one external service.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Service name used in logs and `CircuitOpen` errors.
    pub service: String,
    /// Timeout applied to each attempt.
    pub timeout: Duration,
    /// Attempts including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Fraction of each delay added or removed at random.
    pub jitter: f64,
    pub failure_ratio: f64,
    pub minimum_throughput: u32,
    pub sampling_window: Duration,
    pub break_duration: Duration,
}

impl PolicyConfig {
    pub fn with_defaults(service: &str, timeout_ms: u64, max_attempts: u32) -> Self {
        Self {
            service: service.to_string(),
            timeout: Duration::from_millis(timeout_ms),
            max_attempts,
            initial_backoff: Duration::from_millis(CALL_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(CALL_MAX_BACKOFF_MS),
            jitter: CALL_BACKOFF_JITTER,
            failure_ratio: BREAKER_FAILURE_RATIO,
            minimum_throughput: BREAKER_MINIMUM_THROUGHPUT,
            sampling_window: Duration::from_secs(BREAKER_SAMPLING_WINDOW_SECS),
            break_duration: Duration::from_secs(BREAKER_BREAK_SECS),
        }
    }

    /// Apply `<PREFIX>_CALL_TIMEOUT_MS`, `<PREFIX>_MAX_ATTEMPTS`,
    /// `<PREFIX>_BREAKER_FAILURE_RATIO` and `<PREFIX>_BREAKER_BREAK_SECS`.
    fn apply_env(mut self, prefix: &str) -> Self {
        fn var<T: std::str::FromStr>(name: String) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        }
        if let Some(ms) = var::<u64>(format!("{}_CALL_TIMEOUT_MS", prefix)) {
            self.timeout = Duration::from_millis(ms);
        }
        if let Some(n) = var::<u32>(format!("{}_MAX_ATTEMPTS", prefix)) {
            self.max_attempts = n.max(1);
        }
        if let Some(r) = var::<f64>(format!("{}_BREAKER_FAILURE_RATIO", prefix)) {
            self.failure_ratio = r.clamp(0.0, 1.0);
        }
        if let Some(s) = var::<u64>(format!("{}_BREAKER_BREAK_SECS", prefix)) {
            self.break_duration = Duration::from_secs(s);
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_breaker(
        mut self,
        failure_ratio: f64,
        minimum_throughput: u32,
        sampling_window: Duration,
        break_duration: Duration,
    ) -> Self {
        self.failure_ratio = failure_ratio;
        self.minimum_throughput = minimum_throughput;
        self.sampling_window = sampling_window;
        self.break_duration = break_duration;
        self
    }
}

/// One [`PolicyConfig`] per external call type.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub directory: PolicyConfig,
    pub secrets: PolicyConfig,
    pub records: PolicyConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            directory: PolicyConfig::with_defaults(
                "directory",
                DIRECTORY_CALL_TIMEOUT_MS,
                CALL_MAX_ATTEMPTS,
            ),
            secrets: PolicyConfig::with_defaults(
                "secrets",
                SECRETS_CALL_TIMEOUT_MS,
                CALL_MAX_ATTEMPTS,
            ),
            records: PolicyConfig::with_defaults(
                "records",
                RECORDS_CALL_TIMEOUT_MS,
                RECORDS_MAX_ATTEMPTS,
            ),
        }
    }
}

impl ResilienceConfig {
    /// Defaults overridden by `DIRECTORY_*`, `SECRETS_*` and `RECORDS_*`
    /// environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            directory: defaults.directory.apply_env("DIRECTORY"),
            secrets: defaults.secrets.apply_env("SECRETS"),
            records: defaults.records.apply_env("RECORDS"),
        }
    }
}

// =============================================================================
// CIRCUIT BREAKER
// =============================================================================

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls allowed.
    Closed,
    /// Failing fast, calls rejected.
    Open,
    /// Break elapsed, one trial call allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    window_start: Instant,
    calls: u32,
    failures: u32,
    opened_at: Option<Instant>,
    /// Set while a trial call is admitted and has not recorded an outcome.
    trial_started_at: Option<Instant>,
}

/// Failure-ratio circuit breaker.
///
/// - Closed -> Open: `failures / calls >= failure_ratio` with
///   `calls >= minimum_throughput` inside the current sampling window
/// - Open -> HalfOpen: `break_duration` elapsed; one trial call is admitted
/// - HalfOpen -> Closed: trial call succeeded
/// - HalfOpen -> Open: trial call failed
///
/// A trial call that never records (its future was dropped) stops blocking once
/// `trial_timeout` has passed; the next call is admitted as a fresh trial call.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    failure_ratio: f64,
    minimum_throughput: u32,
    sampling_window: Duration,
    break_duration: Duration,
    trial_timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            service: config.service.clone(),
            failure_ratio: config.failure_ratio,
            minimum_throughput: config.minimum_throughput.max(1),
            sampling_window: config.sampling_window,
            break_duration: config.break_duration,
            trial_timeout: config.timeout,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                window_start: Instant::now(),
                calls: 0,
                failures: 0,
                opened_at: None,
                trial_started_at: None,
            }),
        }
    }

    /// Current state, without admitting a trial call.
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Admit a call or fail fast with [`Error::CircuitOpen`].
    pub async fn acquire(&self) -> Result<()> {
        let mut s = self.inner.lock().await;
        match s.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = s.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.break_duration {
                    s.state = CircuitState::HalfOpen;
                    s.trial_started_at = Some(Instant::now());
                    debug!(
                        subsystem = "engine",
                        component = "breaker",
                        service = %self.service,
                        "Circuit half-open, admitting trial call"
                    );
                    Ok(())
                } else {
                    Err(Error::CircuitOpen(self.service.clone()))
                }
            }
            CircuitState::HalfOpen => match s.trial_started_at {
                Some(started) if started.elapsed() < self.trial_timeout => {
                    Err(Error::CircuitOpen(self.service.clone()))
                }
                Some(_) => {
                    debug!(
                        subsystem = "engine",
                        component = "breaker",
                        service = %self.service,
                        "Trial call abandoned without an outcome, admitting another"
                    );
                    s.trial_started_at = Some(Instant::now());
                    Ok(())
                }
                None => {
                    s.trial_started_at = Some(Instant::now());
                    Ok(())
                }
            },
        }
    }

    /// Record the outcome of an admitted call.
    pub async fn record(&self, success: bool) {
        let mut s = self.inner.lock().await;
        match s.state {
            CircuitState::Closed => {
                if s.window_start.elapsed() >= self.sampling_window {
                    s.window_start = Instant::now();
                    s.calls = 0;
                    s.failures = 0;
                }
                s.calls += 1;
                if !success {
                    s.failures += 1;
                }
                let ratio = s.failures as f64 / s.calls as f64;
                if s.calls >= self.minimum_throughput && ratio >= self.failure_ratio {
                    s.state = CircuitState::Open;
                    s.opened_at = Some(Instant::now());
                    warn!(
                        subsystem = "engine",
                        component = "breaker",
                        service = %self.service,
                        calls = s.calls,
                        failures = s.failures,
                        "Circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                s.trial_started_at = None;
                if success {
                    s.state = CircuitState::Closed;
                    s.window_start = Instant::now();
                    s.calls = 0;
                    s.failures = 0;
                    s.opened_at = None;
                    info!(
                        subsystem = "engine",
                        component = "breaker",
                        service = %self.service,
                        "Circuit closed after successful trial call"
                    );
                } else {
                    s.state = CircuitState::Open;
                    s.opened_at = Some(Instant::now());
                    warn!(
                        subsystem = "engine",
                        component = "breaker",
                        service = %self.service,
                        "Circuit trial call failed, reopening"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }
}

// =============================================================================
// CALL POLICY
// =============================================================================

/// Timeout + retry + breaker for one service.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    config: PolicyConfig,
    breaker: Arc<CircuitBreaker>,
}

impl CallPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(&config));
        Self { config, breaker }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Delay before attempt `attempt + 1` (attempt is 1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.initial_backoff.as_millis() as f64
            * 2f64.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.config.max_backoff.as_millis() as f64);
        let factor = if self.config.jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-self.config.jitter..=self.config.jitter)
        } else {
            1.0
        };
        Duration::from_millis((capped * factor).max(0.0) as u64)
    }

    /// Run `operation` under the policy.
    ///
    /// Transient failures (see [`Error::is_transient`]) are retried with
    /// exponential backoff; anything else, and an open circuit, returns
    /// immediately.
    pub async fn call<T, F, Fut>(&self, op: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.breaker.acquire().await?;

            let outcome = match tokio::time::timeout(self.config.timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "{} {} after {}ms",
                    self.config.service,
                    op,
                    self.config.timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(value) => {
                    self.breaker.record(true).await;
                    if attempt > 1 {
                        info!(
                            subsystem = "engine",
                            component = "policy",
                            service = %self.config.service,
                            op,
                            attempt,
                            "Call resolved after {} attempts",
                            attempt
                        );
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let transient = e.is_transient();
                    self.breaker.record(!transient).await;
                    if !transient || attempt >= self.config.max_attempts {
                        return Err(e);
                    }
                    let delay = self.backoff(attempt);
                    warn!(
                        subsystem = "engine",
                        component = "policy",
                        service = %self.config.service,
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

// =============================================================================
// RESILIENT DECORATORS
// =============================================================================

/// Directory client with every call wrapped in a [`CallPolicy`].
pub struct ResilientDirectory {
    inner: Arc<dyn DirectoryClient>,
    policy: CallPolicy,
}

impl ResilientDirectory {
    pub fn new(inner: Arc<dyn DirectoryClient>, policy: CallPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &CallPolicy {
        &self.policy
    }
}

#[async_trait]
impl DirectoryClient for ResilientDirectory {
    async fn group_exists(&self, group_id: &str) -> Result<bool> {
        self.policy
            .call("group_exists", || self.inner.group_exists(group_id))
            .await
    }

    async fn get_user_groups(&self, user_external_id: &str) -> Result<Vec<String>> {
        self.policy
            .call("get_user_groups", || {
                self.inner.get_user_groups(user_external_id)
            })
            .await
    }

    async fn get_group_members(&self, group_id: &str) -> Result<Vec<String>> {
        self.policy
            .call("get_group_members", || self.inner.get_group_members(group_id))
            .await
    }

    async fn add_user_to_group(&self, user_external_id: &str, group_id: &str) -> Result<()> {
        self.policy
            .call("add_user_to_group", || {
                self.inner.add_user_to_group(user_external_id, group_id)
            })
            .await
    }

    async fn remove_user_from_group(
        &self,
        user_external_id: &str,
        group_id: &str,
    ) -> Result<()> {
        self.policy
            .call("remove_user_from_group", || {
                self.inner.remove_user_from_group(user_external_id, group_id)
            })
            .await
    }
}

/// Secret store client with every call wrapped in a [`CallPolicy`].
pub struct ResilientSecretStore {
    inner: Arc<dyn SecretStoreClient>,
    policy: CallPolicy,
}

impl ResilientSecretStore {
    pub fn new(inner: Arc<dyn SecretStoreClient>, policy: CallPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &CallPolicy {
        &self.policy
    }
}

#[async_trait]
impl SecretStoreClient for ResilientSecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>> {
        self.policy
            .call("get_secret", || self.inner.get_secret(name))
            .await
    }

    async fn get_secret_with_tags(&self, name: &str) -> Result<Option<Secret>> {
        self.policy
            .call("get_secret_with_tags", || self.inner.get_secret_with_tags(name))
            .await
    }

    async fn get_secret_version(&self, name: &str, version: &str) -> Result<Option<Secret>> {
        self.policy
            .call("get_secret_version", || {
                self.inner.get_secret_version(name, version)
            })
            .await
    }

    async fn set_secret(
        &self,
        name: &str,
        value: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.policy
            .call("set_secret", || self.inner.set_secret(name, value, tags))
            .await
    }

    async fn update_secret_tags(
        &self,
        name: &str,
        version: Option<&str>,
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.policy
            .call("update_secret_tags", || {
                self.inner.update_secret_tags(name, version, tags)
            })
            .await
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        self.policy
            .call("delete_secret", || self.inner.delete_secret(name))
            .await
    }

    async fn purge_secret(&self, name: &str) -> Result<()> {
        self.policy
            .call("purge_secret", || self.inner.purge_secret(name))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> CallPolicy {
        CallPolicy::new(
            PolicyConfig::with_defaults("test", 1_000, max_attempts).with_breaker(
                0.5,
                4,
                Duration::from_secs(60),
                Duration::from_secs(30),
            ),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = policy(3)
            .call("op", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Directory("503: busy".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_failure_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = policy(3)
            .call("op", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Directory("403: forbidden".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let result: Result<()> = policy(1)
            .call("op", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_on_failure_ratio_and_recovers() {
        let policy = policy(1);
        for _ in 0..4 {
            let _: Result<()> = policy
                .call("op", || async { Err(Error::Request("reset".into())) })
                .await;
        }
        assert_eq!(policy.breaker().state().await, CircuitState::Open);

        let short: Result<()> = policy.call("op", || async { Ok(()) }).await;
        assert!(matches!(short, Err(Error::CircuitOpen(ref s)) if s == "test"));

        tokio::time::advance(Duration::from_secs(31)).await;
        policy.call("op", || async { Ok(()) }).await.unwrap();
        assert_eq!(policy.breaker().state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_ignores_ratio_below_minimum_throughput() {
        let policy = policy(1);
        for _ in 0..3 {
            let _: Result<()> = policy
                .call("op", || async { Err(Error::Request("reset".into())) })
                .await;
        }
        assert_eq!(policy.breaker().state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_call_reopens() {
        let policy = policy(1);
        for _ in 0..4 {
            let _: Result<()> = policy
                .call("op", || async { Err(Error::Request("reset".into())) })
                .await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        let _: Result<()> = policy
            .call("op", || async { Err(Error::Request("still down".into())) })
            .await;
        assert_eq!(policy.breaker().state().await, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_call_does_not_wedge_breaker() {
        let policy = policy(1);
        for _ in 0..4 {
            let _: Result<()> = policy
                .call("op", || async { Err(Error::Request("reset".into())) })
                .await;
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        let cancelled = tokio::time::timeout(
            Duration::from_millis(100),
            policy.call("op", || async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            }),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(policy.breaker().state().await, CircuitState::HalfOpen);

        // The abandoned trial call still blocks until the call timeout has passed.
        let blocked: Result<()> = policy.call("op", || async { Ok(()) }).await;
        assert!(matches!(blocked, Err(Error::CircuitOpen(_))));

        tokio::time::advance(Duration::from_secs(1)).await;
        policy.call("op", || async { Ok(()) }).await.unwrap();
        assert_eq!(policy.breaker().state().await, CircuitState::Closed);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = CallPolicy::new(PolicyConfig {
            jitter: 0.0,
            ..PolicyConfig::with_defaults("t", 1_000, 5)
        });
        assert_eq!(policy.backoff(1), Duration::from_millis(CALL_INITIAL_BACKOFF_MS));
        assert_eq!(
            policy.backoff(2),
            Duration::from_millis(CALL_INITIAL_BACKOFF_MS * 2)
        );
        assert_eq!(policy.backoff(20), Duration::from_millis(CALL_MAX_BACKOFF_MS));
    }

    #[test]
    fn test_default_records_policy_is_single_attempt() {
        let config = ResilienceConfig::default();
        assert_eq!(config.records.max_attempts, RECORDS_MAX_ATTEMPTS);
        assert_eq!(config.directory.max_attempts, CALL_MAX_ATTEMPTS);
    }
}
