//! Sweep scheduling configuration.

use std::time::Duration;

use statesync_core::defaults::{
    SWEEP_CACHE_CAPACITY, SWEEP_CACHE_TTL_SECS, SWEEP_INTERVAL_SECS, SWEEP_TENANT_PAUSE_MS,
    SWEEP_TENANT_TIMEOUT_SECS,
};

/// Configuration for the sweep coordinator and background scheduler.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Whether the background loop runs at all.
    pub enabled: bool,
    /// Time between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Pause between two tenants within a cycle.
    pub tenant_pause: Duration,
    /// Upper bound on one tenant's sweep in the background loop.
    pub tenant_timeout: Duration,
    /// How long a cached result stays visible.
    pub cache_ttl: Duration,
    /// Maximum tenants kept in the result cache.
    pub cache_capacity: u64,
    /// Whether background sweeps repair drift.
    pub repair: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(SWEEP_INTERVAL_SECS),
            tenant_pause: Duration::from_millis(SWEEP_TENANT_PAUSE_MS),
            tenant_timeout: Duration::from_secs(SWEEP_TENANT_TIMEOUT_SECS),
            cache_ttl: Duration::from_secs(SWEEP_CACHE_TTL_SECS),
            cache_capacity: SWEEP_CACHE_CAPACITY,
            repair: false,
        }
    }
}

impl SweepConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `SWEEP_ENABLED` | `true` | Run the background loop |
    /// | `SWEEP_INTERVAL_SECS` | `900` | Pause between cycles |
    /// | `SWEEP_TENANT_PAUSE_MS` | `500` | Pause between tenants |
    /// | `SWEEP_TENANT_TIMEOUT_SECS` | `300` | Per-tenant sweep bound |
    /// | `SWEEP_CACHE_TTL_SECS` | `1800` | Cached result lifetime |
    /// | `SWEEP_REPAIR` | `false` | Repair drift in background sweeps |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let flag = |name: &str, default: bool| {
            std::env::var(name)
                .map(|v| {
                    let v = v.trim().to_ascii_lowercase();
                    v != "false" && v != "0"
                })
                .unwrap_or(default)
        };
        let number = |name: &str| std::env::var(name).ok().and_then(|v| v.parse::<u64>().ok());

        Self {
            enabled: flag("SWEEP_ENABLED", defaults.enabled),
            interval: number("SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            tenant_pause: number("SWEEP_TENANT_PAUSE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.tenant_pause),
            tenant_timeout: number("SWEEP_TENANT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.tenant_timeout),
            cache_ttl: number("SWEEP_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            cache_capacity: defaults.cache_capacity,
            repair: flag("SWEEP_REPAIR", defaults.repair),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_tenant_pause(mut self, pause: Duration) -> Self {
        self.tenant_pause = pause;
        self
    }

    pub fn with_tenant_timeout(mut self, timeout: Duration) -> Self {
        self.tenant_timeout = timeout;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_repair(mut self, repair: bool) -> Self {
        self.repair = repair;
        self
    }
}
