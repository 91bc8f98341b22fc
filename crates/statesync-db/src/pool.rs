//! Record store connection pool.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use statesync_core::{Error, Result};

/// Connections kept by the worker. Sweeps are sequential per tenant, so a
/// small pool covers one sweep's concurrent category reads.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Sizing and timeouts for the record store pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a caller waits for a free connection.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl PoolConfig {
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DB_MAX_CONNECTIONS` | `10` |
    /// | `DB_ACQUIRE_TIMEOUT_SECS` | `30` |
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
        {
            config = config.with_max_connections(n);
        }
        if let Some(secs) = std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config = config.with_acquire_timeout(Duration::from_secs(secs));
        }
        config
    }

    /// Also lowers `min_connections` so it never exceeds the maximum.
    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self.min_connections = self.min_connections.min(self.max_connections);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Connect a pool to the record store.
pub async fn create_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        duration_ms = start.elapsed().as_millis() as u64,
        "Record store pool connected"
    );
    Ok(pool)
}

/// Log pool occupancy, warning when every connection is checked out.
pub fn log_pool_health(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();
    if size > 0 && idle == 0 {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = size,
            "All record store connections busy"
        );
    } else {
        debug!(
            subsystem = "db",
            component = "pool",
            pool_size = size,
            pool_idle = idle,
            "Record store pool health"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_connections_clamps_minimum() {
        let config = PoolConfig::default().with_max_connections(0);
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.min_connections, 1);

        let config = PoolConfig {
            min_connections: 8,
            ..PoolConfig::default()
        }
        .with_max_connections(4);
        assert_eq!(config.min_connections, 4);
    }

    #[test]
    fn test_acquire_timeout_builder() {
        let config = PoolConfig::default().with_acquire_timeout(Duration::from_secs(5));
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
    }
}
