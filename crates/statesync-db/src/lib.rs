//! # statesync-db
//!
//! PostgreSQL record store for statesync.
//!
//! This crate provides:
//! - Connection pool management
//! - Idempotent schema initialization under an advisory lock
//! - Repository implementations for tenants, users, capability types,
//!   assignments, collaboration-group caches and credential records
//!
//! ## Example
//!
//! ```rust,ignore
//! use statesync_db::{Database, PoolConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect_with_config(
//!         "postgres://localhost/statesync",
//!         PoolConfig::from_env(),
//!     )
//!     .await?;
//!     db.ensure_schema().await?;
//!
//!     let tenants = db.tenants.list_active_ids().await?;
//!     println!("{} active tenants", tenants.len());
//!     Ok(())
//! }
//! ```
pub mod capability_types;
pub mod credentials;
pub mod pool;
pub mod schema;
pub mod tenants;
pub mod users;

// Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

pub use statesync_core::*;

pub use capability_types::{PgAssignmentRepository, PgCapabilityTypeRepository};
pub use credentials::PgCredentialRepository;
pub use pool::{create_pool, log_pool_health, PoolConfig};
pub use schema::{ensure_schema, SCHEMA_LOCK_ID};
pub use tenants::{PgCollaborationGroupRepository, PgTenantRepository};
pub use users::PgUserRepository;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub users: PgUserRepository,
    pub capability_types: PgCapabilityTypeRepository,
    pub assignments: PgAssignmentRepository,
    pub tenants: PgTenantRepository,
    pub collaboration_groups: PgCollaborationGroupRepository,
    pub credentials: PgCredentialRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            users: PgUserRepository::new(pool.clone()),
            capability_types: PgCapabilityTypeRepository::new(pool.clone()),
            assignments: PgAssignmentRepository::new(pool.clone()),
            tenants: PgTenantRepository::new(pool.clone()),
            collaboration_groups: PgCollaborationGroupRepository::new(pool.clone()),
            credentials: PgCredentialRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect to the record store at `url`.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool(url, &config).await?;
        Ok(Self::new(pool))
    }

    /// Create missing tables. See [`schema::ensure_schema`].
    pub async fn ensure_schema(&self) -> Result<()> {
        ensure_schema(&self.pool).await
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}

impl RecordStore for Database {
    fn users(&self) -> &dyn UserRepository {
        &self.users
    }
    fn capability_types(&self) -> &dyn CapabilityTypeRepository {
        &self.capability_types
    }
    fn assignments(&self) -> &dyn AssignmentRepository {
        &self.assignments
    }
    fn tenants(&self) -> &dyn TenantRepository {
        &self.tenants
    }
    fn collaboration_groups(&self) -> &dyn CollaborationGroupRepository {
        &self.collaboration_groups
    }
    fn credentials(&self) -> &dyn CredentialRepository {
        &self.credentials
    }
}
