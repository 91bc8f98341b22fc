//! Idempotent schema initialization.
//!
//! `ensure_schema` is run once at startup. Concurrent workers serialize on a
//! session-level advisory lock held on one dedicated connection, so the DDL
//! below never races with itself.

use std::time::Instant;

use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgPool, Postgres};
use tracing::{debug, info, warn};

use statesync_core::{Error, Result};

/// Advisory lock key for schema initialization ("statesyn" in ASCII).
pub const SCHEMA_LOCK_ID: i64 = 0x7374_6174_6573_796e;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tenant (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        collaboration_group_id TEXT,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS collaboration_group (
        id UUID PRIMARY KEY,
        tenant_id UUID NOT NULL UNIQUE REFERENCES tenant(id),
        group_id TEXT NOT NULL,
        display_name TEXT NOT NULL,
        description TEXT,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS app_user (
        id UUID PRIMARY KEY,
        external_id TEXT NOT NULL UNIQUE,
        tenant_id UUID NOT NULL REFERENCES tenant(id),
        email TEXT NOT NULL,
        display_name TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active',
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        capability_type_ids UUID[] NOT NULL DEFAULT '{}',
        legacy_capability_type_ids UUID[] NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_app_user_tenant ON app_user (tenant_id) WHERE is_active",
    r#"
    CREATE TABLE IF NOT EXISTS capability_type (
        id UUID PRIMARY KEY,
        tenant_id UUID NOT NULL REFERENCES tenant(id),
        name TEXT NOT NULL,
        security_group_id TEXT,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        display_order INTEGER NOT NULL DEFAULT 0,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS capability_assignment (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES app_user(id),
        tenant_id UUID NOT NULL REFERENCES tenant(id),
        capability_type_id UUID NOT NULL REFERENCES capability_type(id),
        security_group_id TEXT,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        assigned_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_capability_assignment_user ON capability_assignment (user_id, tenant_id) WHERE is_active",
    r#"
    CREATE TABLE IF NOT EXISTS db_credential (
        id UUID PRIMARY KEY,
        tenant_id UUID NOT NULL REFERENCES tenant(id),
        name TEXT NOT NULL,
        engine TEXT NOT NULL,
        password_secret_ref TEXT NOT NULL,
        connection_string_secret_ref TEXT NOT NULL,
        consolidated_secret_ref TEXT,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];

/// Create every table and index if missing.
///
/// Safe to call from several processes at once: the statements run while
/// holding `pg_advisory_lock(SCHEMA_LOCK_ID)` on a single connection.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    let start = Instant::now();
    let mut conn = pool.acquire().await.map_err(Error::Database)?;

    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(SCHEMA_LOCK_ID)
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?;
    debug!(
        subsystem = "db",
        component = "schema",
        op = "lock_acquired",
        "Schema lock acquired"
    );

    let mut outcome = Ok(());
    for statement in STATEMENTS {
        if let Err(e) = sqlx::query(statement).execute(&mut *conn).await {
            outcome = Err(Error::Database(e));
            break;
        }
    }

    // Release before surfacing any DDL failure.
    release_schema_lock(conn).await?;
    outcome?;

    info!(
        subsystem = "db",
        component = "schema",
        op = "ensure",
        statements = STATEMENTS.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Schema ensured"
    );
    Ok(())
}

/// Unlock and hand the connection back to the pool. If the unlock fails the
/// connection is detached and closed instead, since ending the session is
/// the only other way to drop a session-level advisory lock.
async fn release_schema_lock(mut conn: PoolConnection<Postgres>) -> Result<()> {
    match sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(SCHEMA_LOCK_ID)
        .execute(&mut *conn)
        .await
    {
        Ok(_) => Ok(()),
        Err(e) => {
            warn!(
                subsystem = "db",
                component = "schema",
                op = "unlock",
                error = %e,
                "Schema unlock failed, closing the lock-holding connection"
            );
            let _ = conn.detach().close().await;
            Err(Error::Database(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::DEFAULT_TEST_DATABASE_URL;
    use crate::{create_pool, PoolConfig};

    async fn pool(max: u32) -> PgPool {
        let url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_TEST_DATABASE_URL.to_string());
        create_pool(&url, &PoolConfig::default().with_max_connections(max))
            .await
            .expect("Failed to create test database pool")
    }

    async fn try_lock(pool: &PgPool) -> bool {
        let mut conn = pool.acquire().await.unwrap();
        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(SCHEMA_LOCK_ID)
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        if locked {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(SCHEMA_LOCK_ID)
                .execute(&mut *conn)
                .await
                .unwrap();
        }
        locked
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL
    async fn test_failed_unlock_drops_the_session() {
        let pool = pool(2).await;
        let mut holder = pool.acquire().await.unwrap();
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(SCHEMA_LOCK_ID)
            .execute(&mut *holder)
            .await
            .unwrap();
        let pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
            .fetch_one(&mut *holder)
            .await
            .unwrap();

        // Kill the holder's backend so its unlock statement fails.
        let mut admin = pool.acquire().await.unwrap();
        sqlx::query("SELECT pg_terminate_backend($1)")
            .bind(pid)
            .execute(&mut *admin)
            .await
            .unwrap();
        drop(admin);
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        assert!(release_schema_lock(holder).await.is_err());
        assert_eq!(pool.size(), 1);
        assert!(try_lock(&pool).await);
    }
}
