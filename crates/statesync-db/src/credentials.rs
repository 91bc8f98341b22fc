//! Credential record repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use statesync_core::{CredentialRecord, CredentialRepository, Error, Result};

/// PostgreSQL implementation of CredentialRepository.
pub struct PgCredentialRepository {
    pool: Pool<Postgres>,
}

impl PgCredentialRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRepository for PgCredentialRepository {
    async fn list_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<CredentialRecord>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, engine, password_secret_ref,
                    connection_string_secret_ref, consolidated_secret_ref, is_active, updated_at
             FROM db_credential WHERE tenant_id = $1
             ORDER BY name",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|r| CredentialRecord {
                id: r.get("id"),
                tenant_id: r.get("tenant_id"),
                name: r.get("name"),
                engine: r.get("engine"),
                password_secret_ref: r.get("password_secret_ref"),
                connection_string_secret_ref: r.get("connection_string_secret_ref"),
                consolidated_secret_ref: r.get("consolidated_secret_ref"),
                is_active: r.get("is_active"),
                updated_at: r.get("updated_at"),
            })
            .collect())
    }

    async fn upsert(&self, credential: &CredentialRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO db_credential (id, tenant_id, name, engine, password_secret_ref,
                                       connection_string_secret_ref, consolidated_secret_ref,
                                       is_active, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                engine = EXCLUDED.engine,
                password_secret_ref = EXCLUDED.password_secret_ref,
                connection_string_secret_ref = EXCLUDED.connection_string_secret_ref,
                consolidated_secret_ref = EXCLUDED.consolidated_secret_ref,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(credential.id)
        .bind(credential.tenant_id)
        .bind(&credential.name)
        .bind(&credential.engine)
        .bind(&credential.password_secret_ref)
        .bind(&credential.connection_string_secret_ref)
        .bind(&credential.consolidated_secret_ref)
        .bind(credential.is_active)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}
