//! User repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use statesync_core::{Error, Result, User, UserRepository, UserStatus};

const USER_COLUMNS: &str = "id, external_id, tenant_id, email, display_name, status, is_active,
     capability_type_ids, legacy_capability_type_ids, created_at, updated_at";

/// PostgreSQL implementation of UserRepository.
pub struct PgUserRepository {
    pool: Pool<Postgres>,
}

impl PgUserRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_user(r: &PgRow) -> Result<User> {
    let status: String = r.get("status");
    let status: UserStatus = status.parse().map_err(Error::Serialization)?;
    Ok(User {
        id: r.get("id"),
        external_id: r.get("external_id"),
        tenant_id: r.get("tenant_id"),
        email: r.get("email"),
        display_name: r.get("display_name"),
        status,
        is_active: r.get("is_active"),
        capability_type_ids: r.get("capability_type_ids"),
        legacy_capability_type_ids: r.get("legacy_capability_type_ids"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn get(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM app_user WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM app_user WHERE lower(external_id) = lower($1)",
            USER_COLUMNS
        ))
        .bind(external_id.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn list_active_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM app_user WHERE tenant_id = $1 AND is_active ORDER BY external_id",
            USER_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.iter().map(row_to_user).collect()
    }

    async fn upsert(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO app_user (id, external_id, tenant_id, email, display_name, status,
                                  is_active, capability_type_ids, legacy_capability_type_ids,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                display_name = EXCLUDED.display_name,
                status = EXCLUDED.status,
                is_active = EXCLUDED.is_active,
                capability_type_ids = EXCLUDED.capability_type_ids,
                legacy_capability_type_ids = EXCLUDED.legacy_capability_type_ids,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user.id)
        .bind(&user.external_id)
        .bind(user.tenant_id)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(user.status.to_string())
        .bind(user.is_active)
        .bind(&user.capability_type_ids)
        .bind(&user.legacy_capability_type_ids)
        .bind(user.created_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}
