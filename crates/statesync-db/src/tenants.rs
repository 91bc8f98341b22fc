//! Tenant and collaboration-group cache repositories.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use statesync_core::{
    CollaborationGroupCache, CollaborationGroupRepository, Error, Result, Tenant,
    TenantRepository,
};

/// PostgreSQL implementation of TenantRepository.
pub struct PgTenantRepository {
    pool: Pool<Postgres>,
}

impl PgTenantRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_tenant(r: &PgRow) -> Tenant {
    Tenant {
        id: r.get("id"),
        name: r.get("name"),
        collaboration_group_id: r.get("collaboration_group_id"),
        is_active: r.get("is_active"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

#[async_trait]
impl TenantRepository for PgTenantRepository {
    async fn get(&self, id: Uuid) -> Result<Option<Tenant>> {
        let row = sqlx::query(
            "SELECT id, name, collaboration_group_id, is_active, created_at, updated_at
             FROM tenant WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.as_ref().map(row_to_tenant))
    }

    async fn list_active_ids(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM tenant WHERE is_active ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn set_collaboration_group_id(&self, tenant_id: Uuid, group_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tenant SET collaboration_group_id = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(group_id)
        .bind(Utc::now())
        .bind(tenant_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::TenantNotFound(tenant_id));
        }
        Ok(())
    }

    async fn upsert(&self, tenant: &Tenant) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant (id, name, collaboration_group_id, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                collaboration_group_id = EXCLUDED.collaboration_group_id,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.collaboration_group_id)
        .bind(tenant.is_active)
        .bind(tenant.created_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

/// PostgreSQL implementation of CollaborationGroupRepository.
pub struct PgCollaborationGroupRepository {
    pool: Pool<Postgres>,
}

impl PgCollaborationGroupRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CollaborationGroupRepository for PgCollaborationGroupRepository {
    async fn get_for_tenant(&self, tenant_id: Uuid) -> Result<Option<CollaborationGroupCache>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, group_id, display_name, description, updated_at
             FROM collaboration_group WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| CollaborationGroupCache {
            id: r.get("id"),
            tenant_id: r.get("tenant_id"),
            group_id: r.get("group_id"),
            display_name: r.get("display_name"),
            description: r.get("description"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn upsert(&self, cache: &CollaborationGroupCache) -> Result<()> {
        // One cache row per tenant; the tenant key wins over the row id.
        sqlx::query(
            r#"
            INSERT INTO collaboration_group (id, tenant_id, group_id, display_name, description,
                                             updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id) DO UPDATE SET
                group_id = EXCLUDED.group_id,
                display_name = EXCLUDED.display_name,
                description = EXCLUDED.description,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(cache.id)
        .bind(cache.tenant_id)
        .bind(&cache.group_id)
        .bind(&cache.display_name)
        .bind(&cache.description)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}
