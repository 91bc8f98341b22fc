//! Capability type and assignment repositories.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use statesync_core::{
    Assignment, AssignmentRepository, CapabilityType, CapabilityTypeRepository, Error, Result,
};

/// PostgreSQL implementation of CapabilityTypeRepository.
pub struct PgCapabilityTypeRepository {
    pool: Pool<Postgres>,
}

impl PgCapabilityTypeRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_capability(r: &PgRow) -> CapabilityType {
    CapabilityType {
        id: r.get("id"),
        tenant_id: r.get("tenant_id"),
        name: r.get("name"),
        security_group_id: r.get("security_group_id"),
        is_active: r.get("is_active"),
        display_order: r.get("display_order"),
        updated_at: r.get("updated_at"),
    }
}

#[async_trait]
impl CapabilityTypeRepository for PgCapabilityTypeRepository {
    async fn get(&self, id: Uuid) -> Result<Option<CapabilityType>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, security_group_id, is_active, display_order, updated_at
             FROM capability_type WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.as_ref().map(row_to_capability))
    }

    async fn list_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<CapabilityType>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, security_group_id, is_active, display_order, updated_at
             FROM capability_type WHERE tenant_id = $1
             ORDER BY display_order, name",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(row_to_capability).collect())
    }

    async fn upsert(&self, capability: &CapabilityType) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO capability_type (id, tenant_id, name, security_group_id, is_active,
                                         display_order, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                security_group_id = EXCLUDED.security_group_id,
                is_active = EXCLUDED.is_active,
                display_order = EXCLUDED.display_order,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(capability.id)
        .bind(capability.tenant_id)
        .bind(&capability.name)
        .bind(&capability.security_group_id)
        .bind(capability.is_active)
        .bind(capability.display_order)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

/// PostgreSQL implementation of AssignmentRepository.
pub struct PgAssignmentRepository {
    pool: Pool<Postgres>,
}

impl PgAssignmentRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_assignment(r: &PgRow) -> Assignment {
    Assignment {
        id: r.get("id"),
        user_id: r.get("user_id"),
        tenant_id: r.get("tenant_id"),
        capability_type_id: r.get("capability_type_id"),
        security_group_id: r.get("security_group_id"),
        is_active: r.get("is_active"),
        assigned_at: r.get("assigned_at"),
        updated_at: r.get("updated_at"),
    }
}

#[async_trait]
impl AssignmentRepository for PgAssignmentRepository {
    async fn list_active_for_user(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Vec<Assignment>> {
        let rows = sqlx::query(
            "SELECT id, user_id, tenant_id, capability_type_id, security_group_id, is_active,
                    assigned_at, updated_at
             FROM capability_assignment
             WHERE user_id = $1 AND tenant_id = $2 AND is_active
             ORDER BY assigned_at, id",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(row_to_assignment).collect())
    }

    async fn list_active_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<Assignment>> {
        let rows = sqlx::query(
            "SELECT id, user_id, tenant_id, capability_type_id, security_group_id, is_active,
                    assigned_at, updated_at
             FROM capability_assignment
             WHERE tenant_id = $1 AND is_active
             ORDER BY assigned_at, id",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(row_to_assignment).collect())
    }

    async fn update_security_group(&self, assignment_id: Uuid, group_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE capability_assignment SET security_group_id = $1, updated_at = $2
             WHERE id = $3",
        )
        .bind(group_id)
        .bind(Utc::now())
        .bind(assignment_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("assignment {}", assignment_id)));
        }
        Ok(())
    }

    async fn upsert(&self, assignment: &Assignment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO capability_assignment (id, user_id, tenant_id, capability_type_id,
                                               security_group_id, is_active, assigned_at,
                                               updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                security_group_id = EXCLUDED.security_group_id,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(assignment.id)
        .bind(assignment.user_id)
        .bind(assignment.tenant_id)
        .bind(assignment.capability_type_id)
        .bind(&assignment.security_group_id)
        .bind(assignment.is_active)
        .bind(assignment.assigned_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}
