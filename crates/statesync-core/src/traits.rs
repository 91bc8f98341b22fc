//! Core traits for statesync collaborators.
//!
//! The engine is written against these traits: the record store is the
//! intended state, the directory and secret store are the actual state.
//! Concrete implementations live in `statesync-db` and `statesync-clients`;
//! in-memory implementations live in [`crate::mock`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;
use crate::secrets::Secret;

// =============================================================================
// RECORD STORE TRAITS
// =============================================================================

/// Repository for platform users.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fetch a user by platform id.
    async fn get(&self, id: Uuid) -> Result<Option<User>>;

    /// Fetch a user by directory object id.
    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<User>>;

    /// List users of a tenant with `is_active = true`.
    async fn list_active_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>>;

    /// Insert or replace a user record.
    async fn upsert(&self, user: &User) -> Result<()>;
}

/// Repository for capability types.
#[async_trait]
pub trait CapabilityTypeRepository: Send + Sync {
    /// Fetch one capability type.
    async fn get(&self, id: Uuid) -> Result<Option<CapabilityType>>;

    /// List every capability type of a tenant, ordered by `display_order`.
    async fn list_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<CapabilityType>>;

    /// Insert or replace a capability type.
    async fn upsert(&self, capability: &CapabilityType) -> Result<()>;
}

/// Repository for user/capability assignments.
#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    /// Active assignments for one (user, tenant) pair.
    async fn list_active_for_user(&self, user_id: Uuid, tenant_id: Uuid)
        -> Result<Vec<Assignment>>;

    /// Active assignments across a tenant.
    async fn list_active_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<Assignment>>;

    /// Re-point an assignment's copied security-group reference.
    async fn update_security_group(&self, assignment_id: Uuid, group_id: &str) -> Result<()>;

    /// Insert or replace an assignment.
    async fn upsert(&self, assignment: &Assignment) -> Result<()>;
}

/// Repository for tenants.
#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Fetch one tenant.
    async fn get(&self, id: Uuid) -> Result<Option<Tenant>>;

    /// Ids of every active tenant, in a stable order.
    async fn list_active_ids(&self) -> Result<Vec<Uuid>>;

    /// Set the canonical collaboration-group id.
    async fn set_collaboration_group_id(&self, tenant_id: Uuid, group_id: &str) -> Result<()>;

    /// Insert or replace a tenant.
    async fn upsert(&self, tenant: &Tenant) -> Result<()>;
}

/// Repository for the per-tenant collaboration-group cache.
#[async_trait]
pub trait CollaborationGroupRepository: Send + Sync {
    /// Fetch the cache record of a tenant.
    async fn get_for_tenant(&self, tenant_id: Uuid) -> Result<Option<CollaborationGroupCache>>;

    /// Insert or replace the cache record of a tenant.
    async fn upsert(&self, cache: &CollaborationGroupCache) -> Result<()>;
}

/// Repository for credential records.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Every credential of a tenant, active or not.
    async fn list_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<CredentialRecord>>;

    /// Insert or replace a credential record.
    async fn upsert(&self, credential: &CredentialRecord) -> Result<()>;
}

/// Typed access to the system of record.
pub trait RecordStore: Send + Sync {
    fn users(&self) -> &dyn UserRepository;
    fn capability_types(&self) -> &dyn CapabilityTypeRepository;
    fn assignments(&self) -> &dyn AssignmentRepository;
    fn tenants(&self) -> &dyn TenantRepository;
    fn collaboration_groups(&self) -> &dyn CollaborationGroupRepository;
    fn credentials(&self) -> &dyn CredentialRepository;
}

// =============================================================================
// EXTERNAL SERVICE TRAITS
// =============================================================================

/// Directory service: identities, security groups, collaboration groups.
///
/// Reads may lag writes. A missing group is `Ok(false)`, not an error.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Whether a group with this id exists.
    async fn group_exists(&self, group_id: &str) -> Result<bool>;

    /// Ids of the groups a user is a direct member of.
    async fn get_user_groups(&self, user_external_id: &str) -> Result<Vec<String>>;

    /// Directory object ids of a group's direct members.
    async fn get_group_members(&self, group_id: &str) -> Result<Vec<String>>;

    /// Add a user to a group. Adding an existing member succeeds.
    async fn add_user_to_group(&self, user_external_id: &str, group_id: &str) -> Result<()>;

    /// Remove a user from a group. Removing a non-member succeeds.
    async fn remove_user_from_group(&self, user_external_id: &str, group_id: &str)
        -> Result<()>;
}

/// Secret store: name/value pairs with tag metadata.
///
/// An absent secret is `Ok(None)`, not an error.
#[async_trait]
pub trait SecretStoreClient: Send + Sync {
    /// Latest value of a secret.
    async fn get_secret(&self, name: &str) -> Result<Option<String>>;

    /// Latest version of a secret with tags and enabled state.
    async fn get_secret_with_tags(&self, name: &str) -> Result<Option<Secret>>;

    /// A specific version of a secret with tags and enabled state.
    async fn get_secret_version(&self, name: &str, version: &str) -> Result<Option<Secret>>;

    /// Write a new version of a secret. The store-level enabled state is
    /// always set to `true`.
    async fn set_secret(
        &self,
        name: &str,
        value: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Replace the tags of an existing secret version in place (latest
    /// version when `version` is `None`). The value is untouched, so
    /// versioned references stay valid.
    async fn update_secret_tags(
        &self,
        name: &str,
        version: Option<&str>,
        tags: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Soft-delete a secret.
    async fn delete_secret(&self, name: &str) -> Result<()>;

    /// Permanently remove a soft-deleted secret.
    async fn purge_secret(&self, name: &str) -> Result<()>;
}
