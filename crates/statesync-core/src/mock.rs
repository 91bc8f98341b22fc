//! In-memory collaborators for deterministic testing.
//!
//! Provides a record store, a directory and a secret store that live in
//! memory, count their calls and writes, and can be told to fail, lag or
//! stall on specific items.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use statesync_core::mock::{self, InMemoryRecordStore, MockDirectory};
//!
//! let store = InMemoryRecordStore::new();
//! let tenant = mock::tenant("Acme", Some("collab-1"));
//! store.insert_tenant(tenant.clone());
//!
//! let directory = MockDirectory::new().with_group("collab-1", &["user-1"]);
//! directory.hide_from_user_reads("user-1", "collab-1", None);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::*;
use crate::secrets::Secret;
use crate::traits::*;

// =============================================================================
// FIXTURE BUILDERS
// =============================================================================

/// An active tenant.
pub fn tenant(name: &str, collaboration_group_id: Option<&str>) -> Tenant {
    Tenant {
        id: Uuid::new_v4(),
        name: name.to_string(),
        collaboration_group_id: collaboration_group_id.map(String::from),
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// An active capability type.
pub fn capability(tenant_id: Uuid, name: &str, security_group_id: Option<&str>) -> CapabilityType {
    CapabilityType {
        id: Uuid::new_v4(),
        tenant_id,
        name: name.to_string(),
        security_group_id: security_group_id.map(String::from),
        is_active: true,
        display_order: 0,
        updated_at: Utc::now(),
    }
}

/// An active user intending the given capability types.
pub fn user(tenant_id: Uuid, external_id: &str, capability_type_ids: &[Uuid]) -> User {
    User {
        id: Uuid::new_v4(),
        external_id: external_id.to_string(),
        tenant_id,
        email: format!("{}@example.com", external_id),
        display_name: external_id.to_string(),
        status: UserStatus::Active,
        is_active: true,
        capability_type_ids: capability_type_ids.to_vec(),
        legacy_capability_type_ids: Vec::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// An active assignment copying the capability type's current group.
pub fn assignment(user: &User, capability: &CapabilityType) -> Assignment {
    Assignment {
        id: Uuid::new_v4(),
        user_id: user.id,
        tenant_id: user.tenant_id,
        capability_type_id: capability.id,
        security_group_id: capability.security_group_id.clone(),
        is_active: true,
        assigned_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// An active credential pointing at `<name>-password` and `<name>-conn`.
pub fn credential(tenant_id: Uuid, name: &str) -> CredentialRecord {
    CredentialRecord {
        id: Uuid::new_v4(),
        tenant_id,
        name: name.to_string(),
        engine: "postgres".to_string(),
        password_secret_ref: format!("{}-password", name),
        connection_string_secret_ref: format!("{}-conn", name),
        consolidated_secret_ref: None,
        is_active: true,
        updated_at: Utc::now(),
    }
}

fn injected(what: &str) -> Error {
    Error::Directory(format!("503: injected failure for {}", what))
}

// =============================================================================
// RECORD STORE
// =============================================================================

#[derive(Default)]
struct RecordState {
    tenants: HashMap<Uuid, Tenant>,
    caches: HashMap<Uuid, CollaborationGroupCache>,
    users: HashMap<Uuid, User>,
    capabilities: HashMap<Uuid, CapabilityType>,
    assignments: HashMap<Uuid, Assignment>,
    credentials: HashMap<Uuid, CredentialRecord>,
    failing_tenants: HashSet<Uuid>,
    vanished_tenants: Vec<Uuid>,
}

/// In-memory record store implementing every repository trait.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    state: Arc<Mutex<RecordState>>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tenant(&self, tenant: Tenant) {
        self.state.lock().unwrap().tenants.insert(tenant.id, tenant);
    }

    pub fn insert_cache(&self, cache: CollaborationGroupCache) {
        self.state
            .lock()
            .unwrap()
            .caches
            .insert(cache.tenant_id, cache);
    }

    pub fn insert_user(&self, user: User) {
        self.state.lock().unwrap().users.insert(user.id, user);
    }

    pub fn insert_capability(&self, capability: CapabilityType) {
        self.state
            .lock()
            .unwrap()
            .capabilities
            .insert(capability.id, capability);
    }

    pub fn insert_assignment(&self, assignment: Assignment) {
        self.state
            .lock()
            .unwrap()
            .assignments
            .insert(assignment.id, assignment);
    }

    pub fn insert_credential(&self, credential: CredentialRecord) {
        self.state
            .lock()
            .unwrap()
            .credentials
            .insert(credential.id, credential);
    }

    /// Make every lookup of this tenant fail.
    pub fn fail_tenant(&self, tenant_id: Uuid) {
        self.state
            .lock()
            .unwrap()
            .failing_tenants
            .insert(tenant_id);
    }

    /// List a tenant id as active without storing the tenant, as if it was
    /// deleted between enumeration and lookup.
    pub fn insert_vanished_tenant(&self, tenant_id: Uuid) {
        self.state.lock().unwrap().vanished_tenants.push(tenant_id);
    }

    /// Snapshot of a tenant.
    pub fn tenant(&self, id: Uuid) -> Option<Tenant> {
        self.state.lock().unwrap().tenants.get(&id).cloned()
    }

    /// Snapshot of a tenant's collaboration-group cache.
    pub fn cache(&self, tenant_id: Uuid) -> Option<CollaborationGroupCache> {
        self.state.lock().unwrap().caches.get(&tenant_id).cloned()
    }

    /// Snapshot of an assignment.
    pub fn assignment(&self, id: Uuid) -> Option<Assignment> {
        self.state.lock().unwrap().assignments.get(&id).cloned()
    }

    /// Mutate a capability type in place.
    pub fn update_capability(&self, id: Uuid, f: impl FnOnce(&mut CapabilityType)) {
        if let Some(c) = self.state.lock().unwrap().capabilities.get_mut(&id) {
            f(c);
        }
    }

    /// Number of mutating repository calls made through the traits.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl RecordStore for InMemoryRecordStore {
    fn users(&self) -> &dyn UserRepository {
        self
    }
    fn capability_types(&self) -> &dyn CapabilityTypeRepository {
        self
    }
    fn assignments(&self) -> &dyn AssignmentRepository {
        self
    }
    fn tenants(&self) -> &dyn TenantRepository {
        self
    }
    fn collaboration_groups(&self) -> &dyn CollaborationGroupRepository {
        self
    }
    fn credentials(&self) -> &dyn CredentialRepository {
        self
    }
}

#[async_trait]
impl UserRepository for InMemoryRecordStore {
    async fn get(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.state.lock().unwrap().users.get(&id).cloned())
    }

    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<User>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .values()
            .find(|u| same_external_id(&u.external_id, external_id))
            .cloned())
    }

    async fn list_active_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>> {
        let mut users: Vec<User> = self
            .state
            .lock()
            .unwrap()
            .users
            .values()
            .filter(|u| u.tenant_id == tenant_id && u.is_active)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(users)
    }

    async fn upsert(&self, user: &User) -> Result<()> {
        self.record_write();
        self.insert_user(user.clone());
        Ok(())
    }
}

#[async_trait]
impl CapabilityTypeRepository for InMemoryRecordStore {
    async fn get(&self, id: Uuid) -> Result<Option<CapabilityType>> {
        Ok(self.state.lock().unwrap().capabilities.get(&id).cloned())
    }

    async fn list_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<CapabilityType>> {
        let mut caps: Vec<CapabilityType> = self
            .state
            .lock()
            .unwrap()
            .capabilities
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect();
        caps.sort_by(|a, b| (a.display_order, &a.name).cmp(&(b.display_order, &b.name)));
        Ok(caps)
    }

    async fn upsert(&self, capability: &CapabilityType) -> Result<()> {
        self.record_write();
        self.insert_capability(capability.clone());
        Ok(())
    }
}

#[async_trait]
impl AssignmentRepository for InMemoryRecordStore {
    async fn list_active_for_user(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Vec<Assignment>> {
        let mut rows: Vec<Assignment> = self
            .state
            .lock()
            .unwrap()
            .assignments
            .values()
            .filter(|a| a.user_id == user_id && a.tenant_id == tenant_id && a.is_active)
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.assigned_at, a.id));
        Ok(rows)
    }

    async fn list_active_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<Assignment>> {
        let mut rows: Vec<Assignment> = self
            .state
            .lock()
            .unwrap()
            .assignments
            .values()
            .filter(|a| a.tenant_id == tenant_id && a.is_active)
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.assigned_at, a.id));
        Ok(rows)
    }

    async fn update_security_group(&self, assignment_id: Uuid, group_id: &str) -> Result<()> {
        self.record_write();
        let mut state = self.state.lock().unwrap();
        let assignment = state
            .assignments
            .get_mut(&assignment_id)
            .ok_or_else(|| Error::NotFound(format!("assignment {}", assignment_id)))?;
        assignment.security_group_id = Some(group_id.to_string());
        assignment.updated_at = Utc::now();
        Ok(())
    }

    async fn upsert(&self, assignment: &Assignment) -> Result<()> {
        self.record_write();
        self.insert_assignment(assignment.clone());
        Ok(())
    }
}

#[async_trait]
impl TenantRepository for InMemoryRecordStore {
    async fn get(&self, id: Uuid) -> Result<Option<Tenant>> {
        let state = self.state.lock().unwrap();
        if state.failing_tenants.contains(&id) {
            return Err(Error::Internal(format!("injected failure for tenant {}", id)));
        }
        Ok(state.tenants.get(&id).cloned())
    }

    async fn list_active_ids(&self) -> Result<Vec<Uuid>> {
        let state = self.state.lock().unwrap();
        let mut tenants: Vec<&Tenant> = state.tenants.values().filter(|t| t.is_active).collect();
        tenants.sort_by_key(|t| (t.created_at, t.id));
        let mut ids: Vec<Uuid> = tenants.into_iter().map(|t| t.id).collect();
        ids.extend(state.vanished_tenants.iter().copied());
        Ok(ids)
    }

    async fn set_collaboration_group_id(&self, tenant_id: Uuid, group_id: &str) -> Result<()> {
        self.record_write();
        let mut state = self.state.lock().unwrap();
        let tenant = state
            .tenants
            .get_mut(&tenant_id)
            .ok_or(Error::TenantNotFound(tenant_id))?;
        tenant.collaboration_group_id = Some(group_id.to_string());
        tenant.updated_at = Utc::now();
        Ok(())
    }

    async fn upsert(&self, tenant: &Tenant) -> Result<()> {
        self.record_write();
        self.insert_tenant(tenant.clone());
        Ok(())
    }
}

#[async_trait]
impl CollaborationGroupRepository for InMemoryRecordStore {
    async fn get_for_tenant(&self, tenant_id: Uuid) -> Result<Option<CollaborationGroupCache>> {
        Ok(self.cache(tenant_id))
    }

    async fn upsert(&self, cache: &CollaborationGroupCache) -> Result<()> {
        self.record_write();
        self.insert_cache(cache.clone());
        Ok(())
    }
}

#[async_trait]
impl CredentialRepository for InMemoryRecordStore {
    async fn list_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<CredentialRecord>> {
        let mut rows: Vec<CredentialRecord> = self
            .state
            .lock()
            .unwrap()
            .credentials
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn upsert(&self, credential: &CredentialRecord) -> Result<()> {
        self.record_write();
        self.insert_credential(credential.clone());
        Ok(())
    }
}

// =============================================================================
// DIRECTORY
// =============================================================================

#[derive(Default)]
struct DirectoryState {
    /// group id -> member external ids (normalized)
    groups: HashMap<String, HashSet<String>>,
    /// (user, group) pairs omitted from forward reads; `None` = forever
    hidden: HashMap<(String, String), Option<u32>>,
    failing_groups: HashSet<String>,
    failing_users: HashSet<String>,
    offline: bool,
}

/// In-memory directory with read-lag and failure injection.
///
/// Forward reads (`get_user_groups`) are derived from group membership, so
/// writes are immediately visible on the reverse path (`get_group_members`)
/// while [`hide_from_user_reads`](Self::hide_from_user_reads) simulates a
/// lagging forward path.
#[derive(Clone, Default)]
pub struct MockDirectory {
    state: Arc<Mutex<DirectoryState>>,
    latency: Option<Duration>,
    exists_calls: Arc<AtomicUsize>,
    user_reads: Arc<AtomicUsize>,
    member_reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group with initial members.
    pub fn with_group(self, group_id: &str, members: &[&str]) -> Self {
        self.add_group(group_id, members);
        self
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn add_group(&self, group_id: &str, members: &[&str]) {
        self.state.lock().unwrap().groups.insert(
            normalize_external_id(group_id),
            members.iter().map(|m| normalize_external_id(m)).collect(),
        );
    }

    pub fn delete_group(&self, group_id: &str) {
        self.state
            .lock()
            .unwrap()
            .groups
            .remove(&normalize_external_id(group_id));
    }

    /// Omit `group_id` from `user`'s forward reads for `reads` calls, or
    /// forever when `None`.
    pub fn hide_from_user_reads(&self, user: &str, group_id: &str, reads: Option<u32>) {
        self.state.lock().unwrap().hidden.insert(
            (normalize_external_id(user), normalize_external_id(group_id)),
            reads,
        );
    }

    /// Make calls touching `group_id` fail with a transient error.
    pub fn fail_group(&self, group_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_groups
            .insert(normalize_external_id(group_id));
    }

    /// Make forward reads of `user` fail with a transient error.
    pub fn fail_user(&self, user: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_users
            .insert(normalize_external_id(user));
    }

    /// Make every call fail.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn user_reads(&self) -> usize {
        self.user_reads.load(Ordering::SeqCst)
    }

    pub fn member_reads(&self) -> usize {
        self.member_reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_group(&self, state: &DirectoryState, group_id: &str) -> Result<String> {
        let key = normalize_external_id(group_id);
        if state.offline || state.failing_groups.contains(&key) {
            return Err(injected(group_id));
        }
        Ok(key)
    }
}

#[async_trait]
impl DirectoryClient for MockDirectory {
    async fn group_exists(&self, group_id: &str) -> Result<bool> {
        self.pause().await;
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let key = self.check_group(&state, group_id)?;
        Ok(state.groups.contains_key(&key))
    }

    async fn get_user_groups(&self, user_external_id: &str) -> Result<Vec<String>> {
        self.pause().await;
        self.user_reads.fetch_add(1, Ordering::SeqCst);
        let user = normalize_external_id(user_external_id);
        let mut state = self.state.lock().unwrap();
        if state.offline || state.failing_users.contains(&user) {
            return Err(injected(user_external_id));
        }

        let mut visible = Vec::new();
        for (group, members) in &state.groups {
            if !members.contains(&user) {
                continue;
            }
            match state.hidden.get(&(user.clone(), group.clone())) {
                Some(None) => {}
                Some(Some(n)) if *n > 0 => {}
                _ => visible.push(group.clone()),
            }
        }
        for remaining in state
            .hidden
            .iter_mut()
            .filter(|((u, _), _)| *u == user)
            .filter_map(|(_, reads)| reads.as_mut())
        {
            *remaining = remaining.saturating_sub(1);
        }
        visible.sort();
        Ok(visible)
    }

    async fn get_group_members(&self, group_id: &str) -> Result<Vec<String>> {
        self.pause().await;
        self.member_reads.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let key = self.check_group(&state, group_id)?;
        let mut members: Vec<String> = state
            .groups
            .get(&key)
            .ok_or_else(|| Error::Directory(format!("404: group {} not found", group_id)))?
            .iter()
            .cloned()
            .collect();
        members.sort();
        Ok(members)
    }

    async fn add_user_to_group(&self, user_external_id: &str, group_id: &str) -> Result<()> {
        self.pause().await;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let key = self.check_group(&state, group_id)?;
        state
            .groups
            .get_mut(&key)
            .ok_or_else(|| Error::Directory(format!("404: group {} not found", group_id)))?
            .insert(normalize_external_id(user_external_id));
        Ok(())
    }

    async fn remove_user_from_group(
        &self,
        user_external_id: &str,
        group_id: &str,
    ) -> Result<()> {
        self.pause().await;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let key = self.check_group(&state, group_id)?;
        if let Some(members) = state.groups.get_mut(&key) {
            members.remove(&normalize_external_id(user_external_id));
        }
        Ok(())
    }
}

// =============================================================================
// SECRET STORE
// =============================================================================

#[derive(Default)]
struct SecretState {
    /// name -> versions, oldest first
    live: HashMap<String, Vec<Secret>>,
    deleted: HashMap<String, Vec<Secret>>,
    failing: HashSet<String>,
    next_version: u64,
}

/// In-memory secret store with failure injection.
#[derive(Clone, Default)]
pub struct MockSecretStore {
    state: Arc<Mutex<SecretState>>,
    writes: Arc<AtomicUsize>,
}

impl MockSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a secret version directly (not counted as a write).
    pub fn insert(
        &self,
        name: &str,
        version: Option<&str>,
        value: &str,
        tags: &[(&str, &str)],
    ) {
        let secret = Secret {
            name: name.to_string(),
            version: version.map(String::from),
            value: value.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            enabled: true,
        };
        self.state
            .lock()
            .unwrap()
            .live
            .entry(name.to_string())
            .or_default()
            .push(secret);
    }

    /// Flip the store-level enabled state of the latest version.
    pub fn set_enabled(&self, name: &str, enabled: bool) {
        if let Some(latest) = self
            .state
            .lock()
            .unwrap()
            .live
            .get_mut(name)
            .and_then(|v| v.last_mut())
        {
            latest.enabled = enabled;
        }
    }

    /// Make calls touching `name` fail with a transient error.
    pub fn fail_secret(&self, name: &str) {
        self.state.lock().unwrap().failing.insert(name.to_string());
    }

    /// Snapshot of the latest version.
    pub fn latest(&self, name: &str) -> Option<Secret> {
        self.state
            .lock()
            .unwrap()
            .live
            .get(name)
            .and_then(|v| v.last().cloned())
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self, state: &SecretState, name: &str) -> Result<()> {
        if state.failing.contains(name) {
            return Err(Error::SecretStore(format!(
                "503: injected failure for {}",
                name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStoreClient for MockSecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>> {
        Ok(self.get_secret_with_tags(name).await?.map(|s| s.value))
    }

    async fn get_secret_with_tags(&self, name: &str) -> Result<Option<Secret>> {
        let state = self.state.lock().unwrap();
        self.check(&state, name)?;
        Ok(state.live.get(name).and_then(|v| v.last().cloned()))
    }

    async fn get_secret_version(&self, name: &str, version: &str) -> Result<Option<Secret>> {
        let state = self.state.lock().unwrap();
        self.check(&state, name)?;
        Ok(state.live.get(name).and_then(|versions| {
            versions
                .iter()
                .find(|s| s.version.as_deref() == Some(version))
                .cloned()
        }))
    }

    async fn set_secret(
        &self,
        name: &str,
        value: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        self.check(&state, name)?;
        state.next_version += 1;
        let version = format!("v{}", state.next_version);
        state.live.entry(name.to_string()).or_default().push(Secret {
            name: name.to_string(),
            version: Some(version),
            value: value.to_string(),
            tags: tags.clone(),
            enabled: true,
        });
        Ok(())
    }

    async fn update_secret_tags(
        &self,
        name: &str,
        version: Option<&str>,
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        self.check(&state, name)?;
        let versions = state
            .live
            .get_mut(name)
            .ok_or_else(|| Error::SecretStore(format!("404: secret {} not found", name)))?;
        let target = match version {
            Some(v) => versions.iter_mut().find(|s| s.version.as_deref() == Some(v)),
            None => versions.last_mut(),
        }
        .ok_or_else(|| Error::SecretStore(format!("404: secret version {} not found", name)))?;
        target.tags = tags.clone();
        Ok(())
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        self.check(&state, name)?;
        if let Some(versions) = state.live.remove(name) {
            state.deleted.insert(name.to_string(), versions);
        }
        Ok(())
    }

    async fn purge_secret(&self, name: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        self.check(&state, name)?;
        state.deleted.remove(name);
        Ok(())
    }
}
