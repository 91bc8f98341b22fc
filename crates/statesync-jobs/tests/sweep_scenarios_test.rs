//! End-to-end sweeps against in-memory collaborators.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use statesync_core::mock::{self, InMemoryRecordStore, MockDirectory, MockSecretStore};
use statesync_core::{CollaborationGroupCache, Tenant};
use statesync_engine::{EngineContext, ResilienceConfig, ValidatorConfig};
use statesync_jobs::{SweepConfig, SweepCoordinator, SweepOptions, SweepPhase};

fn coordinator(store: &InMemoryRecordStore, directory: &MockDirectory) -> SweepCoordinator {
    let ctx = EngineContext::new(
        Arc::new(store.clone()),
        Arc::new(directory.clone()),
        Arc::new(MockSecretStore::new()),
        &ResilienceConfig::default(),
    );
    SweepCoordinator::new(ctx, ValidatorConfig::default(), &SweepConfig::default())
}

fn cache(tenant_id: Uuid, group_id: &str) -> CollaborationGroupCache {
    CollaborationGroupCache {
        id: Uuid::new_v4(),
        tenant_id,
        group_id: group_id.to_string(),
        display_name: "Everyone".to_string(),
        description: None,
        updated_at: Utc::now(),
    }
}

fn tenant_with_collab(store: &InMemoryRecordStore, group_id: &str) -> Tenant {
    let tenant = mock::tenant("Acme", Some(group_id));
    store.insert_tenant(tenant.clone());
    store.insert_cache(cache(tenant.id, group_id));
    tenant
}

#[tokio::test]
async fn test_missing_admin_assignment_is_one_error() {
    let store = InMemoryRecordStore::new();
    let tenant = tenant_with_collab(&store, "collab");
    let sales = mock::capability(tenant.id, "Sales", Some("g-sales"));
    let admin = mock::capability(tenant.id, "Admin", Some("g-admin"));
    store.insert_capability(sales.clone());
    store.insert_capability(admin.clone());
    let user = mock::user(tenant.id, "alice", &[sales.id, admin.id]);
    store.insert_user(user.clone());
    store.insert_assignment(mock::assignment(&user, &sales));

    let directory = MockDirectory::new()
        .with_group("collab", &["alice"])
        .with_group("g-sales", &["alice"])
        .with_group("g-admin", &[]);
    let coordinator = coordinator(&store, &directory);

    let result = coordinator.run_full_sweep(tenant.id).await.unwrap();

    assert!(!result.is_fully_synced);
    assert!(!result.user_result.is_valid);
    assert_eq!(result.total_errors(), 1, "{:?}", result.critical_issues);
    assert_eq!(result.total_warnings(), 0);
    assert!(result.critical_issues[0].contains("missing assignment for capability Admin"));
    assert_eq!(store.write_count(), 0);
    assert_eq!(directory.write_count(), 0);
    assert_eq!(coordinator.phase(tenant.id), SweepPhase::Cached);
}

#[tokio::test]
async fn test_stale_group_reference_is_repaired_by_sweep() {
    let store = InMemoryRecordStore::new();
    let tenant = tenant_with_collab(&store, "collab");
    let sales = mock::capability(tenant.id, "Sales", Some("G1"));
    store.insert_capability(sales.clone());
    let user = mock::user(tenant.id, "alice", &[sales.id]);
    store.insert_user(user.clone());
    let assignment = mock::assignment(&user, &sales);
    store.insert_assignment(assignment.clone());

    // The group was recreated under a new id.
    store.update_capability(sales.id, |c| c.security_group_id = Some("G2".to_string()));
    let directory = MockDirectory::new()
        .with_group("collab", &["alice"])
        .with_group("G2", &["alice"]);
    let coordinator = coordinator(&store, &directory);

    let before = coordinator.run_full_sweep(tenant.id).await.unwrap();
    assert!(!before.is_fully_synced);
    assert!(before
        .critical_issues
        .iter()
        .any(|issue| issue.contains("stale group reference")));

    let after = coordinator
        .run_sweep(tenant.id, SweepOptions::default().with_repair(true))
        .await
        .unwrap();
    assert!(after.is_fully_synced, "{:?}", after.critical_issues);
    assert_eq!(after.user_result.error_count(), 0);
    assert!(after.repairs().count() >= 1);
    assert_eq!(
        store.assignment(assignment.id).unwrap().security_group_id.as_deref(),
        Some("G2")
    );

    let cached = coordinator.get_cached_result(tenant.id).await.unwrap();
    assert!(Arc::ptr_eq(&cached, &after));
}

#[tokio::test]
async fn test_surviving_cached_group_is_promoted_to_canonical() {
    let store = InMemoryRecordStore::new();
    let tenant = mock::tenant("Acme", None);
    store.insert_tenant(tenant.clone());
    store.insert_cache(cache(tenant.id, "G7"));
    let directory = MockDirectory::new().with_group("G7", &[]);
    let coordinator = coordinator(&store, &directory);

    let outcome = coordinator
        .repairer()
        .repair_collaboration_group(tenant.id)
        .await
        .unwrap();
    assert_eq!(outcome.value.as_deref(), Some("G7"));
    assert_eq!(
        store.tenant(tenant.id).unwrap().collaboration_group_id.as_deref(),
        Some("G7")
    );

    let result = coordinator.run_full_sweep(tenant.id).await.unwrap();
    assert!(result.is_fully_synced, "{:?}", result.critical_issues);
}

#[tokio::test]
async fn test_repair_sweep_promotes_cached_group() {
    let store = InMemoryRecordStore::new();
    let tenant = mock::tenant("Acme", None);
    store.insert_tenant(tenant.clone());
    store.insert_cache(cache(tenant.id, "G7"));
    let directory = MockDirectory::new().with_group("G7", &[]);
    let coordinator = coordinator(&store, &directory);

    let result = coordinator
        .run_sweep(tenant.id, SweepOptions::default().with_repair(true))
        .await
        .unwrap();

    assert!(result.is_fully_synced, "{:?}", result.critical_issues);
    assert_eq!(result.repairs().count(), 1);
    assert_eq!(
        store.tenant(tenant.id).unwrap().collaboration_group_id.as_deref(),
        Some("G7")
    );
}
