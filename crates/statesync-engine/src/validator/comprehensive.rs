//! Tenant-wide category validation and the full sweep composite.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tracing::{info, warn};
use uuid::Uuid;

use statesync_core::{
    normalize_external_id, same_external_id, Assignment, CapabilityType,
    ComprehensiveStateSyncResult, DiagnosticValue, Error, Result, User, ValidationResult,
};

use super::groups::distinct_ids;
use super::{unverified, Validator};

impl Validator {
    /// Record and assignment checks for every active user of a tenant.
    pub async fn validate_tenant_users(&self, tenant_id: Uuid) -> ValidationResult {
        let mut result = ValidationResult::new();
        let subject = format!("users of tenant {}", tenant_id);

        let users = match self
            .ctx
            .record("users.list_active_for_tenant", || {
                self.ctx.store.users().list_active_for_tenant(tenant_id)
            })
            .await
        {
            Ok(users) => users,
            Err(e) => {
                result.add_warning(unverified(format!("users of tenant {}", tenant_id), &e));
                result.summarize(&subject);
                return result;
            }
        };

        let checked: Vec<(String, ValidationResult)> = stream::iter(users.iter())
            .map(|user| async move { (user.external_id.clone(), self.check_user(tenant_id, user).await) })
            .buffered(self.config.user_concurrency)
            .collect::<Vec<_>>()
            .boxed()
            .await;

        for (external_id, user_result) in checked {
            result.merge(&format!("user.{}", external_id), user_result);
        }
        result.add_diagnostic("users_checked", DiagnosticValue::Count(users.len()));
        result.summarize(&subject);
        result
    }

    async fn check_user(&self, tenant_id: Uuid, user: &User) -> ValidationResult {
        let mut result = ValidationResult::new();
        let (record, assignments) = tokio::join!(
            self.validate_user_record(&user.external_id),
            self.validate_user_assignments(user.id, tenant_id),
        );
        for (scope, outcome) in [("record", record), ("assignments", assignments)] {
            match outcome {
                Ok(r) => result.merge(scope, r),
                Err(e) => result.add_error(format!("user {}: {}", user.id, e)),
            }
        }
        result
    }

    /// Collaboration group cache, group existence and expected memberships
    /// for a tenant.
    pub async fn validate_tenant_groups(&self, tenant_id: Uuid) -> ValidationResult {
        let mut result = ValidationResult::new();
        let subject = format!("groups of tenant {}", tenant_id);

        let tenant = match self
            .ctx
            .record("tenants.get", || self.ctx.store.tenants().get(tenant_id))
            .await
        {
            Ok(Some(tenant)) => tenant,
            Ok(None) => {
                result.add_error(format!("tenant {} not found", tenant_id));
                result.summarize(&subject);
                return result;
            }
            Err(e) => {
                result.add_warning(unverified(format!("tenant {}", tenant_id), &e));
                result.summarize(&subject);
                return result;
            }
        };
        let canonical = tenant.canonical_group_id().map(String::from);

        match self
            .ctx
            .record("collaboration_groups.get_for_tenant", || {
                self.ctx.store.collaboration_groups().get_for_tenant(tenant_id)
            })
            .await
        {
            Err(e) => result.add_warning(unverified("collaboration group cache", &e)),
            Ok(cache) => match (canonical.as_deref(), cache) {
                (None, Some(cache)) => result.add_error(format!(
                    "tenant has no canonical collaboration group; cache holds {}",
                    cache.group_id
                )),
                (None, None) => {
                    result.add_error("tenant has no canonical collaboration group".to_string())
                }
                (Some(canonical), None) => result.add_error(format!(
                    "collaboration group cache is missing for canonical {}",
                    canonical
                )),
                (Some(canonical), Some(cache)) if !same_external_id(canonical, &cache.group_id) => {
                    result.add_error(format!(
                        "collaboration group cache holds {}, diverges from canonical {}",
                        cache.group_id, canonical
                    ))
                }
                (Some(_), Some(_)) => {}
            },
        }

        let capabilities = match self
            .ctx
            .record("capability_types.list_for_tenant", || {
                self.ctx.store.capability_types().list_for_tenant(tenant_id)
            })
            .await
        {
            Ok(capabilities) => capabilities,
            Err(e) => {
                result.add_warning(unverified("capability types", &e));
                Vec::new()
            }
        };

        let mut referenced: Vec<String> = canonical.iter().cloned().collect();
        referenced.extend(
            capabilities
                .iter()
                .filter(|c| c.is_active)
                .filter_map(|c| c.canonical_group_id().map(String::from)),
        );
        let existence = self.validate_group_existence(&referenced).await;
        let gone: HashSet<String> = match existence.diagnostic("missing") {
            Some(DiagnosticValue::Ids(ids)) => ids.iter().map(|g| normalize_external_id(g)).collect(),
            _ => HashSet::new(),
        };
        result.merge("existence", existence);

        let loaded = tokio::try_join!(
            self.ctx.record("users.list_active_for_tenant", || {
                self.ctx.store.users().list_active_for_tenant(tenant_id)
            }),
            self.ctx.record("assignments.list_active_for_tenant", || {
                self.ctx.store.assignments().list_active_for_tenant(tenant_id)
            }),
        );
        let (users, assignments) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                result.add_warning(unverified(format!("memberships of tenant {}", tenant_id), &e));
                result.summarize(&subject);
                return result;
            }
        };

        let by_id: HashMap<Uuid, &CapabilityType> =
            capabilities.iter().map(|c| (c.id, c)).collect();
        let checked: Vec<(String, ValidationResult)> = stream::iter(users.iter())
            .map(|user| {
                let expected: Vec<String> =
                    expected_groups(user, &assignments, &by_id, canonical.as_deref())
                        .into_iter()
                        .filter(|g| !gone.contains(&normalize_external_id(g)))
                        .collect();
                async move {
                    let outcome = match self
                        .validate_group_memberships(&user.external_id, &expected)
                        .await
                    {
                        Ok(r) => r,
                        Err(e) => {
                            let mut r = ValidationResult::new();
                            r.add_error(format!("user {}: {}", user.id, e));
                            r
                        }
                    };
                    (user.external_id.clone(), outcome)
                }
            })
            .buffered(self.config.user_concurrency)
            .collect::<Vec<_>>()
            .boxed()
            .await;

        for (external_id, membership) in checked {
            result.merge(&format!("membership.{}", external_id), membership);
        }
        result.add_diagnostic("users_checked", DiagnosticValue::Count(users.len()));
        result.summarize(&subject);
        result
    }

    /// Validate every category of a tenant concurrently.
    pub async fn validate_all(&self, tenant_id: Uuid) -> Result<ComprehensiveStateSyncResult> {
        if tenant_id.is_nil() {
            return Err(Error::InvalidInput("tenant_id must be non-nil".to_string()));
        }
        let start = Instant::now();

        // Only a confirmed absence aborts; a failed lookup is left for the
        // categories to report as unverified.
        match self
            .ctx
            .record("tenants.get", || self.ctx.store.tenants().get(tenant_id))
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => return Err(Error::TenantNotFound(tenant_id)),
            Err(e) => warn!(
                subsystem = "engine",
                component = "validator",
                op = "validate_all",
                tenant_id = %tenant_id,
                error = %e,
                "Tenant lookup failed, validating with degraded coverage"
            ),
        }

        let (users, groups, credentials) = tokio::join!(
            self.validate_tenant_users(tenant_id),
            self.validate_tenant_groups(tenant_id),
            self.validate_credential_secrets(tenant_id),
        );
        let credentials = credentials.unwrap_or_else(|e| {
            let mut r = ValidationResult::new();
            r.add_warning(unverified("credential secrets", &e));
            r
        });

        let composite =
            ComprehensiveStateSyncResult::from_categories(tenant_id, users, groups, credentials);

        let duration_ms = start.elapsed().as_millis() as u64;
        if composite.is_fully_synced {
            info!(
                subsystem = "engine",
                component = "validator",
                op = "validate_all",
                tenant_id = %tenant_id,
                warning_count = composite.total_warnings(),
                duration_ms,
                "Tenant in sync"
            );
        } else {
            warn!(
                subsystem = "engine",
                component = "validator",
                op = "validate_all",
                tenant_id = %tenant_id,
                error_count = composite.total_errors(),
                warning_count = composite.total_warnings(),
                duration_ms,
                "Drift detected"
            );
        }
        Ok(composite)
    }
}

/// Groups a user should belong to: the canonical group of each active
/// assignment's capability type (falling back to the assignment's copy when
/// the type is unknown) plus the tenant's collaboration group.
fn expected_groups(
    user: &User,
    assignments: &[Assignment],
    capabilities: &HashMap<Uuid, &CapabilityType>,
    collaboration_group: Option<&str>,
) -> Vec<String> {
    let mut groups: Vec<String> = assignments
        .iter()
        .filter(|a| a.user_id == user.id)
        .filter_map(|a| match capabilities.get(&a.capability_type_id) {
            Some(capability) => capability.canonical_group_id().map(String::from),
            None => a.group_id().map(String::from),
        })
        .collect();
    groups.extend(collaboration_group.map(String::from));
    distinct_ids(&groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::test_support::harness;
    use statesync_core::defaults::{TAG_IS_ACTIVE, TAG_TENANT_ID};
    use statesync_core::mock::{self, MockDirectory};
    use statesync_core::CollaborationGroupCache;

    fn cache(tenant_id: Uuid, group_id: &str) -> CollaborationGroupCache {
        CollaborationGroupCache {
            id: Uuid::new_v4(),
            tenant_id,
            group_id: group_id.to_string(),
            display_name: "Acme collaboration".to_string(),
            description: None,
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_tenant_is_fully_synced() {
        let directory = MockDirectory::new()
            .with_group("collab", &["u1"])
            .with_group("g-sales", &["u1"]);
        let h = harness(directory);
        let tenant = mock::tenant("Acme", Some("collab"));
        let sales = mock::capability(tenant.id, "Sales", Some("g-sales"));
        let user = mock::user(tenant.id, "u1", &[sales.id]);
        let credential = mock::credential(tenant.id, "orders");
        let tenant_tag = tenant.id.to_string();
        for name in ["orders-password", "orders-conn"] {
            h.secrets.insert(
                name,
                None,
                "x",
                &[(TAG_TENANT_ID, tenant_tag.as_str()), (TAG_IS_ACTIVE, "true")],
            );
        }
        h.store.insert_tenant(tenant.clone());
        h.store.insert_cache(cache(tenant.id, "collab"));
        h.store.insert_capability(sales.clone());
        h.store.insert_assignment(mock::assignment(&user, &sales));
        h.store.insert_user(user);
        h.store.insert_credential(credential);

        let result = h.validator.validate_all(tenant.id).await.unwrap();
        assert!(result.is_fully_synced, "{:?}", result.critical_issues);
        assert!(result.critical_issues.is_empty());
        assert_eq!(result.total_warnings(), 0);
        assert!(result.summary().contains("in sync"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_directory_yields_warnings_not_errors() {
        let directory = MockDirectory::new()
            .with_group("collab", &["u1"])
            .with_group("g-sales", &["u1"]);
        directory.set_offline(true);
        let h = harness(directory);
        let tenant = mock::tenant("Acme", Some("collab"));
        let sales = mock::capability(tenant.id, "Sales", Some("g-sales"));
        let user = mock::user(tenant.id, "u1", &[sales.id]);
        h.store.insert_tenant(tenant.clone());
        h.store.insert_cache(cache(tenant.id, "collab"));
        h.store.insert_capability(sales.clone());
        h.store.insert_assignment(mock::assignment(&user, &sales));
        h.store.insert_user(user);

        let result = h.validator.validate_all(tenant.id).await.unwrap();
        assert_eq!(result.total_errors(), 0, "{:?}", result.critical_issues);
        assert!(result.group_result.warning_count() > 0);
        assert!(result
            .group_result
            .warnings
            .iter()
            .all(|w| w.starts_with("could not verify")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drift_in_one_category_fails_overall() {
        let directory = MockDirectory::new().with_group("collab", &["u1"]);
        let h = harness(directory);
        let tenant = mock::tenant("Acme", Some("collab"));
        let sales = mock::capability(tenant.id, "Sales", Some("g-deleted"));
        let user = mock::user(tenant.id, "u1", &[sales.id]);
        h.store.insert_tenant(tenant.clone());
        h.store.insert_cache(cache(tenant.id, "collab"));
        h.store.insert_capability(sales.clone());
        h.store.insert_assignment(mock::assignment(&user, &sales));
        h.store.insert_user(user);

        let result = h.validator.validate_all(tenant.id).await.unwrap();

        assert!(!result.is_fully_synced);
        assert!(result.user_result.is_valid);
        assert!(result.credential_result.is_valid);
        assert_eq!(
            result.group_result.errors,
            vec!["group g-deleted does not exist in the directory".to_string()]
        );
        // deleted groups are not re-reported as missing memberships
        assert_eq!(h.directory.member_reads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_diverging_collaboration_cache() {
        let directory = MockDirectory::new().with_group("G9", &[]).with_group("G7", &[]);
        let h = harness(directory);
        let tenant = mock::tenant("Acme", Some("G9"));
        h.store.insert_tenant(tenant.clone());
        h.store.insert_cache(cache(tenant.id, "G7"));

        let result = h.validator.validate_tenant_groups(tenant.id).await;
        assert_eq!(
            result.errors,
            vec!["collaboration group cache holds G7, diverges from canonical G9".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_failures_are_isolated() {
        let directory = MockDirectory::new()
            .with_group("collab", &["u1", "u2"]);
        let h = harness(directory);
        let tenant = mock::tenant("Acme", Some("collab"));
        h.store.insert_tenant(tenant.clone());
        h.store.insert_cache(cache(tenant.id, "collab"));
        h.store.insert_user(mock::user(tenant.id, "u1", &[]));
        h.store.insert_user(mock::user(tenant.id, "u2", &[]));
        h.directory.fail_user("u1");

        let result = h.validator.validate_tenant_groups(tenant.id).await;
        assert!(result.is_valid);
        assert_eq!(result.warning_count(), 1);
        assert!(result.warnings[0].contains("user u1"));
        assert_eq!(
            result.diagnostic("membership.u2.forward_reads"),
            Some(&DiagnosticValue::Count(1))
        );
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_an_error() {
        let h = harness(MockDirectory::new());
        assert!(matches!(
            h.validator.validate_all(Uuid::new_v4()).await,
            Err(Error::TenantNotFound(_))
        ));
        assert!(matches!(
            h.validator.validate_all(Uuid::nil()).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_tenant_lookup_still_produces_a_result() {
        let h = harness(MockDirectory::new());
        let tenant = mock::tenant("Acme", None);
        h.store.insert_tenant(tenant.clone());
        h.store.fail_tenant(tenant.id);

        let result = h.validator.validate_all(tenant.id).await.unwrap();
        assert!(result.group_result.is_valid);
        assert!(result
            .group_result
            .warnings
            .iter()
            .any(|w| w.starts_with("could not verify tenant")));
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_rejected() {
        let h = harness(MockDirectory::new());
        assert!(matches!(
            h.validator.validate_all(Uuid::new_v4()).await,
            Err(Error::TenantNotFound(_))
        ));
    }

    #[test]
    fn test_expected_groups_prefer_canonical_over_copy() {
        let tenant_id = Uuid::new_v4();
        let sales = mock::capability(tenant_id, "Sales", Some("G2"));
        let user = mock::user(tenant_id, "u1", &[sales.id]);
        let mut a = mock::assignment(&user, &sales);
        a.security_group_id = Some("G1".to_string());
        let caps: HashMap<Uuid, &CapabilityType> = [(sales.id, &sales)].into_iter().collect();

        assert_eq!(
            expected_groups(&user, &[a], &caps, Some("collab")),
            vec!["G2".to_string(), "collab".to_string()]
        );
    }
}
