//! Intended capability ids vs. active assignment records.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use tracing::debug;
use uuid::Uuid;

use statesync_core::{
    same_external_id, CapabilityType, DiagnosticValue, Error, Result, ValidationResult,
};

use super::{unverified, Validator};

/// Split two collections into `(intended - actual, actual - intended)`.
///
/// Both outputs keep the order of their source and contain no duplicates.
pub fn diff_sets<T: Eq + Hash + Clone>(intended: &[T], actual: &[T]) -> (Vec<T>, Vec<T>) {
    let actual_set: HashSet<&T> = actual.iter().collect();
    let intended_set: HashSet<&T> = intended.iter().collect();

    let mut seen = HashSet::new();
    let missing = intended
        .iter()
        .filter(|x| !actual_set.contains(x) && seen.insert(*x))
        .cloned()
        .collect();
    let mut seen = HashSet::new();
    let extra = actual
        .iter()
        .filter(|x| !intended_set.contains(x) && seen.insert(*x))
        .cloned()
        .collect();
    (missing, extra)
}

impl Validator {
    /// Compare a user's intended capability types with their active
    /// assignments, and every assignment's copied group reference with its
    /// capability type's canonical one.
    pub async fn validate_user_assignments(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<ValidationResult> {
        if user_id.is_nil() || tenant_id.is_nil() {
            return Err(Error::InvalidInput(
                "user_id and tenant_id must be non-nil".to_string(),
            ));
        }

        let mut result = ValidationResult::new();
        let subject = format!("assignments for user {}", user_id);

        let user = match self
            .ctx
            .record("users.get", || self.ctx.store.users().get(user_id))
            .await
        {
            Ok(Some(user)) => user,
            Ok(None) => {
                result.add_error(format!("user {} not found", user_id));
                result.summarize(&subject);
                return Ok(result);
            }
            Err(e) => {
                result.add_warning(unverified(format!("user {}", user_id), &e));
                result.summarize(&subject);
                return Ok(result);
            }
        };

        if user.tenant_id != tenant_id {
            result.add_error(format!(
                "user {} belongs to tenant {}, inconsistent with tenant {}",
                user_id, user.tenant_id, tenant_id
            ));
            result.summarize(&subject);
            return Ok(result);
        }

        let loaded = tokio::try_join!(
            self.ctx.record("assignments.list_active_for_user", || {
                self.ctx
                    .store
                    .assignments()
                    .list_active_for_user(user_id, tenant_id)
            }),
            self.ctx.record("capability_types.list_for_tenant", || {
                self.ctx.store.capability_types().list_for_tenant(tenant_id)
            }),
        );
        let (assignments, capabilities) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                result.add_warning(unverified(format!("assignments of user {}", user_id), &e));
                result.summarize(&subject);
                return Ok(result);
            }
        };

        let capabilities: HashMap<Uuid, &CapabilityType> =
            capabilities.iter().map(|c| (c.id, c)).collect();
        let name_of = |id: &Uuid| {
            capabilities
                .get(id)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| id.to_string())
        };

        let actual: Vec<Uuid> = assignments.iter().map(|a| a.capability_type_id).collect();
        let (missing, extra) = diff_sets(&user.capability_type_ids, &actual);

        for id in &missing {
            result.add_error(format!("missing assignment for capability {}", name_of(id)));
        }
        for id in &extra {
            result.add_warning(format!(
                "assignment for capability {} is not in the user's intended capabilities",
                name_of(id)
            ));
        }

        let mut seen = HashSet::new();
        for id in &actual {
            if !seen.insert(*id) {
                result.add_warning(format!(
                    "duplicate active assignment for capability {}",
                    name_of(id)
                ));
            }
        }

        let mut stale = Vec::new();
        for assignment in &assignments {
            let Some(capability) = capabilities.get(&assignment.capability_type_id) else {
                result.add_error(format!(
                    "assignment {} references unknown capability type {} (inconsistent record)",
                    assignment.id, assignment.capability_type_id
                ));
                continue;
            };
            match (capability.canonical_group_id(), assignment.group_id()) {
                (None, _) => {
                    result.add_error(format!(
                        "capability {} has no security group reference",
                        capability.name
                    ));
                }
                (Some(canonical), Some(copy)) if same_external_id(canonical, copy) => {}
                (Some(canonical), copy) => {
                    result.add_error(format!(
                        "stale group reference in assignment {} for capability {}: holds {}, canonical is {}",
                        assignment.id,
                        capability.name,
                        copy.unwrap_or("<empty>"),
                        canonical
                    ));
                    stale.push(assignment.id.to_string());
                }
            }
        }

        result.add_diagnostic("intended", DiagnosticValue::Count(user.capability_type_ids.len()));
        result.add_diagnostic("actual", DiagnosticValue::Count(assignments.len()));
        result.add_diagnostic(
            "missing",
            DiagnosticValue::Ids(missing.iter().map(Uuid::to_string).collect()),
        );
        result.add_diagnostic(
            "extra",
            DiagnosticValue::Ids(extra.iter().map(Uuid::to_string).collect()),
        );
        result.add_diagnostic("stale", DiagnosticValue::Ids(stale));
        result.summarize(&subject);

        debug!(
            subsystem = "engine",
            component = "validator",
            op = "validate_user_assignments",
            user_id = %user_id,
            tenant_id = %tenant_id,
            error_count = result.error_count(),
            warning_count = result.warning_count(),
            "Assignments validated"
        );
        Ok(result)
    }
}
