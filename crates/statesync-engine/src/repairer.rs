//! Targeted repairs that push records toward their canonical source.
//!
//! Every repair reads before it writes and writes only what differs, so a
//! re-run against consistent state performs no writes. Direction is fixed:
//! canonical fields (tenant collaboration group, capability type security
//! group, credential activation flag) are never overwritten from a copy,
//! with one exception: a tenant without any canonical collaboration group
//! adopts a cached id that still exists in the directory.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use statesync_core::defaults::TAG_IS_ACTIVE;
use statesync_core::{
    same_external_id, CapabilityType, CollaborationGroupCache, DiagnosticValue, Error, Result,
    SecretReference, ValidationResult,
};

use crate::context::EngineContext;
use crate::validator::{credential_secret_refs, distinct_ids, fetch_secret, unverified};

/// Value produced by a repair plus the report of what was checked and
/// written.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairOutcome<T> {
    pub value: T,
    pub report: ValidationResult,
}

/// Write-side counterpart of the [`Validator`](crate::Validator).
#[derive(Clone)]
pub struct Repairer {
    ctx: EngineContext,
}

impl Repairer {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Point the tenant's collaboration group cache at the canonical id.
    ///
    /// Returns the collaboration group id the tenant ends up with, if any.
    pub async fn repair_collaboration_group(
        &self,
        tenant_id: Uuid,
    ) -> Result<RepairOutcome<Option<String>>> {
        if tenant_id.is_nil() {
            return Err(Error::InvalidInput("tenant_id must be non-nil".to_string()));
        }
        let mut report = ValidationResult::new();

        let tenant = self
            .ctx
            .record("tenants.get", || self.ctx.store.tenants().get(tenant_id))
            .await?
            .ok_or(Error::TenantNotFound(tenant_id))?;
        let cache = self
            .ctx
            .record("collaboration_groups.get_for_tenant", || {
                self.ctx.store.collaboration_groups().get_for_tenant(tenant_id)
            })
            .await?;

        let value = match tenant.canonical_group_id() {
            Some(canonical) => {
                let target = match cache {
                    Some(cache) if same_external_id(&cache.group_id, canonical) => None,
                    Some(cache) => {
                        report.add_repair(format!(
                            "collaboration group cache re-pointed from {} to {}",
                            cache.group_id, canonical
                        ));
                        Some(CollaborationGroupCache {
                            group_id: canonical.to_string(),
                            updated_at: Utc::now(),
                            ..cache
                        })
                    }
                    None => {
                        report.add_repair(format!(
                            "collaboration group cache created for {}",
                            canonical
                        ));
                        Some(CollaborationGroupCache {
                            id: Uuid::new_v4(),
                            tenant_id,
                            group_id: canonical.to_string(),
                            display_name: tenant.name.clone(),
                            description: None,
                            updated_at: Utc::now(),
                        })
                    }
                };
                if let Some(target) = target {
                    self.ctx
                        .record("collaboration_groups.upsert", || {
                            self.ctx.store.collaboration_groups().upsert(&target)
                        })
                        .await?;
                }
                Some(canonical.to_string())
            }
            None => {
                let cached = cache
                    .map(|c| c.group_id.trim().to_string())
                    .filter(|g| !g.is_empty());
                match cached {
                    None => {
                        report.add_error(
                            "tenant has no collaboration group and no cached id to promote; provisioning belongs to onboarding",
                        );
                        None
                    }
                    Some(cached) => match self.ctx.directory.group_exists(&cached).await {
                        Ok(true) => {
                            self.ctx
                                .record("tenants.set_collaboration_group_id", || {
                                    self.ctx
                                        .store
                                        .tenants()
                                        .set_collaboration_group_id(tenant_id, &cached)
                                })
                                .await?;
                            report.add_repair(format!(
                                "promoted cached collaboration group {} to the tenant's canonical id",
                                cached
                            ));
                            Some(cached)
                        }
                        Ok(false) => {
                            report.add_error(format!(
                                "cached collaboration group {} does not exist in the directory; provisioning belongs to onboarding",
                                cached
                            ));
                            None
                        }
                        Err(e) => {
                            report.add_warning(unverified(
                                format!("cached collaboration group {}", cached),
                                &e,
                            ));
                            None
                        }
                    },
                }
            }
        };

        report.summarize(&format!("collaboration group repair for tenant {}", tenant_id));
        self.log_outcome("repair_collaboration_group", tenant_id, &report);
        Ok(RepairOutcome { value, report })
    }

    /// Re-point a user's assignment copies at their capability types'
    /// canonical security groups, then existence-check every referenced
    /// group.
    ///
    /// Returns only the group ids confirmed to exist.
    pub async fn repair_security_group_references(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<RepairOutcome<Vec<String>>> {
        if user_id.is_nil() || tenant_id.is_nil() {
            return Err(Error::InvalidInput(
                "user_id and tenant_id must be non-nil".to_string(),
            ));
        }
        let mut report = ValidationResult::new();

        let (assignments, capabilities) = tokio::try_join!(
            self.ctx.record("assignments.list_active_for_user", || {
                self.ctx
                    .store
                    .assignments()
                    .list_active_for_user(user_id, tenant_id)
            }),
            self.ctx.record("capability_types.list_for_tenant", || {
                self.ctx.store.capability_types().list_for_tenant(tenant_id)
            }),
        )?;
        let capabilities: HashMap<Uuid, &CapabilityType> =
            capabilities.iter().map(|c| (c.id, c)).collect();

        let mut candidates: Vec<String> = Vec::new();
        let mut repaired = 0;
        for assignment in &assignments {
            let capability = capabilities.get(&assignment.capability_type_id);
            let canonical = capability.and_then(|c| c.canonical_group_id());
            match (canonical, assignment.group_id()) {
                (Some(canonical), Some(copy)) if same_external_id(canonical, copy) => {
                    candidates.push(canonical.to_string());
                }
                (Some(canonical), copy) => {
                    let written = self
                        .ctx
                        .record("assignments.update_security_group", || {
                            self.ctx
                                .store
                                .assignments()
                                .update_security_group(assignment.id, canonical)
                        })
                        .await;
                    match written {
                        Ok(()) => {
                            repaired += 1;
                            report.add_repair(format!(
                                "assignment {} re-pointed from {} to {}",
                                assignment.id,
                                copy.unwrap_or("<empty>"),
                                canonical
                            ));
                            candidates.push(canonical.to_string());
                        }
                        Err(e) => report.add_error(format!(
                            "failed to re-point assignment {}: {}",
                            assignment.id, e
                        )),
                    }
                }
                (None, copy) => {
                    let name = capability
                        .map(|c| c.name.clone())
                        .unwrap_or_else(|| assignment.capability_type_id.to_string());
                    report.add_error(format!(
                        "assignment {} for capability {} is unrepairable: no canonical security group reference",
                        assignment.id, name
                    ));
                    if let Some(copy) = copy {
                        candidates.push(copy.to_string());
                    }
                }
            }
        }

        let mut valid = Vec::new();
        for group in distinct_ids(&candidates) {
            match self.ctx.directory.group_exists(&group).await {
                Ok(true) => valid.push(group),
                Ok(false) => {
                    report.add_error(format!("group {} does not exist in the directory", group))
                }
                Err(e) => report.add_warning(unverified(format!("group {}", group), &e)),
            }
        }

        report.add_diagnostic("assignments", DiagnosticValue::Count(assignments.len()));
        report.add_diagnostic("repaired", DiagnosticValue::Count(repaired));
        report.add_diagnostic("valid", DiagnosticValue::Ids(valid.clone()));
        report.summarize(&format!("security group reference repair for user {}", user_id));
        self.log_outcome("repair_security_group_references", tenant_id, &report);
        Ok(RepairOutcome {
            value: valid,
            report,
        })
    }

    /// Rewrite the activation tag of every secret a tenant's credentials
    /// reference so it mirrors the credential's `is_active` flag.
    ///
    /// Values and the store-level enabled state are untouched. Returns the
    /// number of secrets re-tagged.
    pub async fn repair_credential_activation_tags(
        &self,
        tenant_id: Uuid,
    ) -> Result<RepairOutcome<usize>> {
        if tenant_id.is_nil() {
            return Err(Error::InvalidInput("tenant_id must be non-nil".to_string()));
        }
        let mut report = ValidationResult::new();

        let credentials = self
            .ctx
            .record("credentials.list_for_tenant", || {
                self.ctx.store.credentials().list_for_tenant(tenant_id)
            })
            .await?;

        let mut retagged = 0;
        for credential in &credentials {
            let expected = credential.is_active.to_string();
            for (role, raw) in credential_secret_refs(credential) {
                let reference = match SecretReference::parse(raw) {
                    Ok(reference) => reference,
                    Err(e) => {
                        report.add_error(format!(
                            "credential {}: {} secret reference is malformed: {}",
                            credential.name, role, e
                        ));
                        continue;
                    }
                };
                let secret = match fetch_secret(self.ctx.secrets.as_ref(), &reference).await {
                    Ok(Some(secret)) => secret,
                    Ok(None) => {
                        report.add_error(format!(
                            "credential {}: {} secret {} does not exist; cannot set activation tag",
                            credential.name, role, reference
                        ));
                        continue;
                    }
                    Err(e) => {
                        report.add_warning(unverified(
                            format!("credential {} {} secret {}", credential.name, role, reference),
                            &e,
                        ));
                        continue;
                    }
                };
                if secret
                    .tag(TAG_IS_ACTIVE)
                    .is_some_and(|t| t.trim().eq_ignore_ascii_case(&expected))
                {
                    continue;
                }

                let mut tags = secret.tags.clone();
                tags.insert(TAG_IS_ACTIVE.to_string(), expected.clone());
                let version = secret.version.as_deref().or(reference.version.as_deref());
                match self
                    .ctx
                    .secrets
                    .update_secret_tags(&reference.name, version, &tags)
                    .await
                {
                    Ok(()) => {
                        retagged += 1;
                        report.add_repair(format!(
                            "credential {}: {} secret {} activation tag set to {}",
                            credential.name, role, reference, expected
                        ));
                    }
                    Err(e) => report.add_error(format!(
                        "credential {}: failed to set activation tag on {} secret {}: {}",
                        credential.name, role, reference, e
                    )),
                }
            }
        }

        report.add_diagnostic("credentials", DiagnosticValue::Count(credentials.len()));
        report.add_diagnostic("retagged", DiagnosticValue::Count(retagged));
        report.summarize(&format!("credential activation tag repair for tenant {}", tenant_id));
        self.log_outcome("repair_credential_activation_tags", tenant_id, &report);
        Ok(RepairOutcome {
            value: retagged,
            report,
        })
    }

    fn log_outcome(&self, op: &str, tenant_id: Uuid, report: &ValidationResult) {
        if report.is_valid {
            info!(
                subsystem = "engine",
                component = "repairer",
                op,
                tenant_id = %tenant_id,
                repair_count = report.repairs.len(),
                warning_count = report.warning_count(),
                "{}",
                report.summary
            );
        } else {
            warn!(
                subsystem = "engine",
                component = "repairer",
                op,
                tenant_id = %tenant_id,
                repair_count = report.repairs.len(),
                error_count = report.error_count(),
                "{}",
                report.summary
            );
        }
    }
}
