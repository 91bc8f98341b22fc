//! Credential records vs. the secrets they reference.

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tracing::debug;
use uuid::Uuid;

use statesync_core::defaults::{CONSOLIDATED_REQUIRED_TAGS, TAG_IS_ACTIVE, TAG_TENANT_ID};
use statesync_core::{
    same_external_id, CredentialRecord, DiagnosticValue, Error, Result, Secret, SecretReference,
    SecretRole, SecretStoreClient, ValidationResult,
};

use super::{unverified, Validator};

/// Every secret reference a credential carries, tagged with its role.
pub(crate) fn credential_secret_refs(credential: &CredentialRecord) -> Vec<(SecretRole, &str)> {
    let mut refs = vec![
        (SecretRole::Password, credential.password_secret_ref.as_str()),
        (
            SecretRole::ConnectionString,
            credential.connection_string_secret_ref.as_str(),
        ),
    ];
    if let Some(consolidated) = credential.consolidated_secret_ref.as_deref() {
        refs.push((SecretRole::Consolidated, consolidated));
    }
    refs
}

/// Resolve a reference: the pinned version when it has one, else the latest.
pub(crate) async fn fetch_secret(
    secrets: &dyn SecretStoreClient,
    reference: &SecretReference,
) -> Result<Option<Secret>> {
    match reference.version.as_deref() {
        Some(version) => secrets.get_secret_version(&reference.name, version).await,
        None => secrets.get_secret_with_tags(&reference.name).await,
    }
}

impl Validator {
    /// Check every active credential of a tenant against the secret store:
    /// each referenced secret exists, carries the owning tenant's tag and an
    /// activation tag mirroring the credential, and a consolidated secret
    /// carries its connection sub-fields as tags.
    pub async fn validate_credential_secrets(&self, tenant_id: Uuid) -> Result<ValidationResult> {
        if tenant_id.is_nil() {
            return Err(Error::InvalidInput("tenant_id must be non-nil".to_string()));
        }

        let mut result = ValidationResult::new();
        let subject = format!("credential secrets for tenant {}", tenant_id);

        let credentials = match self
            .ctx
            .record("credentials.list_for_tenant", || {
                self.ctx.store.credentials().list_for_tenant(tenant_id)
            })
            .await
        {
            Ok(credentials) => credentials,
            Err(e) => {
                result.add_warning(unverified(format!("credentials of tenant {}", tenant_id), &e));
                result.summarize(&subject);
                return Ok(result);
            }
        };

        let active: Vec<&CredentialRecord> = credentials.iter().filter(|c| c.is_active).collect();
        let checked: Vec<(String, ValidationResult)> = stream::iter(active.iter().copied())
            .map(|credential| async move {
                (
                    credential.name.clone(),
                    self.check_credential(tenant_id, credential).await,
                )
            })
            .buffered(self.config.user_concurrency)
            .collect::<Vec<_>>()
            .boxed()
            .await;

        for (name, credential_result) in checked {
            result.merge(&format!("credential.{}", name), credential_result);
        }

        result.add_diagnostic("credentials", DiagnosticValue::Count(credentials.len()));
        result.add_diagnostic("active", DiagnosticValue::Count(active.len()));
        result.summarize(&subject);

        debug!(
            subsystem = "engine",
            component = "validator",
            op = "validate_credential_secrets",
            tenant_id = %tenant_id,
            error_count = result.error_count(),
            warning_count = result.warning_count(),
            "Credential secrets validated"
        );
        Ok(result)
    }

    async fn check_credential(&self, tenant_id: Uuid, credential: &CredentialRecord) -> ValidationResult {
        let mut result = ValidationResult::new();
        let name = &credential.name;
        let expected_activation = credential.is_active.to_string();
        let mut secrets_checked = 0;

        for (role, raw) in credential_secret_refs(credential) {
            let reference = match SecretReference::parse(raw) {
                Ok(reference) => reference,
                Err(e) => {
                    result.add_error(format!(
                        "credential {}: {} secret reference is malformed: {}",
                        name, role, e
                    ));
                    continue;
                }
            };

            let secret = match fetch_secret(self.ctx.secrets.as_ref(), &reference).await {
                Ok(Some(secret)) => secret,
                Ok(None) => {
                    result.add_error(format!(
                        "credential {}: {} secret {} does not exist",
                        name, role, reference
                    ));
                    continue;
                }
                Err(e) => {
                    result.add_warning(unverified(
                        format!("credential {} {} secret {}", name, role, reference),
                        &e,
                    ));
                    continue;
                }
            };
            secrets_checked += 1;

            match secret.tag(TAG_TENANT_ID) {
                None => result.add_error(format!(
                    "credential {}: {} secret missing required tag {}",
                    name, role, TAG_TENANT_ID
                )),
                Some(tag) if !same_external_id(tag, &tenant_id.to_string()) => {
                    result.add_error(format!(
                        "credential {}: {} secret tenant tag mismatch (tagged {}, owner {})",
                        name, role, tag, tenant_id
                    ))
                }
                Some(_) => {}
            }

            match secret.tag(TAG_IS_ACTIVE) {
                None => result.add_error(format!(
                    "credential {}: {} secret has no activation tag",
                    name, role
                )),
                Some(tag) if !tag.trim().eq_ignore_ascii_case(&expected_activation) => {
                    result.add_error(format!(
                        "credential {}: {} secret activation tag is {}, credential is_active={}",
                        name, role, tag, credential.is_active
                    ))
                }
                Some(_) => {}
            }

            if role == SecretRole::Consolidated {
                for tag in CONSOLIDATED_REQUIRED_TAGS {
                    if secret.tag(tag).map(str::trim).unwrap_or_default().is_empty() {
                        result.add_error(format!(
                            "credential {}: consolidated secret missing required tag {}",
                            name, tag
                        ));
                    }
                }
                if let Some(engine) = secret.tag("engine") {
                    if !engine.trim().is_empty() && !engine.eq_ignore_ascii_case(&credential.engine) {
                        result.add_error(format!(
                            "credential {}: consolidated secret engine tag {} differs from record engine {}",
                            name, engine, credential.engine
                        ));
                    }
                }
            }

            if !secret.enabled {
                result.add_warning(format!(
                    "credential {}: {} secret {} is disabled in the store; activation belongs in the {} tag",
                    name, role, reference, TAG_IS_ACTIVE
                ));
            }
        }

        result.add_diagnostic("secrets_checked", DiagnosticValue::Count(secrets_checked));
        result
    }
}
