//! Single user record checks.

use tracing::trace;

use statesync_core::{DiagnosticValue, Error, Result, ValidationResult};

use super::{unverified, Validator};

impl Validator {
    /// Check one user record for required fields, status/flag consistency
    /// and leftover legacy capability lists.
    ///
    /// A legacy list is reported, never migrated.
    pub async fn validate_user_record(&self, external_id: &str) -> Result<ValidationResult> {
        let external_id = external_id.trim();
        if external_id.is_empty() {
            return Err(Error::InvalidInput("external_id must be non-empty".to_string()));
        }

        let mut result = ValidationResult::new();
        let subject = format!("user record {}", external_id);

        let user = match self
            .ctx
            .record("users.get_by_external_id", || {
                self.ctx.store.users().get_by_external_id(external_id)
            })
            .await
        {
            Ok(Some(user)) => user,
            Ok(None) => {
                result.add_error(format!("user {} not found", external_id));
                result.summarize(&subject);
                return Ok(result);
            }
            Err(e) => {
                result.add_warning(unverified(format!("user {}", external_id), &e));
                result.summarize(&subject);
                return Ok(result);
            }
        };

        for (field, value) in [
            ("external_id", user.external_id.as_str()),
            ("email", user.email.as_str()),
            ("display_name", user.display_name.as_str()),
        ] {
            if value.trim().is_empty() {
                result.add_error(format!("required field {} is empty", field));
            }
        }

        if user.status.expects_active_flag() != user.is_active {
            result.add_error(format!(
                "status {} inconsistent with is_active={}",
                user.status, user.is_active
            ));
        }

        let legacy = user.legacy_capability_type_ids.len();
        if legacy > 0 {
            if user.capability_type_ids.is_empty() {
                result.add_warning(format!(
                    "legacy capability list holds {} id(s) while the current list is empty",
                    legacy
                ));
            } else {
                result.add_warning(format!(
                    "legacy capability list still populated ({} id(s)) alongside the current list",
                    legacy
                ));
            }
        }

        result.add_diagnostic("status", DiagnosticValue::Text(user.status.to_string()));
        result.add_diagnostic("capabilities", DiagnosticValue::Count(user.capability_type_ids.len()));
        result.add_diagnostic("legacy_capabilities", DiagnosticValue::Count(legacy));
        result.summarize(&subject);

        trace!(
            subsystem = "engine",
            component = "validator",
            op = "validate_user_record",
            external_id,
            error_count = result.error_count(),
            "User record checked"
        );
        Ok(result)
    }
}
