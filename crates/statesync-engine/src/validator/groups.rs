//! Directory group membership and existence checks.
//!
//! The directory's user → groups read path lags group writes. A membership
//! missing from the forward read is re-read a bounded number of times and
//! then confirmed against the group → members path before it counts as
//! drift.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use tracing::{debug, info, trace};

use statesync_core::{
    normalize_external_id, same_external_id, DiagnosticValue, Error, Result, ValidationResult,
};

use super::{unverified, Validator};

/// Non-blank ids, deduplicated case-insensitively, first spelling kept.
pub(crate) fn distinct_ids<S: AsRef<str>>(ids: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|id| id.as_ref().trim())
        .filter(|id| !id.is_empty() && seen.insert(normalize_external_id(id)))
        .map(String::from)
        .collect()
}

enum Existence {
    Present,
    Missing,
    Unverified(Error),
}

impl Validator {
    /// Check that `user_external_id` is a member of every expected group.
    pub async fn validate_group_memberships(
        &self,
        user_external_id: &str,
        expected_group_ids: &[String],
    ) -> Result<ValidationResult> {
        let user = user_external_id.trim();
        if user.is_empty() {
            return Err(Error::InvalidInput(
                "user external id must be non-empty".to_string(),
            ));
        }

        let mut result = ValidationResult::new();
        let subject = format!("group memberships of user {}", user);
        let expected = distinct_ids(expected_group_ids);
        result.add_diagnostic("expected", DiagnosticValue::Count(expected.len()));
        if expected.is_empty() {
            result.summarize(&subject);
            return Ok(result);
        }

        let mut reads = 0u32;
        let missing = loop {
            reads += 1;
            let observed: HashSet<String> = match self.ctx.directory.get_user_groups(user).await {
                Ok(groups) => groups.iter().map(|g| normalize_external_id(g)).collect(),
                Err(e) => {
                    result.add_warning(unverified(format!("group memberships of user {}", user), &e));
                    result.add_diagnostic("forward_reads", DiagnosticValue::Count(reads as usize));
                    result.summarize(&subject);
                    return Ok(result);
                }
            };
            let missing: Vec<String> = expected
                .iter()
                .filter(|g| !observed.contains(&normalize_external_id(g)))
                .cloned()
                .collect();

            if missing.is_empty() || reads > self.config.membership_retry_attempts {
                break missing;
            }
            debug!(
                subsystem = "engine",
                component = "validator",
                op = "validate_group_memberships",
                external_id = user,
                read = reads,
                missing = missing.len(),
                "Expected memberships absent from forward read, re-reading"
            );
            tokio::time::sleep(self.config.membership_retry_delay).await;
        };

        if reads > 1 && missing.is_empty() {
            info!(
                subsystem = "engine",
                component = "validator",
                op = "validate_group_memberships",
                external_id = user,
                "Memberships resolved after {} reads",
                reads
            );
        }

        let mut confirmed_missing = Vec::new();
        let mut lagging = Vec::new();
        for group in &missing {
            match self.ctx.directory.get_group_members(group).await {
                Ok(members) if members.iter().any(|m| same_external_id(m, user)) => {
                    result.add_warning(format!(
                        "directory read-path inconsistency: user {} is listed in group {} but the group is absent from the user's memberships",
                        user, group
                    ));
                    lagging.push(group.clone());
                }
                Ok(_) => {
                    result.add_error(format!(
                        "user {} is not a member of expected group {}",
                        user, group
                    ));
                    confirmed_missing.push(group.clone());
                }
                Err(e) => {
                    result.add_warning(unverified(
                        format!("membership of user {} in group {}", user, group),
                        &e,
                    ));
                }
            }
        }

        result.add_diagnostic("forward_reads", DiagnosticValue::Count(reads as usize));
        result.add_diagnostic("retried", DiagnosticValue::Flag(reads > 1));
        result.add_diagnostic("missing", DiagnosticValue::Ids(confirmed_missing));
        result.add_diagnostic("read_path_inconsistent", DiagnosticValue::Ids(lagging));
        result.summarize(&subject);
        Ok(result)
    }

    /// Check that every group id exists in the directory.
    ///
    /// A failed check affects only that id and is reported as a warning.
    pub async fn validate_group_existence(&self, group_ids: &[String]) -> ValidationResult {
        let mut result = ValidationResult::new();
        let ids = distinct_ids(group_ids);

        let checks: Vec<(String, Existence)> = stream::iter(ids.iter().cloned())
            .map(|id| async move {
                let outcome = match self.ctx.directory.group_exists(&id).await {
                    Ok(true) => Existence::Present,
                    Ok(false) => Existence::Missing,
                    Err(e) => Existence::Unverified(e),
                };
                (id, outcome)
            })
            .buffered(self.config.user_concurrency)
            .collect::<Vec<_>>()
            .boxed()
            .await;

        let mut missing = Vec::new();
        let mut unverified_ids = Vec::new();
        for (id, outcome) in checks {
            match outcome {
                Existence::Present => {
                    trace!(
                        subsystem = "engine",
                        component = "validator",
                        op = "validate_group_existence",
                        group_id = %id,
                        "Group exists"
                    );
                }
                Existence::Missing => {
                    result.add_error(format!("group {} does not exist in the directory", id));
                    missing.push(id);
                }
                Existence::Unverified(e) => {
                    result.add_warning(unverified(format!("group {}", id), &e));
                    unverified_ids.push(id);
                }
            }
        }

        result.add_diagnostic("checked", DiagnosticValue::Count(ids.len()));
        result.add_diagnostic("missing", DiagnosticValue::Ids(missing));
        result.add_diagnostic("unverified", DiagnosticValue::Ids(unverified_ids));
        result.summarize("group existence");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::test_support::harness;
    use statesync_core::mock::MockDirectory;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_distinct_ids_dedupes_ignoring_case() {
        assert_eq!(distinct_ids(&["G1", " g1 ", "", "G2"][..]), vec!["G1", "G2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_memberships_visible() {
        let h = harness(MockDirectory::new().with_group("g1", &["u1"]).with_group("g2", &["u1"]));
        let result = h
            .validator
            .validate_group_memberships("u1", &ids(&["G1", "g2"]))
            .await
            .unwrap();
        assert!(result.is_valid);
        assert!(result.warnings.is_empty());
        assert_eq!(h.directory.user_reads(), 1);
        assert_eq!(h.directory.member_reads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lagging_forward_read_resolves_on_retry() {
        let h = harness(MockDirectory::new().with_group("g1", &["u1"]));
        h.directory.hide_from_user_reads("u1", "g1", Some(2));

        let result = h
            .validator
            .validate_group_memberships("u1", &ids(&["g1"]))
            .await
            .unwrap();

        assert!(result.is_valid);
        assert!(result.warnings.is_empty());
        assert_eq!(h.directory.user_reads(), 3);
        assert_eq!(result.diagnostic("retried"), Some(&DiagnosticValue::Flag(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverse_check_downgrades_to_warning() {
        let h = harness(MockDirectory::new().with_group("g1", &["u1"]));
        h.directory.hide_from_user_reads("u1", "g1", None);

        let result = h
            .validator
            .validate_group_memberships("u1", &ids(&["g1"]))
            .await
            .unwrap();

        assert!(result.is_valid);
        assert_eq!(result.warning_count(), 1);
        assert!(result.warnings[0].starts_with("directory read-path inconsistency"));
        // one initial read plus the configured re-reads
        assert_eq!(h.directory.user_reads(), 4);
        assert_eq!(h.directory.member_reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_on_both_paths_is_an_error() {
        let h = harness(MockDirectory::new().with_group("g1", &[]));

        let result = h
            .validator
            .validate_group_memberships("u1", &ids(&["g1"]))
            .await
            .unwrap();

        assert_eq!(
            result.errors,
            vec!["user u1 is not a member of expected group g1".to_string()]
        );
        assert_eq!(
            result.diagnostic("missing"),
            Some(&DiagnosticValue::Ids(ids(&["g1"])))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_forward_read_failure_is_unverified() {
        let h = harness(MockDirectory::new().with_group("g1", &["u1"]));
        h.directory.fail_user("u1");

        let result = h
            .validator
            .validate_group_memberships("u1", &ids(&["g1"]))
            .await
            .unwrap();
        assert!(result.is_valid);
        assert!(result.warnings[0].starts_with("could not verify"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_existence_failure_is_isolated_per_group() {
        let h = harness(MockDirectory::new().with_group("g1", &[]).with_group("g3", &[]));
        h.directory.fail_group("g3");

        let result = h
            .validator
            .validate_group_existence(&ids(&["g1", "g2", "g3"]))
            .await;

        assert_eq!(
            result.errors,
            vec!["group g2 does not exist in the directory".to_string()]
        );
        assert_eq!(result.warning_count(), 1);
        assert!(result.warnings[0].starts_with("could not verify group g3"));
        assert_eq!(
            result.diagnostic("unverified"),
            Some(&DiagnosticValue::Ids(ids(&["g3"])))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reverse_check_is_unverified() {
        let h = harness(MockDirectory::new().with_group("g1", &["u1"]));
        h.directory.hide_from_user_reads("u1", "g1", None);
        h.directory.fail_group("g1");

        let result = h
            .validator
            .validate_group_memberships("u1", &ids(&["g1"]))
            .await
            .unwrap();

        assert!(result.is_valid);
        assert_eq!(result.warning_count(), 1);
        assert!(result.warnings[0].starts_with("could not verify membership of user u1 in group g1"));
        assert_eq!(result.diagnostic("missing"), Some(&DiagnosticValue::Ids(vec![])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_group_is_reported_missing() {
        let h = harness(MockDirectory::new().with_group("g1", &[]).with_group("g2", &[]));
        h.directory.delete_group("g2");

        let result = h.validator.validate_group_existence(&ids(&["g1", "g2"])).await;

        assert_eq!(
            result.errors,
            vec!["group g2 does not exist in the directory".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_directory_opens_breaker_and_degrades_to_warnings() {
        let h = harness(MockDirectory::new().with_group("g1", &[]));
        h.directory.set_offline(true);
        let groups = ids(&["g1", "g2", "g3", "g4", "g5"]);

        let first = h.validator.validate_group_existence(&groups).await;
        assert!(first.is_valid);
        assert_eq!(first.warning_count(), 5);
        let calls = h.directory.exists_calls();
        assert!(calls >= 10, "breaker needs its minimum throughput, saw {}", calls);

        // Breaker is open: nothing reaches the directory, still no hard errors.
        let second = h.validator.validate_group_existence(&groups).await;
        assert!(second.is_valid);
        assert_eq!(second.warning_count(), 5);
        assert!(second.warnings.iter().all(|w| w.contains("Circuit open for")));
        assert_eq!(h.directory.exists_calls(), calls);
    }
}
