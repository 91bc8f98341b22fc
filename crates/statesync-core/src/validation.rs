//! Result shapes produced by validation and repair.
//!
//! A [`ValidationResult`] separates confirmed drift (errors) from soft or
//! provisionally inconsistent drift (warnings). Diagnostics are an ordered
//! list of typed key/value pairs so callers can introspect a result without
//! parsing messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Typed diagnostic value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DiagnosticValue {
    Count(usize),
    Flag(bool),
    Text(String),
    Ids(Vec<String>),
}

/// One ordered diagnostic entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub key: String,
    pub value: DiagnosticValue,
}

/// Outcome of one validation or repair operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub summary: String,
    pub repairs: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    /// An empty, valid result.
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            diagnostics: Vec::new(),
            summary: String::new(),
            repairs: Vec::new(),
        }
    }

    /// Record confirmed drift. Invalidates the result.
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.is_valid = false;
    }

    /// Record soft drift or an item that could not be verified.
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Record a repair write that was performed.
    pub fn add_repair(&mut self, message: impl Into<String>) {
        self.repairs.push(message.into());
    }

    /// Append a typed diagnostic.
    pub fn add_diagnostic(&mut self, key: impl Into<String>, value: DiagnosticValue) {
        self.diagnostics.push(Diagnostic {
            key: key.into(),
            value,
        });
    }

    /// First diagnostic stored under `key`.
    pub fn diagnostic(&self, key: &str) -> Option<&DiagnosticValue> {
        self.diagnostics
            .iter()
            .find(|d| d.key == key)
            .map(|d| &d.value)
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    /// Fold another result into this one. Diagnostic keys are prefixed with
    /// `scope` so merged entries stay attributable.
    pub fn merge(&mut self, scope: &str, other: ValidationResult) {
        if !other.is_valid {
            self.is_valid = false;
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.repairs.extend(other.repairs);
        self.diagnostics
            .extend(other.diagnostics.into_iter().map(|d| Diagnostic {
                key: if scope.is_empty() {
                    d.key
                } else {
                    format!("{}.{}", scope, d.key)
                },
                value: d.value,
            }));
    }

    /// Set the summary from the current counts.
    pub fn summarize(&mut self, subject: &str) {
        self.summary = if self.errors.is_empty() && self.warnings.is_empty() {
            format!("{}: consistent", subject)
        } else {
            format!(
                "{}: {} error(s), {} warning(s)",
                subject,
                self.errors.len(),
                self.warnings.len()
            )
        };
        if !self.repairs.is_empty() {
            self.summary
                .push_str(&format!(", {} repair(s) applied", self.repairs.len()));
        }
    }
}

/// Resource categories covered by a full sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceCategory {
    Users,
    Groups,
    Credentials,
}

impl std::fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Users => write!(f, "users"),
            Self::Groups => write!(f, "groups"),
            Self::Credentials => write!(f, "credentials"),
        }
    }
}

/// Composite result of one full tenant sweep. This is the cached artifact
/// exposed to status surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveStateSyncResult {
    pub tenant_id: Uuid,
    pub checked_at: DateTime<Utc>,
    pub user_result: ValidationResult,
    pub group_result: ValidationResult,
    pub credential_result: ValidationResult,
    pub critical_issues: Vec<String>,
    pub recommended_actions: Vec<String>,
    pub is_fully_synced: bool,
}

impl ComprehensiveStateSyncResult {
    /// Assemble the composite from the three category results.
    pub fn from_categories(
        tenant_id: Uuid,
        user_result: ValidationResult,
        group_result: ValidationResult,
        credential_result: ValidationResult,
    ) -> Self {
        let is_fully_synced =
            user_result.is_valid && group_result.is_valid && credential_result.is_valid;

        let mut critical_issues = Vec::new();
        for (category, result) in [
            (ResourceCategory::Users, &user_result),
            (ResourceCategory::Groups, &group_result),
            (ResourceCategory::Credentials, &credential_result),
        ] {
            critical_issues.extend(result.errors.iter().map(|e| format!("[{}] {}", category, e)));
        }

        let recommended_actions =
            recommend_actions(&user_result, &group_result, &credential_result);

        Self {
            tenant_id,
            checked_at: Utc::now(),
            user_result,
            group_result,
            credential_result,
            critical_issues,
            recommended_actions,
            is_fully_synced,
        }
    }

    pub fn total_errors(&self) -> usize {
        self.user_result.error_count()
            + self.group_result.error_count()
            + self.credential_result.error_count()
    }

    pub fn total_warnings(&self) -> usize {
        self.user_result.warning_count()
            + self.group_result.warning_count()
            + self.credential_result.warning_count()
    }

    /// Repair actions recorded across all categories.
    pub fn repairs(&self) -> impl Iterator<Item = &String> {
        self.user_result
            .repairs
            .iter()
            .chain(self.group_result.repairs.iter())
            .chain(self.credential_result.repairs.iter())
    }

    /// One-line human summary with explicit error/warning counts.
    pub fn summary(&self) -> String {
        format!(
            "tenant {}: {} ({} error(s), {} warning(s))",
            self.tenant_id,
            if self.is_fully_synced {
                "in sync"
            } else {
                "drift detected"
            },
            self.total_errors(),
            self.total_warnings()
        )
    }
}

fn recommend_actions(
    users: &ValidationResult,
    groups: &ValidationResult,
    credentials: &ValidationResult,
) -> Vec<String> {
    let mut actions = Vec::new();
    let any = |r: &ValidationResult, needle: &str| r.errors.iter().any(|e| e.contains(needle));

    if any(users, "stale group reference") || any(users, "no security group reference") {
        actions.push("Run security group reference repair for the affected users".to_string());
    }
    if any(users, "missing assignment") {
        actions.push(
            "Create the missing capability assignments through the onboarding workflow"
                .to_string(),
        );
    }
    if any(users, "inconsistent") || any(users, "required field") {
        actions.push("Review flagged user records manually".to_string());
    }
    if users
        .warnings
        .iter()
        .any(|w| w.contains("legacy capability list"))
    {
        actions.push(
            "Resolve legacy capability lists: migrate or clear them explicitly".to_string(),
        );
    }
    if any(groups, "does not exist") {
        actions.push(
            "Re-point references to deleted directory groups, then run repair".to_string(),
        );
    }
    if any(groups, "not a member") {
        actions.push("Re-add users to their expected directory groups".to_string());
    }
    if any(groups, "collaboration group") {
        actions.push("Run collaboration group repair for the tenant".to_string());
    }
    if any(credentials, "activation tag") {
        actions.push("Run credential activation tag repair".to_string());
    }
    if credentials
        .errors
        .iter()
        .any(|e| !e.contains("activation tag"))
    {
        actions.push("Re-provision or re-tag the affected credential secrets".to_string());
    }
    let unverified = [users, groups, credentials]
        .iter()
        .any(|r| r.warnings.iter().any(|w| w.contains("could not verify")));
    if unverified {
        actions.push(
            "Some items could not be verified; re-run the sweep once external services recover"
                .to_string(),
        );
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_result_is_valid() {
        let r = ValidationResult::new();
        assert!(r.is_valid);
        assert_eq!(r.error_count(), 0);
        assert_eq!(r.warning_count(), 0);
    }

    #[test]
    fn test_warning_does_not_invalidate() {
        let mut r = ValidationResult::new();
        r.add_warning("orphan grant");
        assert!(r.is_valid);
        r.add_error("missing assignment for capability Admin");
        assert!(!r.is_valid);
    }

    #[test]
    fn test_diagnostics_keep_insertion_order() {
        let mut r = ValidationResult::new();
        r.add_diagnostic("intended", DiagnosticValue::Count(2));
        r.add_diagnostic("actual", DiagnosticValue::Count(1));
        r.add_diagnostic("missing", DiagnosticValue::Ids(vec!["a".into()]));
        let keys: Vec<_> = r.diagnostics.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["intended", "actual", "missing"]);
        assert_eq!(r.diagnostic("actual"), Some(&DiagnosticValue::Count(1)));
    }

    #[test]
    fn test_merge_prefixes_diagnostics_and_propagates_validity() {
        let mut parent = ValidationResult::new();
        let mut child = ValidationResult::new();
        child.add_error("boom");
        child.add_diagnostic("checked", DiagnosticValue::Count(3));
        parent.merge("user.42", child);
        assert!(!parent.is_valid);
        assert_eq!(parent.errors, vec!["boom".to_string()]);
        assert_eq!(parent.diagnostics[0].key, "user.42.checked");
    }

    #[test]
    fn test_summary_counts() {
        let mut r = ValidationResult::new();
        r.add_error("e");
        r.add_warning("w1");
        r.add_warning("w2");
        r.add_repair("fixed");
        r.summarize("assignments");
        assert_eq!(
            r.summary,
            "assignments: 1 error(s), 2 warning(s), 1 repair(s) applied"
        );
    }

    #[test]
    fn test_composite_overall_is_and_of_categories() {
        let ok = ValidationResult::new();
        let mut bad = ValidationResult::new();
        bad.add_error("group g1 does not exist in the directory");

        let all_ok = ComprehensiveStateSyncResult::from_categories(
            Uuid::nil(),
            ok.clone(),
            ok.clone(),
            ok.clone(),
        );
        assert!(all_ok.is_fully_synced);
        assert!(all_ok.critical_issues.is_empty());

        let one_bad =
            ComprehensiveStateSyncResult::from_categories(Uuid::nil(), ok.clone(), bad, ok);
        assert!(!one_bad.is_fully_synced);
        assert_eq!(
            one_bad.critical_issues,
            vec!["[groups] group g1 does not exist in the directory".to_string()]
        );
        assert_eq!(one_bad.total_errors(), 1);
        assert!(one_bad
            .recommended_actions
            .iter()
            .any(|a| a.contains("deleted directory groups")));
    }

    #[test]
    fn test_unverified_items_recommend_rerun() {
        let mut w = ValidationResult::new();
        w.add_warning("could not verify group g3: Timed out");
        let r = ComprehensiveStateSyncResult::from_categories(
            Uuid::nil(),
            ValidationResult::new(),
            w,
            ValidationResult::new(),
        );
        assert!(r.is_fully_synced);
        assert_eq!(r.total_warnings(), 1);
        assert!(r.recommended_actions[0].contains("re-run the sweep"));
    }

    #[test]
    fn test_result_serializes_typed_diagnostics() {
        let mut r = ValidationResult::new();
        r.add_diagnostic("retried", DiagnosticValue::Flag(true));
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["diagnostics"][0]["value"]["type"], "flag");
        assert_eq!(json["diagnostics"][0]["value"]["value"], true);
    }
}
