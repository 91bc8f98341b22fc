//! Core data models for statesync.
//!
//! These are the system-of-record entities the engine reconciles against the
//! directory and the secret store. Several of them hold *copies* of external
//! identifiers; the canonical owner of each copy is documented on the field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// TENANT TYPES
// =============================================================================

/// A tenant ("organization").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    /// Canonical collaboration-group id. Single source of truth: every other
    /// record caching this id is repaired toward it, never the reverse.
    pub collaboration_group_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// The canonical collaboration-group id, treating blank as absent.
    pub fn canonical_group_id(&self) -> Option<&str> {
        non_blank(self.collaboration_group_id.as_deref())
    }
}

/// Denormalized per-tenant cache of the collaboration group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaborationGroupCache {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Must equal `Tenant::collaboration_group_id`.
    pub group_id: String,
    pub display_name: String,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// USER TYPES
// =============================================================================

/// Lifecycle status of a platform user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Fully onboarded
    #[default]
    Active,
    /// Invitation sent, not yet redeemed
    Invited,
    /// Soft-deleted, kept for audit
    Deactivated,
}

impl UserStatus {
    /// The `is_active` flag a user in this status must carry.
    pub fn expects_active_flag(self) -> bool {
        !matches!(self, Self::Deactivated)
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Invited => write!(f, "invited"),
            Self::Deactivated => write!(f, "deactivated"),
        }
    }
}

impl std::str::FromStr for UserStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "invited" => Ok(Self::Invited),
            "deactivated" => Ok(Self::Deactivated),
            _ => Err(format!("Invalid user status: {}", s)),
        }
    }
}

/// A platform identity bound to one directory identity and one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Durable directory object id. Set once at creation, never reused.
    pub external_id: String,
    pub tenant_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub status: UserStatus,
    pub is_active: bool,
    /// Intended capability types (current model).
    pub capability_type_ids: Vec<Uuid>,
    /// Deprecated capability list kept during migration.
    pub legacy_capability_type_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// CAPABILITY TYPES
// =============================================================================

/// A named role/capability definition ("agent type").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityType {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// Canonical security-group reference for this capability.
    pub security_group_id: Option<String>,
    pub is_active: bool,
    pub display_order: i32,
    pub updated_at: DateTime<Utc>,
}

impl CapabilityType {
    /// The canonical security-group id, treating blank as absent.
    pub fn canonical_group_id(&self) -> Option<&str> {
        non_blank(self.security_group_id.as_deref())
    }
}

/// A (user, tenant, capability type) grant holding a snapshot of the
/// capability type's security-group reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub capability_type_id: Uuid,
    /// Copy of `CapabilityType::security_group_id` taken at assignment time.
    pub security_group_id: Option<String>,
    pub is_active: bool,
    pub assigned_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    /// The copied security-group id, treating blank as absent.
    pub fn group_id(&self) -> Option<&str> {
        non_blank(self.security_group_id.as_deref())
    }
}

// =============================================================================
// CREDENTIAL TYPES
// =============================================================================

/// Database credential whose secret material lives in the secret store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub engine: String,
    /// Versioned reference to the password secret.
    pub password_secret_ref: String,
    /// Versioned reference to the connection-string secret.
    pub connection_string_secret_ref: String,
    /// Versioned reference to the consolidated secret, when present.
    pub consolidated_secret_ref: Option<String>,
    /// Logical activation; mirrored as a tag on every referenced secret.
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

/// Compare two external identifiers.
///
/// Directory ids are GUIDs whose casing differs between read paths.
pub fn same_external_id(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Normalize an external identifier for set membership.
pub fn normalize_external_id(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capability(group: Option<&str>) -> CapabilityType {
        CapabilityType {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Sales".to_string(),
            security_group_id: group.map(String::from),
            is_active: true,
            display_order: 0,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_user_status_round_trip_through_str() {
        for status in [UserStatus::Active, UserStatus::Invited, UserStatus::Deactivated] {
            let parsed: UserStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("archived".parse::<UserStatus>().is_err());
    }

    #[test]
    fn test_user_status_expected_active_flag() {
        assert!(UserStatus::Active.expects_active_flag());
        assert!(UserStatus::Invited.expects_active_flag());
        assert!(!UserStatus::Deactivated.expects_active_flag());
    }

    #[test]
    fn test_blank_group_reference_is_absent() {
        assert_eq!(capability(Some("   ")).canonical_group_id(), None);
        assert_eq!(capability(None).canonical_group_id(), None);
        assert_eq!(capability(Some(" g1 ")).canonical_group_id(), Some("g1"));
    }

    #[test]
    fn test_same_external_id_ignores_case() {
        assert!(same_external_id(
            "6F1C2D3E-0000-4000-8000-ABCDEF012345",
            "6f1c2d3e-0000-4000-8000-abcdef012345"
        ));
        assert!(!same_external_id("g1", "g2"));
    }

    #[test]
    fn test_user_status_serializes_lowercase() {
        let json = serde_json::to_string(&UserStatus::Deactivated).unwrap();
        assert_eq!(json, "\"deactivated\"");
    }
}
