//! Wire types for the directory and secret store REST APIs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// DIRECTORY TYPES
// =============================================================================

/// One page of a directory collection response.
#[derive(Debug, Deserialize)]
pub struct ODataPage {
    #[serde(default)]
    pub value: Vec<DirectoryObject>,
    /// Absolute URL of the next page, when there is one.
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// A directory object reduced to its id.
#[derive(Debug, Deserialize)]
pub struct DirectoryObject {
    pub id: String,
}

/// Body of `POST /groups/{id}/members/$ref`.
#[derive(Debug, Serialize)]
pub struct MemberReference {
    #[serde(rename = "@odata.id")]
    pub odata_id: String,
}

/// Error envelope returned by the directory.
#[derive(Debug, Deserialize)]
pub struct GraphErrorResponse {
    pub error: GraphError,
}

#[derive(Debug, Deserialize)]
pub struct GraphError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

// =============================================================================
// SECRET STORE TYPES
// =============================================================================

/// A secret version as returned by the vault.
#[derive(Debug, Deserialize)]
pub struct SecretBundle {
    /// Full secret identifier, `https://<vault>/secrets/<name>/<version>`.
    pub id: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub attributes: Option<SecretAttributes>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretAttributes {
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Body of `PUT /secrets/{name}`.
#[derive(Debug, Serialize)]
pub struct SetSecretRequest<'a> {
    pub value: &'a str,
    pub tags: &'a BTreeMap<String, String>,
    pub attributes: SecretAttributes,
}

/// Body of `PATCH /secrets/{name}/{version}`.
#[derive(Debug, Serialize)]
pub struct UpdateSecretRequest<'a> {
    pub tags: &'a BTreeMap<String, String>,
}

/// Error envelope returned by the vault.
#[derive(Debug, Deserialize)]
pub struct VaultErrorResponse {
    pub error: VaultError,
}

#[derive(Debug, Deserialize)]
pub struct VaultError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}
