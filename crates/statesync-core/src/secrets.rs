//! Secret store value types and credential secret references.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A secret as returned by the secret store, with its tag metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    pub version: Option<String>,
    pub value: String,
    pub tags: BTreeMap<String, String>,
    /// Store-level enabled state. Kept permanently `true`; logical
    /// activation is carried by the `is_active` tag instead.
    pub enabled: bool,
}

impl Secret {
    /// Look up a tag by name.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Which secret of a credential a reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretRole {
    Password,
    ConnectionString,
    Consolidated,
}

impl std::fmt::Display for SecretRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password => write!(f, "password"),
            Self::ConnectionString => write!(f, "connection string"),
            Self::Consolidated => write!(f, "consolidated"),
        }
    }
}

/// A parsed pointer into the secret store.
///
/// Accepted forms:
/// - `db-password`
/// - `db-password/3f2a9c`
/// - `https://vault.example.net/secrets/db-password`
/// - `https://vault.example.net/secrets/db-password/3f2a9c`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretReference {
    pub name: String,
    pub version: Option<String>,
}

impl SecretReference {
    /// Parse a stored secret reference.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("empty secret reference".to_string()));
        }

        let path = match trimmed.split_once("://") {
            Some((_, rest)) => {
                let (_, path) = rest.split_once('/').ok_or_else(|| {
                    Error::InvalidInput(format!("secret URI has no path: {}", trimmed))
                })?;
                let path = path.split(['?', '#']).next().unwrap_or_default();
                path.strip_prefix("secrets/").ok_or_else(|| {
                    Error::InvalidInput(format!("secret URI is not under /secrets: {}", trimmed))
                })?
            }
            None => trimmed,
        };

        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let name = segments
            .next()
            .ok_or_else(|| Error::InvalidInput(format!("secret reference has no name: {}", raw)))?;
        let version = segments.next().map(String::from);
        if segments.next().is_some() {
            return Err(Error::InvalidInput(format!(
                "secret reference has too many segments: {}",
                raw
            )));
        }

        Ok(Self {
            name: name.to_string(),
            version,
        })
    }
}

impl std::fmt::Display for SecretReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}/{}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_name() {
        let r = SecretReference::parse("db-password").unwrap();
        assert_eq!(r.name, "db-password");
        assert_eq!(r.version, None);
    }

    #[test]
    fn test_parse_name_with_version() {
        let r = SecretReference::parse("db-password/3f2a9c").unwrap();
        assert_eq!(r.name, "db-password");
        assert_eq!(r.version.as_deref(), Some("3f2a9c"));
    }

    #[test]
    fn test_parse_vault_uri() {
        let r =
            SecretReference::parse("https://acme.vault.azure.net/secrets/db-conn/ab12?api-version=7.4")
                .unwrap();
        assert_eq!(r.name, "db-conn");
        assert_eq!(r.version.as_deref(), Some("ab12"));
        assert_eq!(r.to_string(), "db-conn/ab12");
    }

    #[test]
    fn test_parse_vault_uri_without_version() {
        let r = SecretReference::parse("https://acme.vault.azure.net/secrets/db-conn").unwrap();
        assert_eq!(r.name, "db-conn");
        assert!(r.version.is_none());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(SecretReference::parse("").is_err());
        assert!(SecretReference::parse("   ").is_err());
        assert!(SecretReference::parse("https://acme.vault.azure.net/keys/k1").is_err());
        assert!(SecretReference::parse("https://acme.vault.azure.net").is_err());
        assert!(SecretReference::parse("a/b/c").is_err());
    }

    #[test]
    fn test_secret_tag_lookup() {
        let mut tags = BTreeMap::new();
        tags.insert("tenant_id".to_string(), "t1".to_string());
        let secret = Secret {
            name: "s".into(),
            version: None,
            value: "v".into(),
            tags,
            enabled: true,
        };
        assert_eq!(secret.tag("tenant_id"), Some("t1"));
        assert_eq!(secret.tag("missing"), None);
    }
}
