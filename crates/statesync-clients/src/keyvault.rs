//! Key Vault-style secret store client.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use tracing::{debug, info};

use statesync_core::defaults::{VAULT_API_VERSION, VAULT_TIMEOUT_SECS};
use statesync_core::{Error, Result, Secret, SecretReference, SecretStoreClient};

use crate::types::*;

/// Configuration for the secret store client.
#[derive(Debug, Clone)]
pub struct KeyVaultConfig {
    /// Vault root, e.g. `https://acme.vault.azure.net`.
    pub vault_url: String,
    /// Bearer token (optional for test endpoints).
    pub token: Option<String>,
    /// Value of the `api-version` query parameter.
    pub api_version: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for KeyVaultConfig {
    fn default() -> Self {
        Self {
            vault_url: String::new(),
            token: None,
            api_version: VAULT_API_VERSION.to_string(),
            timeout_seconds: VAULT_TIMEOUT_SECS,
        }
    }
}

impl KeyVaultConfig {
    /// Read `VAULT_URL` (required), `VAULT_TOKEN`, `VAULT_API_VERSION`,
    /// `VAULT_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let vault_url = std::env::var("VAULT_URL")
            .map_err(|_| Error::Config("VAULT_URL is not set".to_string()))?;
        Ok(Self {
            vault_url,
            token: std::env::var("VAULT_TOKEN").ok(),
            api_version: std::env::var("VAULT_API_VERSION")
                .unwrap_or_else(|_| VAULT_API_VERSION.to_string()),
            timeout_seconds: std::env::var("VAULT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(VAULT_TIMEOUT_SECS),
        })
    }
}

/// Secret store client speaking the Key Vault REST dialect.
///
/// The store-level `enabled` attribute is always written as `true`;
/// logical activation lives in the `is_active` tag.
pub struct KeyVaultSecretClient {
    client: Client,
    config: KeyVaultConfig,
}

impl KeyVaultSecretClient {
    pub fn new(config: KeyVaultConfig) -> Result<Self> {
        if config.vault_url.trim().is_empty() {
            return Err(Error::Config("vault URL is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "secrets",
            component = "secret_store",
            op = "init",
            vault_url = %config.vault_url,
            api_version = %config.api_version,
            "Initializing secret store client"
        );

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(KeyVaultConfig::from_env()?)
    }

    pub fn config(&self) -> &KeyVaultConfig {
        &self.config
    }

    /// Build `<vault_url>/<segments...>?api-version=..`. Each segment is
    /// percent-encoded, so a secret name cannot address another path.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.config.vault_url)
            .map_err(|e| Error::Config(format!("Invalid vault URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config("Vault URL cannot have a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut()
            .clear()
            .append_pair("api-version", &self.config.api_version);
        Ok(url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.token {
            Some(ref token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// GET a secret bundle; 404 is `Ok(None)`.
    async fn fetch(&self, segments: &[&str]) -> Result<Option<Secret>> {
        let response = self
            .authorize(self.client.get(self.url(segments)?))
            .send()
            .await
            .map_err(Error::from)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let bundle: SecretBundle = response.json().await.map_err(Error::from)?;
                Ok(Some(to_secret(bundle)?))
            }
            _ => Err(error_from(response).await),
        }
    }

    /// DELETE a path; 404 counts as already done.
    async fn delete_path(&self, segments: &[&str]) -> Result<()> {
        let response = self
            .authorize(self.client.delete(self.url(segments)?))
            .send()
            .await
            .map_err(Error::from)?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(error_from(response).await),
        }
    }
}

fn to_secret(bundle: SecretBundle) -> Result<Secret> {
    let reference = SecretReference::parse(&bundle.id)?;
    Ok(Secret {
        name: reference.name,
        version: reference.version,
        value: bundle.value.unwrap_or_default(),
        tags: bundle.tags.unwrap_or_default(),
        enabled: bundle
            .attributes
            .and_then(|a| a.enabled)
            .unwrap_or(true),
    })
}

/// Turn a non-success response into `Error::SecretStore("<status>: <detail>")`.
async fn error_from(response: Response) -> Error {
    let status = response.status();
    let detail = match response.json::<VaultErrorResponse>().await {
        Ok(body) if !body.error.message.is_empty() => {
            format!("{} {}", body.error.code, body.error.message)
        }
        _ => status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string(),
    };
    Error::SecretStore(format!("{}: {}", status.as_u16(), detail))
}

#[async_trait]
impl SecretStoreClient for KeyVaultSecretClient {
    async fn get_secret(&self, name: &str) -> Result<Option<String>> {
        Ok(self.get_secret_with_tags(name).await?.map(|s| s.value))
    }

    async fn get_secret_with_tags(&self, name: &str) -> Result<Option<Secret>> {
        self.fetch(&["secrets", name]).await
    }

    async fn get_secret_version(&self, name: &str, version: &str) -> Result<Option<Secret>> {
        self.fetch(&["secrets", name, version]).await
    }

    async fn set_secret(
        &self,
        name: &str,
        value: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        let body = SetSecretRequest {
            value,
            tags,
            attributes: SecretAttributes {
                enabled: Some(true),
            },
        };
        let response = self
            .authorize(self.client.put(self.url(&["secrets", name])?))
            .json(&body)
            .send()
            .await
            .map_err(Error::from)?;

        if !response.status().is_success() {
            return Err(error_from(response).await);
        }
        debug!(
            subsystem = "secrets",
            component = "secret_store",
            op = "set",
            secret = name,
            tag_count = tags.len(),
            "Secret version written"
        );
        Ok(())
    }

    async fn update_secret_tags(
        &self,
        name: &str,
        version: Option<&str>,
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        // The vault patches a concrete version; resolve "latest" first.
        let version = match version {
            Some(v) => v.to_string(),
            None => self
                .get_secret_with_tags(name)
                .await?
                .and_then(|s| s.version)
                .ok_or_else(|| Error::SecretStore(format!("404: secret {} not found", name)))?,
        };

        let response = self
            .authorize(self.client.patch(self.url(&["secrets", name, &version])?))
            .json(&UpdateSecretRequest { tags })
            .send()
            .await
            .map_err(Error::from)?;

        if !response.status().is_success() {
            return Err(error_from(response).await);
        }
        debug!(
            subsystem = "secrets",
            component = "secret_store",
            op = "update_tags",
            secret = name,
            version = %version,
            "Secret tags updated"
        );
        Ok(())
    }

    async fn delete_secret(&self, name: &str) -> Result<()> {
        self.delete_path(&["secrets", name]).await
    }

    async fn purge_secret(&self, name: &str) -> Result<()> {
        self.delete_path(&["deletedsecrets", name]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_empty_vault_url() {
        assert!(matches!(
            KeyVaultSecretClient::new(KeyVaultConfig::default()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_url_carries_api_version() {
        let client = KeyVaultSecretClient::new(KeyVaultConfig {
            vault_url: "http://localhost:9999/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            client.url(&["secrets", "db"]).unwrap().as_str(),
            format!("http://localhost:9999/secrets/db?api-version={}", VAULT_API_VERSION)
        );
    }

    #[test]
    fn test_secret_name_stays_in_its_segment() {
        let client = KeyVaultSecretClient::new(KeyVaultConfig {
            vault_url: "http://localhost:9999".to_string(),
            ..Default::default()
        })
        .unwrap();
        let url = client.url(&["secrets", "a/b?api-version=0#x"]).unwrap();
        assert_eq!(url.path(), "/secrets/a%2Fb%3Fapi-version=0%23x");
        assert_eq!(
            url.query(),
            Some(format!("api-version={}", VAULT_API_VERSION).as_str())
        );
    }

    #[test]
    fn test_bundle_maps_version_and_enabled() {
        let bundle: SecretBundle = serde_json::from_value(serde_json::json!({
            "id": "https://acme.vault.azure.net/secrets/db-password/abc123",
            "value": "hunter2",
            "attributes": {"enabled": false},
            "tags": {"tenant_id": "t1"}
        }))
        .unwrap();
        let secret = to_secret(bundle).unwrap();
        assert_eq!(secret.name, "db-password");
        assert_eq!(secret.version.as_deref(), Some("abc123"));
        assert!(!secret.enabled);
        assert_eq!(secret.tag("tenant_id"), Some("t1"));
    }
}
