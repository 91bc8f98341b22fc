//! Graph-style directory client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use tracing::{debug, info};

use statesync_core::defaults::{DIRECTORY_BASE_URL, DIRECTORY_TIMEOUT_SECS};
use statesync_core::{DirectoryClient, Error, Result};

use crate::types::*;

/// Upper bound on followed `@odata.nextLink` pages for one listing.
const MAX_PAGES: usize = 100;

/// Configuration for the directory client.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// API root, e.g. `https://graph.microsoft.com/v1.0`.
    pub base_url: String,
    /// Bearer token (optional for test endpoints).
    pub token: Option<String>,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: DIRECTORY_BASE_URL.to_string(),
            token: None,
            timeout_seconds: DIRECTORY_TIMEOUT_SECS,
        }
    }
}

impl GraphConfig {
    /// Read `DIRECTORY_BASE_URL`, `DIRECTORY_TOKEN`, `DIRECTORY_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("DIRECTORY_BASE_URL")
                .unwrap_or_else(|_| DIRECTORY_BASE_URL.to_string()),
            token: std::env::var("DIRECTORY_TOKEN").ok(),
            timeout_seconds: std::env::var("DIRECTORY_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DIRECTORY_TIMEOUT_SECS),
        }
    }
}

/// Directory client speaking the Graph REST dialect.
pub struct GraphDirectoryClient {
    client: Client,
    config: GraphConfig,
}

impl GraphDirectoryClient {
    pub fn new(config: GraphConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "directory",
            component = "directory",
            op = "init",
            base_url = %config.base_url,
            "Initializing directory client"
        );

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(GraphConfig::from_env())
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Build `<base_url>/<segments...>[?query]`, percent-encoding each
    /// segment so ids cannot change the path.
    fn url(&self, segments: &[&str], query: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| Error::Config(format!("Invalid directory base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config("Directory base URL cannot have a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        url.set_query(query);
        Ok(url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.token {
            Some(ref token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Collect ids across every page of a collection.
    async fn list_ids(&self, first: Url) -> Result<Vec<String>> {
        let endpoint = first.path().to_string();
        let mut ids = Vec::new();
        let mut next = Some(first.to_string());
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                // Deterministic limit: retrying would walk the same pages again.
                return Err(Error::Directory(format!(
                    "422: paging exceeded {} pages for {}",
                    MAX_PAGES, endpoint
                )));
            }
            let response = self
                .authorize(self.client.get(&url))
                .send()
                .await
                .map_err(Error::from)?;
            if !response.status().is_success() {
                return Err(error_from(response).await);
            }
            let page: ODataPage = response.json().await.map_err(Error::from)?;
            ids.extend(page.value.into_iter().map(|o| o.id));
            next = page.next_link;
        }

        debug!(
            subsystem = "directory",
            component = "directory",
            op = "list",
            endpoint = %endpoint,
            pages,
            count = ids.len(),
            "Listed directory objects"
        );
        Ok(ids)
    }
}

/// Turn a non-success response into `Error::Directory("<status>: <detail>")`.
async fn error_from(response: Response) -> Error {
    let status = response.status().as_u16();
    let detail = read_error(response).await;
    Error::Directory(format!("{}: {}", status, detail))
}

async fn read_error(response: Response) -> String {
    let status = response.status();
    match response.json::<GraphErrorResponse>().await {
        Ok(body) if !body.error.message.is_empty() => {
            format!("{} {}", body.error.code, body.error.message)
        }
        _ => status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string(),
    }
}

#[async_trait]
impl DirectoryClient for GraphDirectoryClient {
    async fn group_exists(&self, group_id: &str) -> Result<bool> {
        let url = self.url(&["groups", group_id], Some("$select=id"))?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(Error::from)?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(error_from(response).await),
        }
    }

    async fn get_user_groups(&self, user_external_id: &str) -> Result<Vec<String>> {
        let url = self.url(
            &["users", user_external_id, "memberOf", "microsoft.graph.group"],
            Some("$select=id"),
        )?;
        self.list_ids(url).await
    }

    async fn get_group_members(&self, group_id: &str) -> Result<Vec<String>> {
        let url = self.url(&["groups", group_id, "members"], Some("$select=id"))?;
        self.list_ids(url).await
    }

    async fn add_user_to_group(&self, user_external_id: &str, group_id: &str) -> Result<()> {
        let body = MemberReference {
            odata_id: self
                .url(&["directoryObjects", user_external_id], None)?
                .to_string(),
        };
        let url = self.url(&["groups", group_id, "members", "$ref"], None)?;
        let response = self
            .authorize(self.client.post(url))
            .json(&body)
            .send()
            .await
            .map_err(Error::from)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = read_error(response).await;
        // The directory rejects a duplicate add with 400 "already exist".
        if status == StatusCode::BAD_REQUEST && detail.contains("already exist") {
            debug!(
                subsystem = "directory",
                component = "directory",
                op = "add_member",
                group_id,
                "User already a member"
            );
            return Ok(());
        }
        Err(Error::Directory(format!("{}: {}", status.as_u16(), detail)))
    }

    async fn remove_user_from_group(
        &self,
        user_external_id: &str,
        group_id: &str,
    ) -> Result<()> {
        let url = self.url(
            &["groups", group_id, "members", user_external_id, "$ref"],
            None,
        )?;
        let response = self
            .authorize(self.client.delete(url))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GraphConfig::default();
        assert_eq!(config.base_url, DIRECTORY_BASE_URL);
        assert!(config.token.is_none());
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let client = GraphDirectoryClient::new(GraphConfig {
            base_url: "http://localhost:1234/v1.0/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.url("/groups/g1"), "http://localhost:1234/v1.0/groups/g1");
    }
}
