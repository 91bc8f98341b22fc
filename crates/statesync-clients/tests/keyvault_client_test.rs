//! HTTP-level tests for the secret store client.

use std::collections::BTreeMap;

use statesync_clients::{KeyVaultConfig, KeyVaultSecretClient};
use statesync_core::{Error, SecretStoreClient};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> KeyVaultSecretClient {
    KeyVaultSecretClient::new(KeyVaultConfig {
        vault_url: server.uri(),
        token: None,
        api_version: "7.4".to_string(),
        timeout_seconds: 5,
    })
    .expect("Failed to create client")
}

fn bundle(server: &MockServer, name: &str, version: &str) -> serde_json::Value {
    serde_json::json!({
        "id": format!("{}/secrets/{}/{}", server.uri(), name, version),
        "value": "s3cret",
        "attributes": {"enabled": true},
        "tags": {"tenant_id": "t1", "is_active": "true"}
    })
}

#[tokio::test]
async fn test_get_secret_with_tags() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/secrets/db-password"))
        .and(query_param("api-version", "7.4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&server, "db-password", "v9")))
        .mount(&server)
        .await;

    let secret = client(&server)
        .get_secret_with_tags("db-password")
        .await
        .unwrap()
        .expect("secret should exist");
    assert_eq!(secret.name, "db-password");
    assert_eq!(secret.version.as_deref(), Some("v9"));
    assert_eq!(secret.value, "s3cret");
    assert_eq!(secret.tag("tenant_id"), Some("t1"));
    assert!(secret.enabled);
}

#[tokio::test]
async fn test_missing_secret_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/secrets/nope/v1"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": {"code": "SecretNotFound", "message": "A secret with (name/id) nope was not found"}
        })))
        .mount(&server)
        .await;

    let secret = client(&server).get_secret_version("nope", "v1").await.unwrap();
    assert!(secret.is_none());
}

#[tokio::test]
async fn test_throttling_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/secrets/db"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = client(&server).get_secret("db").await.unwrap_err();
    assert!(matches!(err, Error::SecretStore(ref m) if m.starts_with("429:")));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_set_secret_keeps_store_enabled() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/secrets/db"))
        .and(body_json(serde_json::json!({
            "value": "pw",
            "tags": {"is_active": "false"},
            "attributes": {"enabled": true}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&server, "db", "v2")))
        .expect(1)
        .mount(&server)
        .await;

    let mut tags = BTreeMap::new();
    tags.insert("is_active".to_string(), "false".to_string());
    client(&server).set_secret("db", "pw", &tags).await.unwrap();
}

#[tokio::test]
async fn test_update_tags_resolves_latest_version() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/secrets/db"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&server, "db", "v7")))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/secrets/db/v7"))
        .and(body_json(serde_json::json!({"tags": {"is_active": "true"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(bundle(&server, "db", "v7")))
        .expect(1)
        .mount(&server)
        .await;

    let mut tags = BTreeMap::new();
    tags.insert("is_active".to_string(), "true".to_string());
    client(&server)
        .update_secret_tags("db", None, &tags)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_and_purge_tolerate_missing() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/secrets/db"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/deletedsecrets/db"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    client.delete_secret("db").await.unwrap();
    client.purge_secret("db").await.unwrap();
}
