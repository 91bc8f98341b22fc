//! HTTP-level tests for the directory client.

use statesync_clients::{GraphConfig, GraphDirectoryClient};
use statesync_core::{DirectoryClient, Error};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> GraphDirectoryClient {
    GraphDirectoryClient::new(GraphConfig {
        base_url: server.uri(),
        token: Some("test-token".to_string()),
        timeout_seconds: 5,
    })
    .expect("Failed to create client")
}

#[tokio::test]
async fn test_group_exists_maps_404_to_false() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/groups/g1"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "g1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/groups/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(client.group_exists("g1").await.unwrap());
    assert!(!client.group_exists("gone").await.unwrap());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/groups/g1"))
        .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
            "error": {"code": "serviceNotAvailable", "message": "Try again later"}
        })))
        .mount(&server)
        .await;

    let err = client(&server).group_exists("g1").await.unwrap_err();
    match &err {
        Error::Directory(msg) => assert!(msg.starts_with("503:"), "got {}", msg),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_forbidden_is_not_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/groups/g1"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = client(&server).group_exists("g1").await.unwrap_err();
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_user_groups_follow_next_link() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/u1/memberOf/microsoft.graph.group"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [{"id": "g1"}, {"id": "g2"}],
            "@odata.nextLink": format!("{}/page2", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [{"id": "g3"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let groups = client(&server).get_user_groups("u1").await.unwrap();
    assert_eq!(groups, vec!["g1", "g2", "g3"]);
}

#[tokio::test]
async fn test_group_members_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/groups/g1/members"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [{"id": "u1"}, {"id": "u2"}]
        })))
        .mount(&server)
        .await;

    let members = client(&server).get_group_members("g1").await.unwrap();
    assert_eq!(members, vec!["u1", "u2"]);
}

#[tokio::test]
async fn test_add_existing_member_is_idempotent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/groups/g1/members/$ref"))
        .and(body_json(serde_json::json!({
            "@odata.id": format!("{}/directoryObjects/u1", server.uri())
        })))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {
                "code": "Request_BadRequest",
                "message": "One or more added object references already exist for the following modified properties: 'members'."
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).add_user_to_group("u1", "g1").await.unwrap();
}

#[tokio::test]
async fn test_add_member_other_bad_request_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/groups/g1/members/$ref"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {"code": "Request_BadRequest", "message": "Invalid object identifier"}
        })))
        .mount(&server)
        .await;

    let err = client(&server).add_user_to_group("u1", "g1").await.unwrap_err();
    assert!(matches!(err, Error::Directory(ref m) if m.starts_with("400:")));
}

#[tokio::test]
async fn test_remove_non_member_is_idempotent() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/groups/g1/members/u1/$ref"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).remove_user_from_group("u1", "g1").await.unwrap();
}

#[tokio::test]
async fn test_ids_are_encoded_as_single_path_segments() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/groups/a%2Fb%3Fc%23d"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "x"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/u%2F..%2Fadmin/memberOf/microsoft.graph.group"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(client.group_exists("a/b?c#d").await.unwrap());
    assert!(client.get_user_groups("u/../admin").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_endless_paging_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/groups/g1/members"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [{"id": "u1"}],
            "@odata.nextLink": format!("{}/groups/g1/members", server.uri())
        })))
        .mount(&server)
        .await;

    let err = client(&server).get_group_members("g1").await.unwrap_err();
    match &err {
        Error::Directory(msg) => assert!(msg.starts_with("422:"), "got {}", msg),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!err.is_transient());
}
