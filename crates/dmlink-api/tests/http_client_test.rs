// Integration tests for `HttpDatamodelClient` using wiremock.
#![allow(clippy::unwrap_used)]

use serde_json::{Map, json};
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dmlink_api::{
    DatamodelRpc, Error, EventDescriptor, EventRequest, HttpDatamodelClient, SubscriptionStatus,
};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, HttpDatamodelClient) {
    let server = MockServer::start().await;
    let client = HttpDatamodelClient::with_client(
        reqwest::Client::new(),
        Url::parse(&server.uri()).unwrap(),
    );
    (server, client)
}

fn ok(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "meta": { "rc": "ok" }, "data": data }))
}

// ── Happy-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_get_state_explicit_only() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/datamodel/meshing/get-state"))
        .and(body_json(json!({ "path": "Zone:inlet", "explicit_only": true })))
        .respond_with(ok(json!({ "Velocity": 3.5 })))
        .expect(1)
        .mount(&server)
        .await;

    let state = client.get_state("meshing", "Zone:inlet", true).await.unwrap();
    assert_eq!(state, json!({ "Velocity": 3.5 }));
}

#[tokio::test]
async fn test_set_state_sends_value() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/datamodel/meshing/set-state"))
        .and(body_json(json!({ "path": "Setup", "state": { "Mode": "auto" } })))
        .respond_with(ok(serde_json::Value::Null))
        .expect(1)
        .mount(&server)
        .await;

    client
        .set_state("meshing", "Setup", json!({ "Mode": "auto" }))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_execute_command_returns_result() {
    let (server, client) = setup().await;

    let mut args = Map::new();
    args.insert("WorkflowType".into(), json!("Watertight Geometry"));

    Mock::given(method("POST"))
        .and(path("/datamodel/workflow/execute-command"))
        .and(body_json(json!({
            "path": "Workflow",
            "command": "InitializeWorkflow",
            "args": { "WorkflowType": "Watertight Geometry" }
        })))
        .respond_with(ok(json!(true)))
        .mount(&server)
        .await;

    let result = client
        .execute_command("workflow", "Workflow", "InitializeWorkflow", args)
        .await
        .unwrap();
    assert_eq!(result, json!(true));
}

#[tokio::test]
async fn test_subscribe_events_statuses() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/datamodel/test/subscribe-events"))
        .respond_with(ok(json!([
            { "tag": "/test/created/A:A1/B", "status": "ok" }
        ])))
        .mount(&server)
        .await;

    let results = client
        .subscribe_events(
            "test",
            vec![EventDescriptor {
                tag: "/test/created/A:A1/B".into(),
                request: EventRequest::Created {
                    parent_path: "A:A1".into(),
                    child_type: "B".into(),
                },
            }],
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, SubscriptionStatus::Ok);
}

#[tokio::test]
async fn test_static_info() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/datamodel/workflow/static-info"))
        .respond_with(ok(json!({
            "singletons": { "Workflow": { "parameters": { "TaskList": { "type": "string_list" } } } },
            "named_objects": { "TaskObject": {} }
        })))
        .mount(&server)
        .await;

    let info = client.get_static_info("workflow").await.unwrap();
    assert!(info.singletons.contains_key("Workflow"));
    assert!(info.named_objects.contains_key("TaskObject"));
}

// ── Error-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_rejection_passes_message_through() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/datamodel/meshing/set-state"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "meta": { "rc": "error", "msg": "Unknown attribute 'Colour'" }
        })))
        .mount(&server)
        .await;

    let err = client
        .set_state("meshing", "Setup", json!({ "Colour": "red" }))
        .await
        .unwrap_err();

    match err {
        Error::Rejected { message, .. } => assert_eq!(message, "Unknown attribute 'Colour'"),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unauthorized() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/datamodel/meshing/get-state"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client.get_state("meshing", "", false).await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized { .. }));
}
