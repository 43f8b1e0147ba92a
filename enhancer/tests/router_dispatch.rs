//! Router dispatch through the real bridge client.

use enhancer::core::batch::{BatchStatus, ItemOutcome, RouterRequest};
use enhancer::io::bridge::BridgeClient;
use enhancer::io::config::RouterConfig;
use enhancer::router::dispatch;
use httpmock::prelude::*;
use serde_json::json;

fn client_for(server: &MockServer) -> BridgeClient {
    BridgeClient::new(&RouterConfig {
        bridge_url: server.base_url(),
        request_timeout_secs: 5,
        ..RouterConfig::default()
    })
    .expect("client")
}

#[tokio::test]
async fn mixed_batch_reports_each_failure_kind() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/apply-feedback")
                .json_body(json!({"feedback": "works"}));
            then.status(200)
                .json_body(json!({"run_id": "r1", "stdout": "ok\n", "exit_code": 0}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/apply-feedback")
                .json_body(json!({"feedback": "explodes"}));
            then.status(502).body("codex run failed");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/apply-feedback")
                .json_body(json!({"feedback": "garbled"}));
            then.status(200).body("<html>");
        })
        .await;

    let request: RouterRequest = serde_json::from_value(json!({
        "payload": [
            {"feedback": "works"},
            {"output": {"feedback": "explodes"}},
            {"feedback": "garbled"}
        ]
    }))
    .expect("request shape");
    let items = request.into_input().into_items().expect("items");

    let response = dispatch(&client_for(&server), items, 4)
        .await
        .expect("dispatch");

    assert_eq!(response.status, BatchStatus::PartialError);
    assert_eq!(response.results.len(), 3);

    match &response.results[0].outcome {
        ItemOutcome::Ok { result } => assert_eq!(result["run_id"], "r1"),
        other => panic!("item 0: {other:?}"),
    }
    match &response.results[1].outcome {
        ItemOutcome::Error { error } => {
            assert_eq!(error.message, "codex bridge error");
            assert_eq!(error.status_code, Some(502));
            assert_eq!(error.body.as_deref(), Some("codex run failed"));
        }
        other => panic!("item 1: {other:?}"),
    }
    match &response.results[2].outcome {
        ItemOutcome::Error { error } => assert_eq!(error.message, "invalid bridge response"),
        other => panic!("item 2: {other:?}"),
    }

    let wire = serde_json::to_value(&response).expect("serialize");
    assert_eq!(wire["status"], "partial-error");
    assert_eq!(wire["results"][1]["index"], 1);
    assert_eq!(wire["results"][1]["status"], "error");
}

#[tokio::test]
async fn unreachable_bridge_fails_items_not_batch() {
    let client = BridgeClient::new(&RouterConfig {
        bridge_url: "http://127.0.0.1:9".to_string(),
        request_timeout_secs: 2,
        ..RouterConfig::default()
    })
    .expect("client");
    let request: RouterRequest =
        serde_json::from_value(json!({"feedback": "anything"})).expect("request");

    let response = dispatch(&client, request.into_input().into_items().expect("items"), 4)
        .await
        .expect("dispatch");

    assert_eq!(response.status, BatchStatus::PartialError);
    match &response.results[0].outcome {
        ItemOutcome::Error { error } => {
            assert_eq!(error.message, "unable to reach codex bridge");
            assert!(error.detail.is_some());
        }
        other => panic!("unexpected {other:?}"),
    }
}
