//! HTTP surface tests against the assembled router.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use std::sync::Arc;

use common::{TestHarness, fast_config, harness_with};
use patsim::server::{self, AppState, SessionDirectory};

fn app(h: &TestHarness) -> Router {
    let state = AppState {
        engine: h.engine.clone(),
        outbox: h.outbox.clone(),
        directory: Arc::new(SessionDirectory::new()),
    };
    server::build_app(state, 5, 16)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn livez_responds_ok() {
    let h = harness_with(fast_config(), 3);
    let response = app(&h).oneshot(empty_request("GET", "/livez")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn create_session_returns_created_with_expiry() {
    let h = harness_with(fast_config(), 3);

    let response = app(&h)
        .oneshot(json_request("POST", "/api/v1/sessions", json!({"user_id": "u1"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    assert_eq!(body["user_id"], "u1");
    assert!(body["session_id"].as_str().unwrap().starts_with("session_"));
    assert!(!body["expires_at"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn second_session_for_same_user_conflicts() {
    let h = harness_with(fast_config(), 3);
    let app = app(&h);

    let first = app
        .clone()
        .oneshot(json_request("POST", "/api/v1/sessions", json!({"user_id": "u1"})))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .oneshot(json_request("POST", "/api/v1/sessions", json!({"user_id": "u1"})))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn quota_denial_maps_to_payment_required() {
    let h = harness_with(fast_config(), 0);

    let response = app(&h)
        .oneshot(json_request("POST", "/api/v1/sessions", json!({"user_id": "u1"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn message_to_unknown_session_is_not_found() {
    let h = harness_with(fast_config(), 3);

    let response = app(&h)
        .oneshot(json_request(
            "POST",
            "/api/v1/sessions/session_nope/messages",
            json!({"text": "hi"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn buffered_message_is_accepted_and_overflow_rate_limited() {
    let h = harness_with(fast_config(), 3);
    let app = app(&h);

    let session_id = h.engine.start_session("u1").await.unwrap();
    let uri = format!("/api/v1/sessions/{session_id}/messages");

    for i in 0..5 {
        let response = app
            .clone()
            .oneshot(json_request("POST", &uri, json!({"text": format!("m{i}")})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let overflow = app
        .oneshot(json_request("POST", &uri, json!({"text": "m5"})))
        .await
        .unwrap();
    assert_eq!(overflow.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn get_messages_drains_outbox_after_seq() {
    let h = harness_with(fast_config(), 3);
    let app = app(&h);

    h.provider
        .script_turn("respond", "Answer.", "Hello there.", "hey ||| hello there");
    let session_id = h.engine.start_session("u1").await.unwrap();
    h.engine
        .on_operator_message(&session_id, "hi")
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let all = app
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("/api/v1/sessions/{session_id}/messages"),
        ))
        .await
        .unwrap();
    assert_eq!(all.status(), StatusCode::OK);
    let body = body_json(all).await;
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["text"], "hey");
    let first_seq = messages[0]["seq"].as_u64().unwrap();

    let rest = app
        .oneshot(empty_request(
            "GET",
            &format!("/api/v1/sessions/{session_id}/messages?after={first_seq}"),
        ))
        .await
        .unwrap();
    let body = body_json(rest).await;
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["text"], "hello there");
}

#[tokio::test]
async fn ended_session_outbox_stays_readable_until_drained() {
    let h = harness_with(fast_config(), 3);
    let app = app(&h);
    h.provider
        .script_turn("disengage", "Say goodbye.", "Bye for now.", "bye for now");

    let created = app
        .clone()
        .oneshot(json_request("POST", "/api/v1/sessions", json!({"user_id": "u1"})))
        .await
        .unwrap();
    let session_id = body_json(created).await["session_id"]
        .as_str()
        .unwrap()
        .to_string();
    let uri = format!("/api/v1/sessions/{session_id}/messages");

    let sent = app
        .clone()
        .oneshot(json_request("POST", &uri, json!({"text": "done for today?"})))
        .await
        .unwrap();
    assert_eq!(sent.status(), StatusCode::ACCEPTED);
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert!(h.engine.registry().get(&session_id).is_none());

    // Parting words and the end notice survive the registry entry.
    let read = app.clone().oneshot(empty_request("GET", &uri)).await.unwrap();
    assert_eq!(read.status(), StatusCode::OK);
    let body = body_json(read).await;
    let messages = body["messages"].as_array().unwrap();
    let texts: Vec<&str> = messages.iter().map(|m| m["text"].as_str().unwrap()).collect();
    assert!(texts.contains(&"bye for now"));
    assert!(texts.iter().any(|t| t.contains("session has ended")));
    let last_seq = messages.last().unwrap()["seq"].as_u64().unwrap();

    // A read past the final message releases the outbox; after that the
    // session is gone for good.
    let drained = app
        .clone()
        .oneshot(empty_request("GET", &format!("{uri}?after={last_seq}")))
        .await
        .unwrap();
    assert_eq!(drained.status(), StatusCode::OK);
    assert!(h.outbox.messages_after("u1", 0).is_empty());

    let gone = app.oneshot(empty_request("GET", &uri)).await.unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_session_reports_phase_and_cost() {
    let h = harness_with(fast_config(), 3);

    let session_id = h.engine.start_session("u1").await.unwrap();
    let response = app(&h)
        .oneshot(empty_request("GET", &format!("/api/v1/sessions/{session_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["phase"], "active");
    assert_eq!(body["cost_units"], 0);
}

#[tokio::test]
async fn delete_session_ends_it() {
    let h = harness_with(fast_config(), 3);
    let app = app(&h);

    let session_id = h.engine.start_session("u1").await.unwrap();
    let uri = format!("/api/v1/sessions/{session_id}");

    let deleted = app.clone().oneshot(empty_request("DELETE", &uri)).await.unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    assert_eq!(h.reports.call_count(), 1);

    // The session is gone from the registry, so a repeat is 404.
    let repeat = app.oneshot(empty_request("DELETE", &uri)).await.unwrap();
    assert_eq!(repeat.status(), StatusCode::NOT_FOUND);
}
