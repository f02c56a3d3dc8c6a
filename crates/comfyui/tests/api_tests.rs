//! Integration tests for [`ComfyUIApi`] against a mock ComfyUI server.
//!
//! The mock is a small axum router that records submitted prompts and
//! serves a fixed `/queue` body.

use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use flowcontrol_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use flowcontrol_comfyui::backend::PromptBackend;
use flowcontrol_comfyui::queue::ClientQueue;
use flowcontrol_core::types::ClientId;

#[derive(Clone, Default)]
struct MockState {
    submitted: Arc<Mutex<Vec<Value>>>,
    reject: bool,
}

async fn prompt(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    if state.reject {
        let error = json!({"error": {"type": "prompt_no_outputs"}, "node_errors": {}});
        return (StatusCode::BAD_REQUEST, Json(error)).into_response();
    }

    let mut submitted = state.submitted.lock().unwrap();
    submitted.push(body);
    let number = submitted.len();
    Json(json!({"prompt_id": format!("p-{number}"), "number": number, "node_errors": {}}))
        .into_response()
}

async fn queue() -> Json<Value> {
    Json(json!({
        "queue_running": [[0, "p-0", {}, {"client_id": "me"}, ["9"]]],
        "queue_pending": [
            [1, "p-1", {}, {"client_id": "other"}, ["9"]],
            [2, "p-2", {}, {"client_id": "me"}, ["9"]]
        ]
    }))
}

/// Start the mock server on an ephemeral port and return its base URL.
async fn spawn_mock(state: MockState) -> String {
    let app = Router::new()
        .route("/prompt", post(prompt))
        .route("/queue", get(queue))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

// ---------------------------------------------------------------------------
// Test: submission posts prompt and client_id
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_workflow_posts_prompt_and_client_id() {
    let state = MockState::default();
    let api = ComfyUIApi::new(spawn_mock(state.clone()).await);
    let client_id = ClientId::from("me");
    let workflow = json!({"3": {"inputs": {"seed": 42}}});

    let response = api.submit_workflow(&workflow, &client_id).await.unwrap();

    assert_eq!(response.prompt_id, "p-1");
    assert_eq!(response.number, 1);

    let submitted = state.submitted.lock().unwrap();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0]["prompt"], workflow);
    assert_eq!(submitted[0]["client_id"], "me");
}

// ---------------------------------------------------------------------------
// Test: non-2xx responses surface status and body
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejected_submission_is_api_error() {
    let state = MockState {
        reject: true,
        ..Default::default()
    };
    let api = ComfyUIApi::new(spawn_mock(state).await);

    let err = api
        .submit_workflow(&json!({}), &ClientId::from("me"))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ComfyUIApiError::ApiError { status: 400, ref body } if body.contains("prompt_no_outputs")
    );
}

// ---------------------------------------------------------------------------
// Test: queue endpoint is parsed and attributed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_queue_attributes_entries_by_client() {
    let api = ComfyUIApi::new(spawn_mock(MockState::default()).await);

    let snapshot = api.get_queue().await.unwrap();

    assert_eq!(snapshot.running.len(), 1);
    assert_eq!(snapshot.pending.len(), 2);
    assert_eq!(
        snapshot.for_client(&ClientId::from("me")),
        ClientQueue { running: 1, pending: 1 }
    );
}

// ---------------------------------------------------------------------------
// Test: ComfyUIApi works behind the backend trait object
// ---------------------------------------------------------------------------

#[tokio::test]
async fn api_is_usable_as_trait_object() {
    let state = MockState::default();
    let backend: Arc<dyn PromptBackend> = Arc::new(ComfyUIApi::new(spawn_mock(state.clone()).await));

    backend
        .submit_prompt(&json!({"a": 1}), &ClientId::from("me"))
        .await
        .unwrap();
    let snapshot = backend.queue().await.unwrap();

    assert_eq!(state.submitted.lock().unwrap().len(), 1);
    assert!(!snapshot.for_client(&ClientId::from("me")).is_drained());
}

// ---------------------------------------------------------------------------
// Test: connection failures are request errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_server_is_request_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let api = ComfyUIApi::new(format!("http://{addr}/"));
    assert_eq!(api.api_url(), format!("http://{addr}"));

    assert_matches!(api.get_queue().await, Err(ComfyUIApiError::Request(_)));
}
