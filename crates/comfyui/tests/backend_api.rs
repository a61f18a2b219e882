//! Tests for `ComfyUIBackend` against an in-process stand-in for ComfyUI.
//!
//! The stand-in serves the handful of endpoints the backend uses and
//! reports a prompt as running for the first history lookups, then as
//! finished with a single video output.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use relay_comfyui::api::ComfyUIApi;
use relay_comfyui::backend::ComfyUIBackend;
use relay_core::backend::{BackendStatus, ExecutionHandle, RenderBackend};
use serde_json::{json, Value};

const PROMPT_ID: &str = "prompt-1";
const VIDEO: &[u8] = b"\x00\x00\x00\x18ftypmp42";

#[derive(Default)]
struct FakeComfy {
    history_calls: AtomicUsize,
    /// History lookups that return `{}` before the prompt finishes.
    unfinished_polls: usize,
    fail_execution: bool,
    uploaded: Mutex<Vec<(String, usize)>>,
    submitted: Mutex<Vec<Value>>,
}

async fn upload(State(fake): State<Arc<FakeComfy>>, mut multipart: Multipart) -> Json<Value> {
    let mut name = String::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() == Some("image") {
            name = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await.unwrap();
            fake.uploaded.lock().unwrap().push((name.clone(), bytes.len()));
        }
    }
    Json(json!({ "name": name, "subfolder": "", "type": "input" }))
}

async fn prompt(State(fake): State<Arc<FakeComfy>>, Json(body): Json<Value>) -> impl IntoResponse {
    if body["prompt"].get("broken").is_some() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid prompt", "node_errors": {} })),
        );
    }
    fake.submitted.lock().unwrap().push(body);
    (
        StatusCode::OK,
        Json(json!({ "prompt_id": PROMPT_ID, "number": 3, "node_errors": {} })),
    )
}

async fn history(State(fake): State<Arc<FakeComfy>>, Path(id): Path<String>) -> Json<Value> {
    let calls = fake.history_calls.fetch_add(1, Ordering::SeqCst);
    if id != PROMPT_ID || calls < fake.unfinished_polls {
        return Json(json!({}));
    }
    if fake.fail_execution {
        return Json(json!({
            PROMPT_ID: {
                "outputs": {},
                "status": {
                    "status_str": "error",
                    "completed": false,
                    "messages": [["execution_error", { "node_id": "72", "exception_message": "boom" }]]
                }
            }
        }));
    }
    Json(json!({
        PROMPT_ID: {
            "outputs": {
                "241": { "gifs": [{ "filename": "job_00001.mp4", "subfolder": "td_output", "type": "output" }] }
            },
            "status": { "status_str": "success", "completed": true, "messages": [] }
        }
    }))
}

async fn queue() -> Json<Value> {
    Json(json!({ "queue_running": [[0, PROMPT_ID, {}, {}, []]], "queue_pending": [] }))
}

async fn view(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    if params.get("filename").map(String::as_str) != Some("job_00001.mp4")
        || params.get("subfolder").map(String::as_str) != Some("td_output")
    {
        return (StatusCode::NOT_FOUND, [(header::CONTENT_TYPE, "text/plain")], Vec::new());
    }
    (StatusCode::OK, [(header::CONTENT_TYPE, "video/mp4")], VIDEO.to_vec())
}

async fn spawn_fake(fake: FakeComfy) -> (Arc<FakeComfy>, ComfyUIBackend) {
    let fake = Arc::new(fake);
    let app = Router::new()
        .route("/upload/image", post(upload))
        .route("/prompt", post(prompt))
        .route("/history/{id}", get(history))
        .route("/queue", get(queue))
        .route("/view", get(view))
        .with_state(Arc::clone(&fake));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let backend = ComfyUIBackend::new(ComfyUIApi::new(format!("http://{addr}/")));
    (fake, backend)
}

// ---------------------------------------------------------------------------
// Test: full happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stage_submit_poll_and_fetch() {
    let (fake, backend) = spawn_fake(FakeComfy {
        unfinished_polls: 1,
        ..FakeComfy::default()
    })
    .await;

    let staged = backend
        .stage_input("td_input_1.png", b"\x89PNG...".to_vec())
        .await
        .unwrap();
    assert_eq!(staged, "td_input_1.png");
    assert_eq!(
        fake.uploaded.lock().unwrap().as_slice(),
        &[("td_input_1.png".to_string(), 7)]
    );

    let workflow = json!({ "240": { "inputs": { "image": staged } } });
    let handle = backend.submit_workflow(&workflow).await.unwrap();
    assert_eq!(handle, ExecutionHandle(PROMPT_ID.to_string()));

    let submitted = fake.submitted.lock().unwrap()[0].clone();
    assert_eq!(submitted["prompt"], workflow);
    assert_eq!(submitted["client_id"], backend.client_id());

    assert_eq!(backend.poll(&handle).await.unwrap(), BackendStatus::Running);
    assert_eq!(backend.poll(&handle).await.unwrap(), BackendStatus::Complete);

    let output = backend.fetch_output(&handle).await.unwrap();
    assert_eq!(output.data, VIDEO);
    assert_eq!(output.content_type, "video/mp4");
}

// ---------------------------------------------------------------------------
// Test: input directory prefixes the staged name
// ---------------------------------------------------------------------------

#[tokio::test]
async fn staged_name_uses_input_dir_when_configured() {
    let (_fake, backend) = spawn_fake(FakeComfy::default()).await;
    let backend = backend.with_input_dir(Some("/srv/ComfyUI/input".into()));

    let staged = backend.stage_input("a.png", vec![1, 2, 3]).await.unwrap();
    assert_eq!(staged, "/srv/ComfyUI/input/a.png");
}

// ---------------------------------------------------------------------------
// Test: execution errors surface as Failed with the node message
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execution_error_is_reported_as_failed() {
    let (_fake, backend) = spawn_fake(FakeComfy {
        fail_execution: true,
        ..FakeComfy::default()
    })
    .await;

    let status = backend
        .poll(&ExecutionHandle(PROMPT_ID.to_string()))
        .await
        .unwrap();
    assert_eq!(
        status,
        BackendStatus::Failed("Workflow execution failed: node 72: boom".to_string())
    );
}

// ---------------------------------------------------------------------------
// Test: rejected submissions carry the HTTP status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejected_submission_is_an_error() {
    let (_fake, backend) = spawn_fake(FakeComfy::default()).await;

    let err = backend
        .submit_workflow(&json!({ "broken": {} }))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("400"), "got: {err}");
}

// ---------------------------------------------------------------------------
// Test: unreachable server is an error, not a panic
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_server_is_an_error() {
    let backend = ComfyUIBackend::new(ComfyUIApi::new("http://127.0.0.1:9".to_string()));
    let err = backend
        .poll(&ExecutionHandle(PROMPT_ID.to_string()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("HTTP request failed"));
}
