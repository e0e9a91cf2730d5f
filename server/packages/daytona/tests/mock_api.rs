use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use sandbox_builder_daytona::{
    CreateSandboxRequest, DaytonaClient, DaytonaConfig, DaytonaError, ExecuteRequest,
    SandboxState,
};
use serde_json::{json, Value};

const API_KEY: &str = "test-key";
const SANDBOX_ID: &str = "7a517a82-942c-486b-8a62-6357773eb3ea";

#[derive(Default)]
struct MockState {
    sandboxes: Vec<Value>,
    polls: u32,
    executed: Vec<Value>,
}

type Shared = Arc<Mutex<MockState>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == format!("Bearer {API_KEY}"))
}

async fn create(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "bad token").into_response();
    }
    let sandbox = json!({
        "id": SANDBOX_ID,
        "state": "creating",
        "public": body["public"],
    });
    state.lock().expect("lock").sandboxes.push(sandbox.clone());
    Json(sandbox).into_response()
}

async fn list(State(state): State<Shared>) -> Json<Value> {
    Json(Value::Array(state.lock().expect("lock").sandboxes.clone()))
}

async fn get_one(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut guard = state.lock().expect("lock");
    guard.polls += 1;
    let started = guard.polls >= 2;
    let Some(sandbox) = guard.sandboxes.iter_mut().find(|s| s["id"] == id.as_str()) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if started {
        sandbox["state"] = json!("started");
    }
    Json(sandbox.clone()).into_response()
}

async fn remove(State(state): State<Shared>, Path(id): Path<String>) -> StatusCode {
    let mut guard = state.lock().expect("lock");
    let before = guard.sandboxes.len();
    guard.sandboxes.retain(|s| s["id"] != id.as_str());
    if guard.sandboxes.len() == before {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn preview(Path((id, port)): Path<(String, u16)>) -> Json<Value> {
    Json(json!({
        "url": format!("https://{port}-{id}.proxy.daytona.works"),
        "token": "preview-token",
    }))
}

async fn project_dir() -> Json<Value> {
    Json(json!({"dir": "/home/daytona"}))
}

async fn execute(
    State(state): State<Shared>,
    Path(_id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let command = body["command"].as_str().unwrap_or_default().to_string();
    state.lock().expect("lock").executed.push(body);
    let exit_code = if command.starts_with("false") { 1 } else { 0 };
    Json(json!({"exitCode": exit_code, "result": format!("ran: {command}")}))
}

async fn spawn_mock() -> (String, Shared) {
    let state: Shared = Arc::new(Mutex::new(MockState::default()));
    let app = Router::new()
        .route("/api/sandbox", post(create).get(list))
        .route("/api/sandbox/:id", get(get_one).delete(remove))
        .route("/api/sandbox/:id/ports/:port/preview-url", get(preview))
        .route("/api/toolbox/:id/toolbox/project-dir", get(project_dir))
        .route("/api/toolbox/:id/toolbox/process/execute", post(execute))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/api"), state)
}

fn client_for(base_url: &str, api_key: &str) -> DaytonaClient {
    let config = DaytonaConfig::new(api_key, Some(base_url)).expect("config");
    DaytonaClient::new(&config).expect("client")
}

#[tokio::test]
async fn sandbox_lifecycle_against_mock_api() {
    let (base_url, state) = spawn_mock().await;
    let client = client_for(&base_url, API_KEY);

    let sandbox = client
        .create_sandbox(&CreateSandboxRequest {
            public: true,
            ..CreateSandboxRequest::default()
        })
        .await
        .expect("create");
    assert_eq!(sandbox.id, SANDBOX_ID);
    assert_eq!(sandbox.state, Some(SandboxState::Creating));
    assert!(sandbox.public);

    let started = client
        .wait_until_started(SANDBOX_ID, Duration::from_secs(5), Duration::from_millis(10))
        .await
        .expect("started");
    assert_eq!(started.state, Some(SandboxState::Started));

    let found = client.find_sandbox(SANDBOX_ID).await.expect("find");
    assert_eq!(found.id, SANDBOX_ID);

    let link = client.preview_link(SANDBOX_ID, 3000).await.expect("preview");
    assert_eq!(
        link.url,
        format!("https://3000-{SANDBOX_ID}.proxy.daytona.works")
    );
    assert_eq!(link.token.as_deref(), Some("preview-token"));

    assert_eq!(
        client.project_dir(SANDBOX_ID).await.expect("dir"),
        "/home/daytona"
    );

    let output = client
        .execute_command(
            SANDBOX_ID,
            &ExecuteRequest::new("npm install")
                .cwd("/home/daytona/website-project")
                .env("PORT", "3000"),
        )
        .await
        .expect("execute");
    assert!(output.success());
    assert_eq!(output.result, "ran: npm install");

    let failed = client
        .execute_command(SANDBOX_ID, &ExecuteRequest::new("false"))
        .await
        .expect("execute");
    assert_eq!(failed.exit_code, 1);

    {
        let guard = state.lock().expect("lock");
        assert_eq!(
            guard.executed[0],
            json!({
                "command": "npm install",
                "cwd": "/home/daytona/website-project",
                "env": {"PORT": "3000"}
            })
        );
    }

    client.remove_sandbox(SANDBOX_ID).await.expect("remove");
    assert!(client.list_sandboxes().await.expect("list").is_empty());
    assert!(matches!(
        client.remove_sandbox(SANDBOX_ID).await,
        Err(DaytonaError::NotFound { .. })
    ));
}

#[tokio::test]
async fn missing_sandbox_is_not_found() {
    let (base_url, _state) = spawn_mock().await;
    let client = client_for(&base_url, API_KEY);

    let err = client.find_sandbox("nope").await.expect_err("missing");
    assert_eq!(err.to_string(), "Sandbox nope not found");
    assert!(matches!(
        client.get_sandbox("nope").await,
        Err(DaytonaError::NotFound { .. })
    ));
}

#[tokio::test]
async fn bad_credentials_surface_status_and_body() {
    let (base_url, _state) = spawn_mock().await;
    let client = client_for(&base_url, "wrong-key");

    let err = client
        .create_sandbox(&CreateSandboxRequest::default())
        .await
        .expect_err("unauthorized");
    match err {
        DaytonaError::Status { status, path, body } => {
            assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
            assert_eq!(path, "/sandbox");
            assert_eq!(body, "bad token");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
