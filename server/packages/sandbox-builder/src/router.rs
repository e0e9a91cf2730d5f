use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use sandbox_builder_claude_agent::ClaudeQuery;
use sandbox_builder_error::{BuilderError, ErrorType, ProblemBody};
use sandbox_builder_stream_relay::{
    done_frame, event_stream_to_sse, json_frame, start_relay, AgentEvent,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::Span;
use utoipa::{OpenApi, ToSchema};

use crate::config::AppConfig;

#[derive(Debug)]
pub struct AppState {
    config: AppConfig,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

pub fn build_router(state: AppState) -> Router {
    build_router_with_state(Arc::new(state)).0
}

pub fn build_router_with_state(shared: Arc<AppState>) -> (Router, Arc<AppState>) {
    let api_router = Router::new()
        .route("/generate", post(post_generate))
        .route("/generate-daytona", post(post_generate_daytona))
        .with_state(shared.clone());

    let v1_router = Router::new().route("/health", get(get_health));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %req.method(),
                uri = %req.uri()
            )
        })
        .on_request(|_req: &Request<_>, span: &Span| {
            tracing::info!(parent: span, "request");
        })
        .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
            tracing::info!(
                parent: span,
                status = %res.status(),
                latency_ms = latency.as_millis()
            );
        });

    let router = Router::new()
        .nest("/api", api_router)
        .nest("/v1", v1_router)
        .fallback(not_found)
        .layer(trace_layer);

    (router, shared)
}

#[derive(OpenApi)]
#[openapi(
    paths(get_health, post_generate, post_generate_daytona),
    components(schemas(GenerateRequest, HealthResponse, ProblemBody, ErrorType)),
    tags(
        (name = "meta", description = "Service metadata"),
        (name = "generate", description = "Prompt-to-site generation streams")
    )
)]
pub struct ApiDoc;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Builder(#[from] BuilderError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let problem: ProblemBody = match &self {
            ApiError::Builder(err) => err.to_problem_body(),
        };
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(problem)).into_response()
    }
}

#[utoipa::path(
    get,
    path = "/v1/health",
    responses((status = 200, body = HealthResponse)),
    tag = "meta"
)]
async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[utoipa::path(
    post,
    path = "/api/generate",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "SSE stream of Claude Code messages, ending with [DONE]"),
        (status = 400, body = ProblemBody),
        (status = 500, body = ProblemBody)
    ),
    tag = "generate"
)]
async fn post_generate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let prompt = require_prompt(payload)?;
    let api_key = state.config.require_agent_key()?;
    tracing::info!(prompt_chars = prompt.chars().count(), "starting local generation");

    let query = ClaudeQuery::new(state.config.agent.clone(), api_key);
    Ok(Sse::new(local_generation_frames(&query, &prompt)))
}

#[utoipa::path(
    post,
    path = "/api/generate-daytona",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "SSE stream of progress, claude_message, tool_use, error and complete events, ending with [DONE]"),
        (status = 400, body = ProblemBody),
        (status = 500, body = ProblemBody)
    ),
    tag = "generate"
)]
async fn post_generate_daytona(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let prompt = require_prompt(payload)?;
    let launch = state.config.helper_launch()?;
    tracing::info!(
        prompt_chars = prompt.chars().count(),
        helper = %launch.display(),
        "starting sandbox generation"
    );

    let events = start_relay(launch, prompt);
    Ok(Sse::new(event_stream_to_sse(events)))
}

async fn not_found() -> Response {
    let mut problem = ProblemBody::new(ErrorType::InvalidRequest, "route not found");
    problem.status = StatusCode::NOT_FOUND.as_u16();
    (StatusCode::NOT_FOUND, Json(problem)).into_response()
}

fn require_prompt(payload: Result<Json<GenerateRequest>, JsonRejection>) -> Result<String, BuilderError> {
    let Json(request) = payload.map_err(|rejection| BuilderError::InvalidRequest {
        message: rejection.body_text(),
    })?;
    match request.prompt {
        Some(prompt) if !prompt.trim().is_empty() => Ok(prompt),
        _ => Err(BuilderError::MissingPrompt),
    }
}

/// Every stream-json message verbatim, then `[DONE]`. A failure becomes an
/// error frame before `[DONE]`. Dropping the stream aborts the agent.
fn local_generation_frames(
    query: &ClaudeQuery,
    prompt: &str,
) -> BoxStream<'static, Result<Event, Infallible>> {
    let done = stream::once(async { done_frame() });
    match query.start(prompt) {
        Ok(messages) => messages
            .map(|item| match item {
                Ok(message) => json_frame(&message),
                Err(err) => {
                    tracing::error!(error = %err, "local generation failed");
                    error_frame(err.to_string())
                }
            })
            .chain(done)
            .map(Ok)
            .boxed(),
        Err(err) => {
            tracing::error!(error = %err, "failed to start local generation");
            stream::once(async move { error_frame(err.to_string()) })
                .chain(done)
                .map(Ok)
                .boxed()
        }
    }
}

fn error_frame(message: String) -> Event {
    match serde_json::to_value(AgentEvent::error(message)) {
        Ok(value) => json_frame(&value),
        Err(_) => Event::default().data(r#"{"type":"error","message":"internal error"}"#),
    }
}
