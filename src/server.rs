//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api` | Plain-text banner |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/site` | Submit a repository for ingestion (201) |
//! | `GET`  | `/api/workflow/{id}` | Workflow instance status |
//! | `POST` | `/api/ask` | Answer a question about an ingested repository |
//!
//! # Error Contract
//!
//! ```json
//! { "success": false, "message": "repo not found in db" }
//! ```
//!
//! | Error | Status |
//! |-------|--------|
//! | validation | 400 |
//! | authorization | 403 |
//! | not found | 404 |
//! | conflict | 409 |
//! | anything else | 500, generic message |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use repo_rag_core::models::{IngestParams, WorkflowInstance};
use repo_rag_core::RagError;

use crate::answer::AnswerPipeline;
use crate::app;
use crate::config::Config;
use crate::workflow::WorkflowEngine;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: WorkflowEngine,
    pub answer: Arc<AnswerPipeline>,
}

/// Starts the HTTP server on `[server].bind`.
///
/// Interrupted workflow instances from a previous process are resumed
/// before the listener opens.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = app::open_store(config).await?;
    let engine = app::build_engine(config, store.clone())?;
    let answer = app::build_answer_pipeline(config, store)?;

    let resumed = engine.resume_interrupted().await?;
    if resumed > 0 {
        tracing::info!(resumed, "resumed interrupted workflows");
    }
    engine.spawn_queue_poller(Duration::from_secs(config.workflow.poll_interval_secs));

    let router = build_router(AppState {
        engine,
        answer: Arc::new(answer),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "listening");
    println!("repo-rag server listening on http://{}", config.server.bind);

    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api", get(handle_banner))
        .route("/api/site", post(handle_submit))
        .route("/api/workflow/{id}", get(handle_status))
        .route("/api/ask", post(handle_ask))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, message) = match &err {
            RagError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            RagError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            RagError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            RagError::Authorization(_) => (
                StatusCode::FORBIDDEN,
                "repository is not accessible with the given credentials".to_string(),
            ),
            _ => {
                tracing::error!(code = err.code(), error = %err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        if status != StatusCode::INTERNAL_SERVER_ERROR {
            tracing::debug!(code = err.code(), error = %err, "request rejected");
        }
        AppError { status, message }
    }
}

// ============ Success envelopes ============

#[derive(Serialize)]
struct Envelope<T> {
    success: bool,
    message: &'static str,
    data: T,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceData {
    instance_id: String,
    status: String,
}

impl From<&WorkflowInstance> for InstanceData {
    fn from(instance: &WorkflowInstance) -> Self {
        Self {
            instance_id: instance.id.clone(),
            status: instance.status.to_string(),
        }
    }
}

// ============ GET /api, GET /health ============

async fn handle_banner() -> &'static str {
    concat!("repo-rag ", env!("CARGO_PKG_VERSION"))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/site ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    #[serde(default)]
    url: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    skip_paths: Vec<String>,
}

async fn handle_submit(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut params = IngestParams::new(req.url);
    params.token = req.token.filter(|t| !t.is_empty());
    params.skip_paths = req.skip_paths;

    let instance = state.engine.submit(params).await?;

    Ok((
        StatusCode::CREATED,
        Json(Envelope {
            success: true,
            message: "rag workflow started",
            data: InstanceData::from(&instance),
        }),
    ))
}

// ============ GET /api/workflow/{id} ============

async fn handle_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let instance = state.engine.status(&id).await?;

    Ok(Json(Envelope {
        success: true,
        message: "rag workflow status fetched successfully",
        data: InstanceData::from(&instance),
    }))
}

// ============ POST /api/ask ============

#[derive(Deserialize)]
struct AskRequest {
    url: String,
    question: String,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Serialize)]
struct AskResponse {
    response: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<impl IntoResponse, AppError> {
    let token = req.token.as_deref().filter(|t| !t.is_empty());
    let response = state.answer.ask(&req.url, &req.question, token).await?;

    Ok(Json(AskResponse { response }))
}
