//! HTTP API for the query pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/query` | Batch query; returns answer, sources, step record |
//! | `GET`  | `/api/query/stream` | Streamed query as SSE `step` events + one `final` event |
//! | `GET`  | `/health` | Liveness check (returns version) |
//!
//! Error responses use the shape
//! `{ "error": { "code": "...", "message": "..." } }` with codes
//! `access_denied` (403), `bad_request` (400), `generation_unavailable`
//! (503), `generation_failed` (502), `internal` (500).

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::generate::GenerationError;
use crate::models::{QueryEvent, QueryMode, QueryOutcome, QueryRequest};
use crate::pipeline::Pipeline;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

/// Start the HTTP server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(config: &Config, pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let state = AppState { pipeline };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/query", post(handle_query))
        .route("/api/query/stream", get(handle_query_stream))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind = %config.server.bind, "query server listening");

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Map a pipeline failure to an HTTP response. Generation failures keep
/// their retryable/fatal split; everything else is internal.
fn classify_error(err: anyhow::Error) -> AppError {
    match err.downcast_ref::<GenerationError>() {
        Some(GenerationError::Retryable(_)) => AppError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "generation_unavailable",
            err.to_string(),
        ),
        Some(GenerationError::Fatal(_)) => AppError::new(
            StatusCode::BAD_GATEWAY,
            "generation_failed",
            err.to_string(),
        ),
        None => AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            format!("{:#}", err),
        ),
    }
}

// ============ POST /api/query ============

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<crate::models::QueryResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            "question must not be empty",
        ));
    }

    match state.pipeline.run(&req).await.map_err(classify_error)? {
        QueryOutcome::Completed(resp) => Ok(Json(resp)),
        QueryOutcome::Denied { step } => Err(AppError::new(
            StatusCode::FORBIDDEN,
            "access_denied",
            step.detail
                .unwrap_or_else(|| "no sources permitted for this role".to_string()),
        )),
    }
}

// ============ GET /api/query/stream ============

#[derive(Deserialize)]
struct StreamParams {
    question: String,
    role: String,
    #[serde(default)]
    mode: Option<QueryMode>,
}

async fn handle_query_stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let req = QueryRequest {
        question: params.question,
        role: params.role,
        mode: params.mode.unwrap_or_default(),
    };

    let (tx, rx) = tokio::sync::mpsc::channel::<QueryEvent>(16);
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        pipeline.run_stream(req, tx).await;
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        let (name, data) = match &event {
            QueryEvent::Step(_) => ("step", serde_json::to_string(&event)),
            QueryEvent::Final(_) => ("final", serde_json::to_string(&event)),
        };
        Ok(Event::default()
            .event(name)
            .data(data.unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))))
    });

    Sse::new(stream)
}

// ============ GET /health ============

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
