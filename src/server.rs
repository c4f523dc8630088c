//! HTTP query server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/retrieve` | Context chunks visible at an access level |
//! | `POST` | `/tabular/query` | Natural-language question over a table |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "forbidden", "message": "Security check failed: Invalid signature" } }
//! ```
//!
//! Error codes: `bad_request` (400), `forbidden` (403), `not_found` (404),
//! `busy` (503), `internal` (500).
//!
//! In-flight requests are bounded by `[server].max_concurrent_requests`;
//! past that the server answers `busy` rather than queueing.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::RagError;
use crate::retriever::Retriever;
use crate::sql::TabularQueryEngine;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    retriever: Arc<Retriever>,
    tabular: Arc<TabularQueryEngine>,
    default_top_k: usize,
    limiter: Arc<Semaphore>,
}

impl AppState {
    pub fn new(
        config: &Config,
        retriever: Arc<Retriever>,
        tabular: Arc<TabularQueryEngine>,
    ) -> Self {
        Self {
            retriever,
            tabular,
            default_top_k: config.retrieval.top_k,
            limiter: Arc::new(Semaphore::new(config.server.max_concurrent_requests)),
        }
    }

    fn permit(&self) -> Result<OwnedSemaphorePermit, AppError> {
        self.limiter
            .clone()
            .try_acquire_owned()
            .map_err(|_| busy("server is at capacity; retry later"))
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/retrieve", post(handle_retrieve))
        .route("/tabular/query", post(handle_tabular_query))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Bind `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config, state: AppState) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
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

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        self.code
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn busy(message: impl Into<String>) -> AppError {
    error(StatusCode::SERVICE_UNAVAILABLE, "busy", message)
}

/// Map a pipeline error to a response by its typed cause, if any.
fn classify(err: anyhow::Error) -> AppError {
    let message = format!("{:#}", err);
    match err.downcast_ref::<RagError>() {
        Some(
            RagError::InvalidAccessLevel { .. }
            | RagError::InvalidDocument(_)
            | RagError::UnsupportedDocumentType(_)
            | RagError::UnsafeSql(_),
        ) => bad_request(message),
        Some(RagError::SecurityCheckFailed(_)) => {
            error(StatusCode::FORBIDDEN, "forbidden", message)
        }
        Some(RagError::TableNotFound(_)) => error(StatusCode::NOT_FOUND, "not_found", message),
        _ => {
            tracing::error!(error = %message, "request failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /retrieve ============

/// Upper bound on `top_k` accepted from clients.
pub const MAX_TOP_K: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct RetrieveRequest {
    pub query: String,
    pub access_level: i64,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RetrieveResponse {
    pub context: Vec<String>,
}

pub async fn handle_retrieve(
    State(state): State<AppState>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, AppError> {
    let _permit = state.permit()?;

    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let top_k = req.top_k.unwrap_or(state.default_top_k);
    if top_k == 0 || top_k > MAX_TOP_K {
        return Err(bad_request(format!(
            "top_k must be between 1 and {}",
            MAX_TOP_K
        )));
    }

    let context = state
        .retriever
        .query(&req.query, req.access_level, top_k)
        .await
        .map_err(classify)?;

    Ok(Json(RetrieveResponse { context }))
}

// ============ POST /tabular/query ============

#[derive(Debug, Deserialize)]
pub struct TabularRequest {
    pub question: String,
    pub access_level: i64,
    pub table: String,
}

#[derive(Debug, Serialize)]
pub struct TabularResponse {
    pub answer: String,
}

pub async fn handle_tabular_query(
    State(state): State<AppState>,
    Json(req): Json<TabularRequest>,
) -> Result<Json<TabularResponse>, AppError> {
    let _permit = state.permit()?;

    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    if req.table.trim().is_empty() {
        return Err(bad_request("table must not be empty"));
    }

    let answer = state
        .tabular
        .run_query(&req.question, req.access_level, &req.table)
        .await
        .map_err(classify)?;

    Ok(Json(TabularResponse { answer }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_map_to_statuses() {
        let cases: Vec<(RagError, StatusCode, &str)> = vec![
            (
                RagError::InvalidAccessLevel { level: 9, total: 5 },
                StatusCode::BAD_REQUEST,
                "bad_request",
            ),
            (
                RagError::SecurityCheckFailed("Invalid signature".to_string()),
                StatusCode::FORBIDDEN,
                "forbidden",
            ),
            (
                RagError::TableNotFound("loans".to_string()),
                StatusCode::NOT_FOUND,
                "not_found",
            ),
        ];
        for (err, status, code) in cases {
            let mapped = classify(anyhow::Error::new(err).context("outer"));
            assert_eq!(mapped.status(), status);
            assert_eq!(mapped.code(), code);
        }
    }

    #[test]
    fn untyped_errors_are_internal() {
        let mapped = classify(anyhow::anyhow!("connection reset"));
        assert_eq!(mapped.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(mapped.code(), "internal");
    }
}
