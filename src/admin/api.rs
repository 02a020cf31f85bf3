//! REST API handlers for the admin server
//!
//! | method | path | success |
//! |---|---|---|
//! | GET/PUT | `/api/config` | 200 text / 204 |
//! | GET/PUT | `/api/state` | 200 JSON / 204 |
//! | GET/PUT | `/api/error-template` | 200 text / 204 |
//! | GET | `/api/stats` | 200 JSON array, newest first |
//! | GET | `/debug/stats.csv` | 200 CSV attachment |
//! | GET | `/api/health` | 200 JSON |
//!
//! Every failure is answered with `{"success":false,"error":"..."}`.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::storage::StoreError;

use super::server::AppState;

pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub const APPLICATION_JSON: &str = "application/json; charset=utf-8";
pub const TEXT_CSV: &str = "text/csv";
pub const CSV_DISPOSITION: &str = "attachment; filename=\"stats.csv\"";

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Whether a run currently holds the run-lock
    pub run_locked: bool,
}

/// A failed request: one status per error category
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = StatusCode::from_u16(err.category().status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), error = %self.message, "Admin request failed");
        } else {
            tracing::debug!(status = self.status.as_u16(), error = %self.message, "Admin request rejected");
        }
        (self.status, Json(ErrorResponse::new(self.message))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/api/health", get(health_check).fallback(method_not_allowed))
        // Document endpoints
        .route(
            "/api/config",
            get(get_config).put(put_config).fallback(method_not_allowed),
        )
        .route(
            "/api/state",
            get(get_state).put(put_state).fallback(method_not_allowed),
        )
        .route(
            "/api/error-template",
            get(get_error_template)
                .put(put_error_template)
                .fallback(method_not_allowed),
        )
        // Stats endpoints
        .route("/api/stats", get(list_stats).fallback(method_not_allowed))
        .route("/debug/stats.csv", get(export_stats).fallback(method_not_allowed))
        .fallback(not_found)
        .with_state(state)
}

async fn method_not_allowed() -> ApiError {
    ApiError::new(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
}

async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not found")
}

// ============================================================================
// Health Handlers
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();

    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
        run_locked: state.dir.run_lock().is_locked(),
    }))
}

// ============================================================================
// Document Handlers
// ============================================================================

async fn get_config(State(state): State<AppState>) -> ApiResult<Response> {
    let body = state.config_store.get().await?;
    Ok(([(header::CONTENT_TYPE, TEXT_PLAIN)], body).into_response())
}

async fn put_config(State(state): State<AppState>, body: Bytes) -> ApiResult<StatusCode> {
    state.config_store.put(&body).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_state(State(state): State<AppState>) -> ApiResult<Response> {
    let body = state.state_store.get().await?;
    Ok(([(header::CONTENT_TYPE, APPLICATION_JSON)], body).into_response())
}

async fn put_state(State(state): State<AppState>, body: Bytes) -> ApiResult<StatusCode> {
    state.state_store.put(&body).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_error_template(State(state): State<AppState>) -> ApiResult<Response> {
    let body = state.templates.get().await?;
    Ok(([(header::CONTENT_TYPE, TEXT_PLAIN)], body).into_response())
}

async fn put_error_template(State(state): State<AppState>, body: Bytes) -> ApiResult<StatusCode> {
    state.templates.put(&body).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Stats Handlers
// ============================================================================

async fn list_stats(State(state): State<AppState>) -> ApiResult<Json<Vec<serde_json::Value>>> {
    Ok(Json(state.stats.list().await?))
}

async fn export_stats(State(state): State<AppState>) -> ApiResult<Response> {
    let csv = state.stats.export().await?;
    Ok((
        [
            (header::CONTENT_TYPE, TEXT_CSV),
            (header::CONTENT_DISPOSITION, CSV_DISPOSITION),
        ],
        csv,
    )
        .into_response())
}

// ============================================================================
// Tests
// ============================================================================
