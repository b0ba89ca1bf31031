//! Administrative HTTP API.
//!
//! # Endpoints
//!
//! - `GET /health` - liveness probe
//! - `GET /api/v1/status` - active feeds and tag keys
//! - `GET|POST /api/v1/feeds`
//! - `GET|PATCH|DELETE /api/v1/feeds/{name}`
//! - `POST /api/v1/feeds/{name}/start`, `POST /api/v1/feeds/{name}/stop`
//! - `GET|PUT /api/v1/feeds/{name}/last-id`
//! - `GET|POST /api/v1/webhooks`
//! - `GET|PATCH|DELETE /api/v1/webhooks/{name}`
//!
//! Registry errors map to 400 (validation), 409 (duplicate), 404 (not found)
//! and 500 (storage or scheduler), with a `{"error": "..."}` body.

use std::sync::Arc;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::dedupe::DedupeCache;
use crate::registry::{FeedRegistry, RegistryError};

pub mod feeds;
pub mod health;
pub mod webhooks;

pub use health::{health_handler, status_handler};

/// Shared application state, passed to handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Arc<FeedRegistry>,
    dedupe: Arc<DedupeCache>,
}

impl AppState {
    pub fn new(registry: Arc<FeedRegistry>, dedupe: Arc<DedupeCache>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { registry, dedupe }),
        }
    }

    pub fn registry(&self) -> &FeedRegistry {
        &self.inner.registry
    }

    pub fn dedupe(&self) -> &DedupeCache {
        &self.inner.dedupe
    }
}

/// A registry error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub RegistryError);

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        ApiError(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RegistryError::Validation(_) => StatusCode::BAD_REQUEST,
            RegistryError::Duplicate { .. } => StatusCode::CONFLICT,
            RegistryError::NotFound { .. } => StatusCode::NOT_FOUND,
            RegistryError::Storage(_) | RegistryError::Scheduler(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Admin request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/status", get(status_handler))
        .route(
            "/api/v1/feeds",
            get(feeds::list_feeds).post(feeds::create_feed),
        )
        .route(
            "/api/v1/feeds/{name}",
            get(feeds::get_feed)
                .patch(feeds::update_feed)
                .delete(feeds::delete_feed),
        )
        .route("/api/v1/feeds/{name}/start", post(feeds::start_feed))
        .route("/api/v1/feeds/{name}/stop", post(feeds::stop_feed))
        .route(
            "/api/v1/feeds/{name}/last-id",
            get(feeds::get_last_id).put(feeds::set_last_id),
        )
        .route(
            "/api/v1/webhooks",
            get(webhooks::list_webhooks).post(webhooks::create_webhook),
        )
        .route(
            "/api/v1/webhooks/{name}",
            get(webhooks::get_webhook)
                .patch(webhooks::update_webhook)
                .delete(webhooks::delete_webhook),
        )
        .with_state(app_state)
}
