//! `/api/v1/webhooks` handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use super::{ApiError, AppState};
use crate::registry::{WebhookSpec, WebhookUpdate, WebhookView};

pub async fn list_webhooks(State(state): State<AppState>) -> Json<Vec<WebhookView>> {
    Json(state.registry().list_webhooks())
}

pub async fn create_webhook(
    State(state): State<AppState>,
    Json(spec): Json<WebhookSpec>,
) -> Result<(StatusCode, Json<WebhookView>), ApiError> {
    let view = state.registry().create_webhook(spec).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_webhook(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<WebhookView>, ApiError> {
    Ok(Json(state.registry().get_webhook(&name)?))
}

pub async fn update_webhook(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(update): Json<WebhookUpdate>,
) -> Result<Json<WebhookView>, ApiError> {
    Ok(Json(state.registry().update_webhook(&name, update).await?))
}

/// Deletes the webhook and unlinks it from every feed.
pub async fn delete_webhook(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry().delete_webhook(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
