//! `/api/v1/feeds` handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::registry::{FeedSpec, FeedUpdate, FeedView};

#[derive(Debug, Serialize)]
pub struct ChangedResponse {
    pub changed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LastIdBody {
    pub last_id: u64,
}

pub async fn list_feeds(State(state): State<AppState>) -> Json<Vec<FeedView>> {
    Json(state.registry().list_feeds().await)
}

pub async fn create_feed(
    State(state): State<AppState>,
    Json(spec): Json<FeedSpec>,
) -> Result<(StatusCode, Json<FeedView>), ApiError> {
    let view = state.registry().create_feed(spec).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_feed(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<FeedView>, ApiError> {
    Ok(Json(state.registry().get_feed(&name).await?))
}

pub async fn update_feed(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(update): Json<FeedUpdate>,
) -> Result<Json<FeedView>, ApiError> {
    Ok(Json(state.registry().update_feed(&name, update).await?))
}

pub async fn delete_feed(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry().delete_feed(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start_feed(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ChangedResponse>, ApiError> {
    let changed = state.registry().start_feed(&name).await?;
    Ok(Json(ChangedResponse { changed }))
}

pub async fn stop_feed(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ChangedResponse>, ApiError> {
    let changed = state.registry().stop_feed(&name).await?;
    Ok(Json(ChangedResponse { changed }))
}

pub async fn get_last_id(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<LastIdBody>, ApiError> {
    let last_id = state.registry().get_last_id(&name)?;
    Ok(Json(LastIdBody { last_id }))
}

/// Administrative cursor override. May move the cursor backwards.
pub async fn set_last_id(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<LastIdBody>,
) -> Result<Json<LastIdBody>, ApiError> {
    state.registry().set_last_id(&name, body.last_id)?;
    Ok(Json(body))
}
