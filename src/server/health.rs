//! Liveness and status endpoints.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use super::AppState;
use crate::scheduler::RunState;
use crate::types::TagKey;

/// Health check handler.
///
/// Returns 200 OK with the text "OK" for load balancers and liveness probes.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub active_feeds: Vec<String>,
    pub tag_keys: Vec<TagKeyStatus>,
    pub dedupe_entries: usize,
}

#[derive(Debug, Serialize)]
pub struct TagKeyStatus {
    pub tag_key: TagKey,
    pub state: RunState,
    pub interval_ms: u64,
    pub batch_size: u32,
}

/// Snapshot of what is running: active feeds and the scheduler's tag keys.
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let registry = state.registry();
    let active_feeds = registry
        .list_feeds()
        .await
        .into_iter()
        .filter(|feed| feed.active)
        .map(|feed| feed.config.name)
        .collect();

    let scheduler = registry.scheduler();
    let tag_keys = scheduler
        .registered_tags()
        .into_iter()
        .filter_map(|key| {
            let config = scheduler.effective_config(&key)?;
            let state = scheduler.run_state(&key)?;
            Some(TagKeyStatus {
                interval_ms: u64::try_from(config.interval.as_millis()).unwrap_or(u64::MAX),
                batch_size: config.batch_size,
                state,
                tag_key: key,
            })
        })
        .collect();

    Json(StatusResponse {
        active_feeds,
        tag_keys,
        dedupe_entries: state.dedupe().len(),
    })
}
