use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Serialize;

use crate::handler::{ApiJsonResult, AppState, RequestError};

pub fn channel_router() -> Router<AppState> {
    Router::new()
        .route("/{channel_id}/watch", get(watch_channel))
        .route("/{channel_id}/stop", post(stop_channel))
}

#[derive(Serialize)]
struct WatchResponse {
    fingerprint: String,
    channel: String,
    /// URL path of the playlist on this server
    playlist: String,
    use_count: usize,
}

#[derive(Serialize)]
struct StopResponse {
    use_count: usize,
}

async fn watch_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> ApiJsonResult<WatchResponse> {
    let channel = state.device.channel(&channel_id).await?;
    let supervisor = state
        .registry
        .get_or_create(
            Arc::clone(&state.device),
            &channel.identifier,
            state.registry.default_options(),
        )
        .await?;

    let playlist = supervisor.start().await?;
    let status = supervisor.status().await?;
    let file = playlist
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();

    log::info!(
        "Watch: {} ({}) use count {}",
        channel.display_name(),
        supervisor.fingerprint().short(),
        status.use_count
    );
    Ok(Json(WatchResponse {
        fingerprint: supervisor.fingerprint().to_string(),
        channel: channel.display_name(),
        playlist: format!("/stream/{}/{}", supervisor.fingerprint(), file),
        use_count: status.use_count,
    }))
}

async fn stop_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> ApiJsonResult<StopResponse> {
    let supervisor = state
        .registry
        .lookup(state.device.as_ref(), &channel_id)
        .await?
        .ok_or_else(|| RequestError::NotFound(format!("channel {}", channel_id)))?;

    let use_count = supervisor.stop().await?;
    Ok(Json(StopResponse { use_count }))
}
