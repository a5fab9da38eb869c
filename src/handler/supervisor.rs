use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use tablo_live::{Fingerprint, SupervisorStatus};

use crate::handler::{ApiJsonResult, AppState, RequestError};

pub fn supervisor_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_supervisors))
        .route("/{fingerprint}", get(supervisor_status))
        .route("/{fingerprint}/remove", post(remove_supervisor))
}

async fn list_supervisors(State(state): State<AppState>) -> Json<Vec<SupervisorStatus>> {
    Json(state.registry.list().await)
}

fn parse_fingerprint(value: &str) -> Result<Fingerprint, RequestError> {
    Fingerprint::parse(value).ok_or_else(|| RequestError::BadRequest(format!("fingerprint {}", value)))
}

async fn supervisor_status(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> ApiJsonResult<SupervisorStatus> {
    let fingerprint = parse_fingerprint(&fingerprint)?;
    let supervisor = state
        .registry
        .get(&fingerprint)
        .await
        .ok_or_else(|| RequestError::NotFound(format!("supervisor {}", fingerprint.short())))?;
    Ok(Json(supervisor.status().await?))
}

async fn remove_supervisor(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> ApiJsonResult<bool> {
    let fingerprint = parse_fingerprint(&fingerprint)?;
    Ok(Json(state.registry.remove(&fingerprint).await))
}
