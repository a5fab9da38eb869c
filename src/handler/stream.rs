use axum::{
    Router,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use tablo_live::Fingerprint;

use crate::handler::{ApiResult, AppState, RequestError};

pub fn stream_router() -> Router<AppState> {
    Router::new().route("/{fingerprint}/{file}", get(stream_file))
}

fn content_type(file: &str) -> &'static str {
    match file.rsplit_once('.').map(|(_, ext)| ext) {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        _ => "application/octet-stream",
    }
}

async fn stream_file(
    State(state): State<AppState>,
    Path((fingerprint, file)): Path<(String, String)>,
) -> ApiResult<Response> {
    let fingerprint = Fingerprint::parse(&fingerprint)
        .ok_or_else(|| RequestError::BadRequest(format!("fingerprint {}", fingerprint)))?;
    let supervisor = state
        .registry
        .get(&fingerprint)
        .await
        .ok_or_else(|| RequestError::NotFound(format!("stream {}", fingerprint.short())))?;
    let path = supervisor
        .output()
        .resolve(&file)
        .ok_or_else(|| RequestError::BadRequest(format!("file {}", file)))?;

    let body = match tokio::fs::read(&path).await {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RequestError::NotFound(format!("file {}", file)).into());
        }
        Err(e) => return Err(e.into()),
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type(&file)),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}
