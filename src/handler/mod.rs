use std::sync::Arc;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tablo_client::{ClientError, DeviceApi};
use tablo_live::{Registry, TranscodeError};

pub mod channel;
pub mod stream;
pub mod supervisor;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub device: Arc<dyn DeviceApi>,
}

pub type ApiResult<T> = Result<T, ApiError>;
pub type ApiJsonResult<T> = ApiResult<Json<T>>;

#[derive(thiserror::Error, Debug)]
pub enum RequestError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
}

pub struct ApiError(anyhow::Error);

impl ApiError {
    fn status(&self) -> StatusCode {
        if let Some(e) = self.0.downcast_ref::<RequestError>() {
            return match e {
                RequestError::NotFound(_) => StatusCode::NOT_FOUND,
                RequestError::BadRequest(_) => StatusCode::BAD_REQUEST,
            };
        }
        if let Some(e) = self.0.downcast_ref::<TranscodeError>() {
            return match e {
                TranscodeError::DeviceUnavailable(_)
                | TranscodeError::SessionUnavailable { .. }
                | TranscodeError::Closed => StatusCode::SERVICE_UNAVAILABLE,
                TranscodeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                TranscodeError::Cancelled => StatusCode::CONFLICT,
                TranscodeError::ProcessSpawnFailure(_) | TranscodeError::ProcessFault { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
        }
        if let Some(e) = self.0.downcast_ref::<ClientError>() {
            return match e {
                ClientError::HttpError(status) if status.as_u16() == 404 => StatusCode::NOT_FOUND,
                ClientError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                ClientError::InvalidSegment(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            };
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("ApiError: {:?}", self.0);
        } else {
            log::debug!("ApiError: {}", self.0);
        }
        (status, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn status_of(err: impl Into<anyhow::Error>) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(RequestError::NotFound("supervisor".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(RequestError::BadRequest("fingerprint".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(TranscodeError::Timeout(Duration::from_secs(30))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(status_of(TranscodeError::Closed), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_of(TranscodeError::ProcessFault { code: Some(1) }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_of(ClientError::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_of(ClientError::InvalidSegment("..".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(anyhow::anyhow!("boom")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
