use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("request timed out")]
    Timeout,

    #[error("invalid signing key")]
    InvalidKey,

    #[error("invalid path segment: {0:?}")]
    InvalidSegment(String),

    #[error(transparent)]
    RequestError(reqwest::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::RequestError(err)
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
