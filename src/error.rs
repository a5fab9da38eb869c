use std::{sync::Arc, time::Duration};

use tablo_client::ClientError;
use thiserror::Error;

/// Failures surfaced by the registry and supervisors.
///
/// Sources are reference counted so one failure can be handed to every
/// waiting caller and to the event channel.
#[derive(Error, Debug, Clone)]
pub enum TranscodeError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(#[source] Arc<ClientError>),

    #[error("no streaming session for channel {channel}: {source}")]
    SessionUnavailable {
        channel: String,
        #[source]
        source: Arc<ClientError>,
    },

    #[error("failed to spawn transcoder: {0}")]
    ProcessSpawnFailure(#[source] Arc<std::io::Error>),

    #[error("transcoder exited unexpectedly (code {code:?})")]
    ProcessFault { code: Option<i32> },

    #[error("playlist not written within {0:?}")]
    Timeout(Duration),

    #[error("start cancelled by stop")]
    Cancelled,

    #[error("supervisor is shut down")]
    Closed,
}

impl TranscodeError {
    pub(crate) fn device(err: ClientError) -> Self {
        TranscodeError::DeviceUnavailable(Arc::new(err))
    }

    pub(crate) fn session(channel: &str, err: ClientError) -> Self {
        TranscodeError::SessionUnavailable {
            channel: channel.to_string(),
            source: Arc::new(err),
        }
    }

    pub(crate) fn spawn(err: std::io::Error) -> Self {
        TranscodeError::ProcessSpawnFailure(Arc::new(err))
    }

    /// Unavailable errors come from the appliance side and are worth retrying later.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            TranscodeError::DeviceUnavailable(_) | TranscodeError::SessionUnavailable { .. }
        )
    }
}

pub type TranscodeResult<T> = Result<T, TranscodeError>;
