use std::{path::PathBuf, pin::Pin};

use futures::Stream;

use crate::error::TranscodeError;

/// Notifications published by a supervisor.
#[derive(Clone, Debug)]
pub enum SupervisorEvent {
    /// Playlist confirmed on disk. Fires once per activation and once per
    /// additional consumer joining an active stream.
    Ready { playlist: PathBuf },
    /// Something went wrong; always precedes the resulting exit, restart or stop.
    Error { cause: TranscodeError },
    /// The transcoder exited. Recurs across restarts.
    Exit { code: Option<i32> },
    /// Cleanup finished. Once per activation cycle.
    Stopped,
}

impl SupervisorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SupervisorEvent::Ready { .. } => "ready",
            SupervisorEvent::Error { .. } => "error",
            SupervisorEvent::Exit { .. } => "exit",
            SupervisorEvent::Stopped => "stopped",
        }
    }
}

pub type SupervisorEventStream = Pin<Box<dyn Stream<Item = SupervisorEvent> + Send>>;
