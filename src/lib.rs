//! Local HLS transcoding for Tablo channels.
//!
//! A [`Registry`] hands out one reference-counted [`Supervisor`] per
//! (device, channel). The supervisor opens a streaming session on the device,
//! keeps it alive, runs ffmpeg against it and tears everything down once the
//! last consumer leaves.

pub mod config;
pub mod error;
pub mod event;
pub mod ffmpeg;
pub mod fingerprint;
pub mod keepalive;
pub mod output;
mod process;
pub mod registry;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{LiveConfig, TranscodeConfig, TranscodeProfile};
pub use error::{TranscodeError, TranscodeResult};
pub use event::{SupervisorEvent, SupervisorEventStream};
pub use fingerprint::Fingerprint;
pub use output::OutputDir;
pub use registry::Registry;
pub use supervisor::{Supervisor, SupervisorOptions, SupervisorPhase, SupervisorStatus};
