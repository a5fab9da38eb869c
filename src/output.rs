use std::{
    path::{Component, Path, PathBuf},
    time::Duration,
};

use crate::fingerprint::Fingerprint;

/// Per-supervisor output directory: `{root}/{fingerprint}/`.
///
/// Filesystem failures here are logged and swallowed; a missing directory
/// shows up later as a readiness timeout.
#[derive(Clone, Debug)]
pub struct OutputDir {
    dir: PathBuf,
    playlist: PathBuf,
}

impl OutputDir {
    pub fn new(root: &Path, fingerprint: &Fingerprint, playlist_name: &str) -> Self {
        let dir = root.join(fingerprint.as_str());
        let playlist = dir.join(playlist_name);
        Self { dir, playlist }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn playlist(&self) -> &Path {
        &self.playlist
    }

    /// Segment file pattern handed to ffmpeg.
    pub fn segment_pattern(&self) -> PathBuf {
        self.dir.join("segment_%05d.ts")
    }

    /// Wipe whatever a previous run left behind and start empty.
    pub async fn recreate(&self) {
        self.remove().await;
        self.ensure().await;
    }

    pub async fn ensure(&self) {
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            log::warn!("Output: create {} failed: {}", self.dir.display(), e);
        }
    }

    pub async fn remove(&self) {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => log::debug!("Output: removed {}", self.dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Output: remove {} failed: {}", self.dir.display(), e),
        }
    }

    pub async fn playlist_exists(&self) -> bool {
        tokio::fs::try_exists(&self.playlist).await.unwrap_or(false)
    }

    /// Poll for the playlist every `interval` until it exists or `deadline` passes.
    pub async fn wait_for_playlist(&self, interval: Duration, deadline: Duration) -> bool {
        tokio::time::timeout(deadline, async {
            while !self.playlist_exists().await {
                tokio::time::sleep(interval).await;
            }
        })
        .await
        .is_ok()
    }

    /// Map a file name from a request onto this directory. Only plain file
    /// names are accepted.
    pub fn resolve(&self, file: &str) -> Option<PathBuf> {
        let mut components = Path::new(file).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => Some(self.dir.join(name)),
            _ => None,
        }
    }
}
