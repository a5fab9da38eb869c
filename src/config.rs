use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tablo_client::{Credentials, DeviceOptions};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub device: DeviceConfig,
    pub transcode: TranscodeConfig,
    pub server: ServerConfig,
}

impl LiveConfig {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).map_err(|e| anyhow::anyhow!("invalid config: {}", e))
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            log::warn!("Config: {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read {}: {}", path.display(), e))?;
        Self::from_toml(&text)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub url: String,
    pub access_key: String,
    pub secret_key: String,
    pub request_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8887".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            request_timeout_secs: 10,
        }
    }
}

impl DeviceConfig {
    pub fn options(&self) -> anyhow::Result<DeviceOptions> {
        let credentials = Credentials::new(&self.access_key, &self.secret_key);
        Ok(DeviceOptions::new(&self.url, credentials)?
            .with_timeout(Duration::from_secs(self.request_timeout_secs)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// None = look up `ffmpeg` on PATH
    pub ffmpeg_path: Option<PathBuf>,
    pub output_root: PathBuf,
    pub playlist_name: String,
    pub auto_restart: bool,
    pub ready_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub quit_grace_ms: u64,
    pub max_spawn_retries: u32,
    /// None = supervisors are never evicted
    pub idle_eviction_secs: Option<u64>,
    pub profile: TranscodeProfile,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            output_root: PathBuf::from("streams"),
            playlist_name: "stream.m3u8".to_string(),
            auto_restart: true,
            ready_timeout_secs: 30,
            poll_interval_ms: 250,
            quit_grace_ms: 5000,
            max_spawn_retries: 3,
            idle_eviction_secs: None,
            profile: TranscodeProfile::default(),
        }
    }
}

impl TranscodeConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn quit_grace(&self) -> Duration {
        Duration::from_millis(self.quit_grace_ms)
    }

    pub fn idle_eviction(&self) -> Option<Duration> {
        self.idle_eviction_secs.map(Duration::from_secs)
    }
}

/// Fixed encoder parameters handed to ffmpeg.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TranscodeProfile {
    // "libx264"
    pub video_codec: String,
    // "ultrafast", "veryfast", etc.
    pub preset: String,
    pub tune: String,
    pub crf: u32,
    // frames
    pub keyframe_interval: u32,
    pub audio_codec: String,
    // "128k"
    pub audio_bitrate: String,
    pub audio_channels: u32,
    pub segment_seconds: u32,
    pub list_size: u32,
}

impl Default for TranscodeProfile {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            tune: "zerolatency".to_string(),
            crf: 23,
            keyframe_interval: 60,
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
            audio_channels: 2,
            segment_seconds: 4,
            list_size: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}
