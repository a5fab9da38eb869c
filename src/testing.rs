//! In-memory device and a scripted stand-in transcoder for the test suites.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use tablo_client::{
    Channel, ClientError, ClientInfo, ClientResult, DeviceApi, DeviceIdentity, WatchSession,
};

use crate::config::TranscodeConfig;

pub(crate) struct MockDevice {
    server_id: String,
    lease: u64,
    identity_calls: AtomicUsize,
    watch_calls: AtomicUsize,
    keepalive_calls: AtomicUsize,
    deleted: Mutex<Vec<String>>,
    fail_identity: AtomicBool,
    fail_watch: AtomicBool,
    fail_keepalive: AtomicBool,
}

impl MockDevice {
    pub(crate) fn new(server_id: &str) -> Arc<Self> {
        Self::with_lease(server_id, 60)
    }

    pub(crate) fn with_lease(server_id: &str, lease: u64) -> Arc<Self> {
        Arc::new(Self {
            server_id: server_id.to_string(),
            lease,
            identity_calls: AtomicUsize::new(0),
            watch_calls: AtomicUsize::new(0),
            keepalive_calls: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
            fail_identity: AtomicBool::new(false),
            fail_watch: AtomicBool::new(false),
            fail_keepalive: AtomicBool::new(false),
        })
    }

    pub(crate) fn session_for(&self, channel_id: &str) -> WatchSession {
        let n = self.watch_calls.load(Ordering::SeqCst);
        WatchSession {
            token: format!("{}-{}-{}", self.server_id, channel_id, n),
            expires: Utc::now() + chrono::Duration::seconds(self.lease as i64),
            keepalive: self.lease,
            playlist_url: format!("http://127.0.0.1:8887/stream/{}/pl.m3u8", channel_id),
            channel_id: channel_id.to_string(),
        }
    }

    pub(crate) fn identity_calls(&self) -> usize {
        self.identity_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn keepalive_calls(&self) -> usize {
        self.keepalive_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn delete_calls(&self) -> usize {
        self.deleted.lock().map(|d| d.len()).unwrap_or(0)
    }

    /// Tokens passed to `delete_session`, oldest first.
    pub(crate) fn deleted_tokens(&self) -> Vec<String> {
        self.deleted.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub(crate) fn fail_identity(&self, fail: bool) {
        self.fail_identity.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_watch(&self, fail: bool) {
        self.fail_watch.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_keepalive(&self, fail: bool) {
        self.fail_keepalive.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceApi for MockDevice {
    async fn identity(&self) -> ClientResult<DeviceIdentity> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_identity.load(Ordering::SeqCst) {
            return Err(ClientError::Timeout);
        }
        Ok(DeviceIdentity {
            server_id: self.server_id.clone(),
            name: "Mock Tablo".to_string(),
            ..Default::default()
        })
    }

    async fn channel(&self, channel_id: &str) -> ClientResult<Channel> {
        Ok(Channel {
            identifier: channel_id.to_string(),
            name: format!("Channel {}", channel_id),
            kind: "ota".to_string(),
            ota: None,
        })
    }

    async fn watch(&self, channel_id: &str, _client: &ClientInfo) -> ClientResult<WatchSession> {
        if self.fail_watch.load(Ordering::SeqCst) {
            return Err(ClientError::Timeout);
        }
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.session_for(channel_id))
    }

    async fn keepalive(&self, session: &WatchSession) -> ClientResult<WatchSession> {
        self.keepalive_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_keepalive.load(Ordering::SeqCst) {
            return Err(ClientError::Timeout);
        }
        let mut session = session.clone();
        // the device hands out a fresh token on every refresh
        session.token = format!("{}+", session.token);
        session.expires = Utc::now() + chrono::Duration::seconds(self.lease as i64);
        Ok(session)
    }

    async fn delete_session(&self, session: &WatchSession) -> ClientResult<bool> {
        if let Ok(mut deleted) = self.deleted.lock() {
            deleted.push(session.token.clone());
        }
        Ok(true)
    }
}

/// How the stand-in transcoder behaves once started.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Behavior {
    /// Write the playlist, then run until a byte arrives on stdin.
    Serve,
    /// Write the playlist, then exit with code 3 shortly after.
    Crash,
    /// Never write the playlist; run until a byte arrives on stdin.
    Silent,
}

/// A shell script standing in for ffmpeg. Every invocation appends its
/// arguments to `invocations.log`, and the byte that ends a `Serve` or
/// `Silent` run to `stdin.log`, both next to the script.
pub(crate) struct FakeTranscoder {
    path: PathBuf,
    log: PathBuf,
    stdin_log: PathBuf,
}

impl FakeTranscoder {
    #[cfg(unix)]
    pub(crate) fn install(dir: &Path, behavior: Behavior) -> anyhow::Result<Self> {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-ffmpeg.sh");
        let log = dir.join("invocations.log");
        let stdin_log = dir.join("stdin.log");
        // an empty line in stdin.log means stdin hit EOF
        let wait_for_quit = format!(
            "byte=$(head -c 1)\nprintf '%s\\n' \"$byte\" >> '{}'\nexit 0",
            stdin_log.display()
        );
        let body = match behavior {
            Behavior::Serve => format!(": > \"$last\"\n{}", wait_for_quit),
            Behavior::Crash => ": > \"$last\"\nsleep 0.5\nexit 3".to_string(),
            Behavior::Silent => wait_for_quit,
        };
        let script = format!(
            "#!/bin/sh\necho \"$*\" >> '{}'\nfor last; do :; done\n{}\n",
            log.display(),
            body
        );
        std::fs::write(&path, script)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(Self {
            path,
            log,
            stdin_log,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Number of times the script has been started.
    pub(crate) fn invocations(&self) -> usize {
        std::fs::read_to_string(&self.log)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    /// Arguments of every invocation, oldest first.
    pub(crate) fn all_args(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub(crate) fn last_args(&self) -> Option<String> {
        self.all_args().pop()
    }

    /// What each finished run read from stdin, oldest first.
    pub(crate) fn stdin_bytes(&self) -> Vec<String> {
        std::fs::read_to_string(&self.stdin_log)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// Fast timings so the suites run in well under a second per case.
pub(crate) fn test_config(output_root: &Path, transcoder: &Path) -> TranscodeConfig {
    TranscodeConfig {
        ffmpeg_path: Some(transcoder.to_path_buf()),
        output_root: output_root.to_path_buf(),
        ready_timeout_secs: 2,
        poll_interval_ms: 10,
        quit_grace_ms: 500,
        max_spawn_retries: 2,
        ..Default::default()
    }
}

/// Wait until `check` holds, polling every 10ms, for at most `limit`.
pub(crate) async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(limit, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}
