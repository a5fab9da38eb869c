use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tablo_client::{ClientInfo, DeviceApi, WatchSession};
use tokio::{
    sync::{
        broadcast, mpsc,
        oneshot::{self, error::TryRecvError},
        watch,
    },
    task::JoinHandle,
};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::{
    config::TranscodeConfig,
    error::{TranscodeError, TranscodeResult},
    event::{SupervisorEvent, SupervisorEventStream},
    ffmpeg::{TranscodeCommand, resolve_program},
    fingerprint::Fingerprint,
    keepalive::{KeepaliveTimer, keepalive_interval},
    output::OutputDir,
    process::TranscoderProcess,
};

const EVENT_CAPACITY: usize = 64;

/// Per-supervisor settings chosen by the caller of `Registry::get_or_create`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupervisorOptions {
    pub output_root: PathBuf,
    pub playlist_name: String,
    pub auto_restart: bool,
}

impl From<&TranscodeConfig> for SupervisorOptions {
    fn from(config: &TranscodeConfig) -> Self {
        Self {
            output_root: config.output_root.clone(),
            playlist_name: config.playlist_name.clone(),
            auto_restart: config.auto_restart,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorPhase {
    Idle,
    Starting,
    Active,
    Stopping,
    Stopped,
}

#[derive(Clone, Debug, Serialize)]
pub struct SupervisorStatus {
    pub fingerprint: Fingerprint,
    pub channel_id: String,
    pub phase: SupervisorPhase,
    pub use_count: usize,
    pub pid: Option<u32>,
    pub restarts: u32,
    pub session_expires: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub idle_since: Option<Instant>,
}

/// Owns one transcoder, its output directory, its remote session and its
/// keepalive timer.
///
/// All state lives in an actor task; the methods here send commands and wait
/// for the reply, so start/stop calls from different tasks never interleave.
pub struct Supervisor {
    fingerprint: Fingerprint,
    channel_id: String,
    output: OutputDir,
    cancel: CancellationToken,
    tx: mpsc::Sender<SupervisorCommand>,
    events: broadcast::Sender<SupervisorEvent>,
    idle: watch::Receiver<Option<Instant>>,
}

impl Supervisor {
    pub async fn new(
        fingerprint: Fingerprint,
        channel_id: &str,
        device: Arc<dyn DeviceApi>,
        client: ClientInfo,
        options: SupervisorOptions,
        config: Arc<TranscodeConfig>,
    ) -> Self {
        let output = OutputDir::new(&options.output_root, &fingerprint, &options.playlist_name);
        output.recreate().await;

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(1024);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (idle_tx, idle) = watch::channel(Some(Instant::now()));

        let state = SupervisorState {
            label: fingerprint.short().to_string(),
            fingerprint: fingerprint.clone(),
            channel_id: channel_id.to_string(),
            device,
            client,
            options,
            config,
            output: output.clone(),
            tx: tx.clone(),
            events: events.clone(),
            phase: SupervisorPhase::Idle,
            use_count: 0,
            waiters: Vec::new(),
            session: None,
            keepalive: None,
            command: None,
            process: None,
            readiness: None,
            cycle: 0,
            generation: 0,
            restarts: 0,
            idle: idle_tx,
        };

        let cancel_clone = cancel.clone();
        tokio::spawn(async move { Self::inner_loop(cancel_clone, rx, state).await });

        log::info!(
            "Supervisor[{}]: created for channel {} in {}",
            fingerprint.short(),
            channel_id,
            output.dir().display()
        );

        Self {
            fingerprint,
            channel_id: channel_id.to_string(),
            output,
            cancel,
            tx,
            events,
            idle,
        }
    }

    async fn inner_loop(
        cancel: CancellationToken,
        mut rx: mpsc::Receiver<SupervisorCommand>,
        mut state: SupervisorState,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break;
                },
                Some(cmd) = rx.recv() => {
                    state.handle(cmd).await;
                },
            }
        }

        state.abort(TranscodeError::Closed).await;
        log::debug!("Supervisor[{}]: actor finished", state.label);
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SupervisorCommand,
    ) -> TranscodeResult<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(build(tx))
            .await
            .map_err(|_| TranscodeError::Closed)?;
        rx.await.map_err(|_| TranscodeError::Closed)
    }

    /// Join the stream, starting the transcoder if nobody is watching yet.
    /// Resolves with the playlist path once it exists on disk.
    ///
    /// Dropping the returned future gives the use back, whether or not the
    /// start had finished.
    pub async fn start(&self) -> TranscodeResult<PathBuf> {
        let (result, rx) = oneshot::channel();
        self.tx
            .send(SupervisorCommand::Start { result })
            .await
            .map_err(|_| TranscodeError::Closed)?;

        let mut pending = PendingStart {
            rx: Some(rx),
            tx: self.tx.clone(),
        };
        pending.wait().await
    }

    /// Leave the stream. The last consumer out tears everything down.
    /// Returns the remaining use count.
    pub async fn stop(&self) -> TranscodeResult<usize> {
        self.request(|result| SupervisorCommand::Stop { result })
            .await
    }

    pub async fn status(&self) -> TranscodeResult<SupervisorStatus> {
        self.request(|result| SupervisorCommand::Status { result })
            .await
    }

    /// Tear down regardless of the use count and stop the actor.
    pub async fn shutdown(&self) {
        if self
            .request(|result| SupervisorCommand::Shutdown { result })
            .await
            .is_err()
        {
            log::debug!("Supervisor[{}]: already shut down", self.fingerprint.short());
        }
        self.cancel.cancel();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> SupervisorEventStream {
        Box::pin(BroadcastStream::new(self.events.subscribe()).filter_map(|r| async move { r.ok() }))
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn output(&self) -> &OutputDir {
        &self.output
    }

    pub fn playlist_path(&self) -> &Path {
        self.output.playlist()
    }

    /// When the last consumer left, or `None` while the stream is wanted.
    pub fn idle_since(&self) -> Option<Instant> {
        *self.idle.borrow()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A queued `Start` whose caller has not seen the answer yet.
struct PendingStart {
    rx: Option<oneshot::Receiver<TranscodeResult<PathBuf>>>,
    tx: mpsc::Sender<SupervisorCommand>,
}

impl PendingStart {
    async fn wait(&mut self) -> TranscodeResult<PathBuf> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(TranscodeError::Closed);
        };
        let outcome = rx.await;
        self.rx = None;
        outcome.map_err(|_| TranscodeError::Closed)?
    }
}

impl Drop for PendingStart {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        // after close no answer can slip in behind the check
        rx.close();
        let cmd = match rx.try_recv() {
            // granted but never read
            Ok(Ok(_)) => {
                let (result, _) = oneshot::channel();
                SupervisorCommand::Stop { result }
            }
            Ok(Err(_)) => return,
            Err(TryRecvError::Closed | TryRecvError::Empty) => SupervisorCommand::Prune,
        };
        if self.tx.try_send(cmd).is_err() {
            log::debug!("Supervisor: could not release an abandoned start");
        }
    }
}

pub(crate) enum SupervisorCommand {
    Start {
        result: oneshot::Sender<TranscodeResult<PathBuf>>,
    },
    Stop {
        result: oneshot::Sender<usize>,
    },
    Status {
        result: oneshot::Sender<SupervisorStatus>,
    },
    Shutdown {
        result: oneshot::Sender<()>,
    },
    ProcessExited {
        generation: u64,
        code: Option<i32>,
    },
    PlaylistReady {
        cycle: u64,
    },
    ReadyTimeout {
        cycle: u64,
    },
    /// Drop waiters whose callers went away.
    Prune,
}

struct SupervisorState {
    label: String,
    fingerprint: Fingerprint,
    channel_id: String,
    device: Arc<dyn DeviceApi>,
    client: ClientInfo,
    options: SupervisorOptions,
    config: Arc<TranscodeConfig>,
    output: OutputDir,
    tx: mpsc::Sender<SupervisorCommand>,
    events: broadcast::Sender<SupervisorEvent>,

    phase: SupervisorPhase,
    use_count: usize,
    waiters: Vec<oneshot::Sender<TranscodeResult<PathBuf>>>,
    session: Option<WatchSession>,
    keepalive: Option<KeepaliveTimer>,
    command: Option<TranscodeCommand>,
    process: Option<TranscoderProcess>,
    readiness: Option<JoinHandle<()>>,
    // activation cycle, guards readiness results
    cycle: u64,
    // process generation, guards exit notifications
    generation: u64,
    restarts: u32,
    idle: watch::Sender<Option<Instant>>,
}

impl SupervisorState {
    async fn handle(&mut self, cmd: SupervisorCommand) {
        match cmd {
            SupervisorCommand::Start { result } => self.on_start(result).await,
            SupervisorCommand::Stop { result } => {
                let remaining = self.on_stop().await;
                let _ = result.send(remaining);
            }
            SupervisorCommand::Status { result } => {
                let _ = result.send(self.status());
            }
            SupervisorCommand::Shutdown { result } => {
                self.abort(TranscodeError::Closed).await;
                let _ = result.send(());
            }
            SupervisorCommand::ProcessExited { generation, code } => {
                self.on_process_exited(generation, code).await
            }
            SupervisorCommand::PlaylistReady { cycle } => self.on_playlist_ready(cycle).await,
            SupervisorCommand::ReadyTimeout { cycle } => self.on_ready_timeout(cycle).await,
            SupervisorCommand::Prune => self.on_prune().await,
        }
    }

    fn set_idle(&self, since: Option<Instant>) {
        self.idle.send_replace(since);
    }

    fn emit(&self, event: SupervisorEvent) {
        log::debug!("Supervisor[{}]: {}", self.label, event.name());
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_error(&self, cause: TranscodeError) {
        log::warn!("Supervisor[{}]: {}", self.label, cause);
        self.emit(SupervisorEvent::Error { cause });
    }

    fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            fingerprint: self.fingerprint.clone(),
            channel_id: self.channel_id.clone(),
            phase: self.phase,
            use_count: self.use_count,
            pid: self.process.as_ref().and_then(|p| p.pid()),
            restarts: self.restarts,
            session_expires: self.current_session().map(|s| s.expires),
            idle_since: *self.idle.borrow(),
        }
    }

    /// The session as last refreshed by the keepalive.
    fn current_session(&self) -> Option<WatchSession> {
        match &self.keepalive {
            Some(keepalive) => Some(keepalive.session()),
            None => self.session.clone(),
        }
    }

    async fn on_start(&mut self, result: oneshot::Sender<TranscodeResult<PathBuf>>) {
        match self.phase {
            SupervisorPhase::Active => {
                let playlist = self.output.playlist().to_path_buf();
                if result.send(Ok(playlist.clone())).is_err() {
                    log::debug!("Supervisor[{}]: caller left before joining", self.label);
                    return;
                }
                self.use_count += 1;
                log::info!(
                    "Supervisor[{}]: consumer joined, use count {}",
                    self.label,
                    self.use_count
                );
                self.emit(SupervisorEvent::Ready { playlist });
            }
            SupervisorPhase::Starting => {
                self.use_count += 1;
                self.waiters.push(result);
            }
            SupervisorPhase::Idle | SupervisorPhase::Stopping | SupervisorPhase::Stopped => {
                self.use_count = 1;
                self.phase = SupervisorPhase::Starting;
                self.cycle += 1;
                self.set_idle(None);
                self.waiters.push(result);
                self.activate().await;
            }
        }
    }

    async fn activate(&mut self) {
        log::info!(
            "Supervisor[{}]: starting channel {}",
            self.label,
            self.channel_id
        );
        self.output.ensure().await;

        let session = match self.device.watch(&self.channel_id, &self.client).await {
            Ok(session) => session,
            Err(e) => {
                let err = TranscodeError::session(&self.channel_id, e);
                self.emit_error(err.clone());
                self.use_count = 0;
                self.phase = SupervisorPhase::Idle;
                self.set_idle(Some(Instant::now()));
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(err.clone()));
                }
                return;
            }
        };

        let period = keepalive_interval(session.keepalive);
        log::debug!(
            "Supervisor[{}]: session {} lease {}s, keepalive every {:?}",
            self.label,
            session.token,
            session.keepalive,
            period
        );
        self.keepalive = Some(KeepaliveTimer::start(
            Arc::clone(&self.device),
            session.clone(),
            period,
        ));

        let command = resolve_program(self.config.ffmpeg_path.as_deref()).map(|program| {
            TranscodeCommand::new(
                program,
                &self.config.profile,
                &session.playlist_url,
                &self.output,
            )
        });
        self.session = Some(session);

        let launched = match command {
            Ok(command) => {
                self.command = Some(command);
                self.launch().await
            }
            Err(e) => Err(TranscodeError::spawn(e)),
        };
        if let Err(err) = launched {
            self.emit_error(err.clone());
            self.abort(err).await;
            return;
        }

        let cycle = self.cycle;
        let output = self.output.clone();
        let tx = self.tx.clone();
        let interval = self.config.poll_interval();
        let deadline = self.config.ready_timeout();
        self.readiness = Some(tokio::spawn(async move {
            let cmd = if output.wait_for_playlist(interval, deadline).await {
                SupervisorCommand::PlaylistReady { cycle }
            } else {
                SupervisorCommand::ReadyTimeout { cycle }
            };
            let _ = tx.send(cmd).await;
        }));
    }

    /// Spawn the transcoder from the stored command. With auto-restart, spawn
    /// errors are retried immediately up to `max_spawn_retries` times.
    async fn launch(&mut self) -> TranscodeResult<()> {
        let Some(command) = self.command.as_ref() else {
            return Err(TranscodeError::Closed);
        };

        let mut failures = 0;
        loop {
            self.generation += 1;
            match TranscoderProcess::spawn(
                command,
                self.generation,
                self.label.clone(),
                self.tx.clone(),
                self.config.quit_grace(),
            ) {
                Ok(process) => {
                    log::info!(
                        "Supervisor[{}]: transcoder running (pid {:?}, generation {})",
                        self.label,
                        process.pid(),
                        process.generation()
                    );
                    self.process = Some(process);
                    return Ok(());
                }
                Err(e) => {
                    failures += 1;
                    let err = TranscodeError::spawn(e);
                    if !self.options.auto_restart || failures > self.config.max_spawn_retries {
                        return Err(err);
                    }
                    self.emit_error(err);
                }
            }
        }
    }

    async fn on_stop(&mut self) -> usize {
        if self.use_count == 0 {
            return 0;
        }

        self.use_count -= 1;
        log::info!(
            "Supervisor[{}]: consumer left, use count {}",
            self.label,
            self.use_count
        );
        if self.use_count == 0
            && matches!(
                self.phase,
                SupervisorPhase::Starting | SupervisorPhase::Active
            )
        {
            self.abort(TranscodeError::Cancelled).await;
        }
        self.use_count
    }

    /// Give back the uses of `start` callers that stopped waiting.
    async fn on_prune(&mut self) {
        let before = self.waiters.len();
        self.waiters.retain(|waiter| !waiter.is_closed());
        let abandoned = before - self.waiters.len();
        if abandoned > 0 {
            log::debug!(
                "Supervisor[{}]: {} pending start(s) abandoned",
                self.label,
                abandoned
            );
        }
        for _ in 0..abandoned {
            self.on_stop().await;
        }
    }

    async fn on_process_exited(&mut self, generation: u64, code: Option<i32>) {
        if self.process.as_ref().map(|p| p.generation()) != Some(generation) {
            log::debug!(
                "Supervisor[{}]: ignoring exit of stale generation {}",
                self.label,
                generation
            );
            return;
        }
        self.process = None;

        let fault = TranscodeError::ProcessFault { code };
        self.emit_error(fault.clone());
        self.emit(SupervisorEvent::Exit { code });

        let wanted = matches!(
            self.phase,
            SupervisorPhase::Starting | SupervisorPhase::Active
        );
        if wanted && self.options.auto_restart {
            self.restarts += 1;
            log::info!(
                "Supervisor[{}]: restarting transcoder (restart {})",
                self.label,
                self.restarts
            );
            if let Err(err) = self.launch().await {
                self.emit_error(err.clone());
                self.abort(err).await;
            }
        } else {
            self.abort(fault).await;
        }
    }

    async fn on_playlist_ready(&mut self, cycle: u64) {
        if cycle != self.cycle || self.phase != SupervisorPhase::Starting {
            return;
        }
        self.readiness = None;
        self.phase = SupervisorPhase::Active;
        log::info!(
            "Supervisor[{}]: playlist ready at {}",
            self.label,
            self.output.playlist().display()
        );

        let playlist = self.output.playlist().to_path_buf();
        let mut abandoned = 0;
        for waiter in std::mem::take(&mut self.waiters) {
            if waiter.send(Ok(playlist.clone())).is_ok() {
                self.emit(SupervisorEvent::Ready {
                    playlist: playlist.clone(),
                });
            } else {
                abandoned += 1;
            }
        }
        for _ in 0..abandoned {
            self.on_stop().await;
        }
    }

    async fn on_ready_timeout(&mut self, cycle: u64) {
        if cycle != self.cycle || self.phase != SupervisorPhase::Starting {
            return;
        }
        self.readiness = None;
        let err = TranscodeError::Timeout(self.config.ready_timeout());
        self.emit_error(err.clone());
        self.abort(err).await;
    }

    /// Quit the process, drop the keepalive, delete the remote session, then
    /// clean up. `reason` goes to anyone still waiting on `start`.
    async fn abort(&mut self, reason: TranscodeError) {
        if self.process.is_none()
            && self.session.is_none()
            && self.waiters.is_empty()
            && !matches!(
                self.phase,
                SupervisorPhase::Starting | SupervisorPhase::Active
            )
        {
            return;
        }

        log::info!("Supervisor[{}]: stopping ({})", self.label, reason);
        self.phase = SupervisorPhase::Stopping;

        if let Some(readiness) = self.readiness.take() {
            readiness.abort();
        }

        if let Some(process) = self.process.take() {
            let code = process.quit().await;
            self.emit(SupervisorEvent::Exit { code });
        }

        if let Some(keepalive) = self.keepalive.take() {
            // delete with the newest token the device handed out
            if self.session.is_some() {
                self.session = Some(keepalive.session());
            }
            keepalive.stop().await;
        }

        if let Some(session) = self.session.take() {
            match self.device.delete_session(&session).await {
                Ok(true) => log::debug!(
                    "Supervisor[{}]: session {} deleted",
                    self.label,
                    session.token
                ),
                Ok(false) => log::debug!(
                    "Supervisor[{}]: session {} already gone",
                    self.label,
                    session.token
                ),
                Err(e) => log::warn!(
                    "Supervisor[{}]: delete session {} failed: {}",
                    self.label,
                    session.token,
                    e
                ),
            }
        }

        self.command = None;
        self.use_count = 0;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(reason.clone()));
        }

        self.cleanup().await;
    }

    async fn cleanup(&mut self) {
        self.output.remove().await;
        self.phase = SupervisorPhase::Stopped;
        self.set_idle(Some(Instant::now()));
        log::info!("Supervisor[{}]: stopped", self.label);
        self.emit(SupervisorEvent::Stopped);
    }
}

#[cfg(test)]
#[path = "supervisor_test.rs"]
mod supervisor_test;
