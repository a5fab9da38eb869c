use std::time::Duration;

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{ffmpeg::TranscodeCommand, supervisor::SupervisorCommand};

/// A running transcoder owned by one supervisor.
///
/// A watcher task owns the child. A natural exit is reported back to the
/// supervisor as `ProcessExited`; a requested quit is not, the exit code is
/// returned from [`TranscoderProcess::quit`] instead.
pub(crate) struct TranscoderProcess {
    generation: u64,
    pid: Option<u32>,
    quit: CancellationToken,
    task: JoinHandle<Option<i32>>,
}

impl TranscoderProcess {
    pub(crate) fn spawn(
        command: &TranscodeCommand,
        generation: u64,
        label: String,
        tx: mpsc::Sender<SupervisorCommand>,
        grace: Duration,
    ) -> std::io::Result<Self> {
        let mut child = command.spawn()?;
        let pid = child.id();
        // `Child::wait` closes a stdin it still owns, so the quit pipe lives
        // with the watcher instead
        let stdin = child.stdin.take();

        if let Some(stderr) = child.stderr.take() {
            let label = label.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("ffmpeg[{}]: {}", label, line);
                }
            });
        }

        let quit = CancellationToken::new();
        let quit_clone = quit.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let code = match status {
                        Ok(status) => status.code(),
                        Err(e) => {
                            log::warn!("Process[{}]: wait failed: {}", label, e);
                            None
                        }
                    };
                    let _ = tx
                        .send(SupervisorCommand::ProcessExited { generation, code })
                        .await;
                    code
                }
                _ = quit_clone.cancelled() => graceful_quit(&mut child, stdin, grace, &label).await,
            }
        });

        Ok(Self {
            generation,
            pid,
            quit,
            task,
        })
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the transcoder to quit and wait for it. Returns its exit code.
    pub(crate) async fn quit(self) -> Option<i32> {
        self.quit.cancel();
        self.task.await.ok().flatten()
    }
}

/// ffmpeg finishes the current segment and exits when it reads `q` on stdin.
/// Anything still alive after `grace` is killed.
async fn graceful_quit(
    child: &mut Child,
    stdin: Option<ChildStdin>,
    grace: Duration,
    label: &str,
) -> Option<i32> {
    if let Some(mut stdin) = stdin {
        if let Err(e) = stdin.write_all(b"q").await {
            log::debug!("Process[{}]: write quit failed: {}", label, e);
        }
        let _ = stdin.flush().await;
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => status.code(),
        Ok(Err(e)) => {
            log::warn!("Process[{}]: wait failed: {}", label, e);
            None
        }
        Err(_) => {
            log::warn!(
                "Process[{}]: still running after {:?}, killing",
                label,
                grace
            );
            if let Err(e) = child.kill().await {
                log::error!("Process[{}]: kill failed: {}", label, e);
            }
            None
        }
    }
}
