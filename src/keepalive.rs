use std::{sync::Arc, time::Duration};

use tablo_client::{DeviceApi, WatchSession};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Refresh this long before the lease runs out.
pub const KEEPALIVE_MARGIN: Duration = Duration::from_secs(30);
pub const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// `lease - 30s`, never below [`MIN_KEEPALIVE_INTERVAL`].
pub fn keepalive_interval(lease_secs: u64) -> Duration {
    Duration::from_secs(lease_secs)
        .saturating_sub(KEEPALIVE_MARGIN)
        .max(MIN_KEEPALIVE_INTERVAL)
}

/// Periodic best-effort session refresh. Failures are logged and the timer
/// keeps going; an expired lease only shows up on the next device request.
pub struct KeepaliveTimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    session: watch::Receiver<WatchSession>,
}

impl KeepaliveTimer {
    pub fn start(device: Arc<dyn DeviceApi>, session: WatchSession, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let (latest, session_rx) = watch::channel(session);

        let handle = tokio::spawn(async move {
            let mut session = latest.borrow().clone();
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => break,
                    _ = ticker.tick() => {
                        match device.keepalive(&session).await {
                            Ok(refreshed) => {
                                log::debug!(
                                    "Keepalive: session {} extended until {}",
                                    refreshed.token,
                                    refreshed.expires
                                );
                                session = refreshed;
                                latest.send_replace(session.clone());
                            }
                            Err(e) => {
                                log::warn!("Keepalive: session {} refresh failed: {}", session.token, e);
                            }
                        }
                    }
                }
            }
        });

        Self {
            cancel,
            handle,
            session: session_rx,
        }
    }

    /// The session as of the last successful refresh.
    pub fn session(&self) -> WatchSession {
        self.session.borrow().clone()
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.handle).await;
    }
}

impl Drop for KeepaliveTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
