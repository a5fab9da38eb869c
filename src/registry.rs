use std::{collections::HashMap, sync::Arc, time::Duration};

use tablo_client::{ClientInfo, DeviceApi};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::{
    config::TranscodeConfig,
    error::{TranscodeError, TranscodeResult},
    fingerprint::Fingerprint,
    supervisor::{Supervisor, SupervisorOptions, SupervisorStatus},
};

/// Application-scoped map of live supervisors, one per (device, channel).
pub struct Registry {
    config: Arc<TranscodeConfig>,
    client: ClientInfo,
    supervisors: RwLock<HashMap<Fingerprint, Arc<Supervisor>>>,
}

impl Registry {
    pub fn new(config: TranscodeConfig) -> Self {
        Self::with_client(config, ClientInfo::generate())
    }

    pub fn with_client(config: TranscodeConfig, client: ClientInfo) -> Self {
        log::info!("Registry: client id {}", client.device_id);
        Self {
            config: Arc::new(config),
            client,
            supervisors: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TranscodeConfig {
        &self.config
    }

    /// Options built from the registry's transcode config.
    pub fn default_options(&self) -> SupervisorOptions {
        SupervisorOptions::from(self.config.as_ref())
    }

    async fn fingerprint_for(
        device: &dyn DeviceApi,
        channel_id: &str,
    ) -> TranscodeResult<Fingerprint> {
        let identity = device.identity().await.map_err(TranscodeError::device)?;
        Ok(Fingerprint::new(&identity.server_id, channel_id))
    }

    /// Return the supervisor for (device, channel), creating it on first use.
    /// Repeated calls hand back the same instance.
    pub async fn get_or_create(
        &self,
        device: Arc<dyn DeviceApi>,
        channel_id: &str,
        options: SupervisorOptions,
    ) -> TranscodeResult<Arc<Supervisor>> {
        let fingerprint = Self::fingerprint_for(device.as_ref(), channel_id).await?;

        if let Some(supervisor) = self.supervisors.read().await.get(&fingerprint) {
            return Ok(Arc::clone(supervisor));
        }

        let mut supervisors = self.supervisors.write().await;
        // another caller may have won while we waited for the write lock
        if let Some(supervisor) = supervisors.get(&fingerprint) {
            return Ok(Arc::clone(supervisor));
        }

        let supervisor = Arc::new(
            Supervisor::new(
                fingerprint.clone(),
                channel_id.trim(),
                device,
                self.client.clone(),
                options,
                Arc::clone(&self.config),
            )
            .await,
        );
        supervisors.insert(fingerprint, Arc::clone(&supervisor));
        Ok(supervisor)
    }

    /// Like [`Registry::get_or_create`] but never creates.
    pub async fn lookup(
        &self,
        device: &dyn DeviceApi,
        channel_id: &str,
    ) -> TranscodeResult<Option<Arc<Supervisor>>> {
        let fingerprint = Self::fingerprint_for(device, channel_id).await?;
        Ok(self.get(&fingerprint).await)
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<Supervisor>> {
        self.supervisors.read().await.get(fingerprint).cloned()
    }

    pub async fn list(&self) -> Vec<SupervisorStatus> {
        let supervisors: Vec<_> = self.supervisors.read().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(supervisors.len());
        for supervisor in supervisors {
            if let Ok(status) = supervisor.status().await {
                statuses.push(status);
            }
        }
        statuses.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        statuses
    }

    pub async fn len(&self) -> usize {
        self.supervisors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.supervisors.read().await.is_empty()
    }

    /// Remove a supervisor and tear it down regardless of its use count.
    pub async fn remove(&self, fingerprint: &Fingerprint) -> bool {
        let removed = self.supervisors.write().await.remove(fingerprint);
        match removed {
            Some(supervisor) => {
                supervisor.shutdown().await;
                log::info!("Registry: removed {}", fingerprint.short());
                true
            }
            None => false,
        }
    }

    /// Drop supervisors that have had no consumers for at least `max_idle`.
    ///
    /// A supervisor somebody still holds is never evicted, so a caller that
    /// got it from `get_or_create` can always go on to `start` it.
    pub async fn evict_idle(&self, max_idle: Duration) -> Vec<Fingerprint> {
        let idle: Vec<_> = {
            let mut supervisors = self.supervisors.write().await;
            let expired: Vec<_> = supervisors
                .iter()
                .filter(|(_, supervisor)| {
                    Arc::strong_count(supervisor) == 1
                        && supervisor
                            .idle_since()
                            .is_some_and(|since| since.elapsed() >= max_idle)
                })
                .map(|(fingerprint, _)| fingerprint.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|fingerprint| supervisors.remove_entry(&fingerprint))
                .collect()
        };

        let mut evicted = Vec::with_capacity(idle.len());
        for (fingerprint, supervisor) in idle {
            supervisor.shutdown().await;
            log::info!("Registry: evicted idle {}", fingerprint.short());
            evicted.push(fingerprint);
        }
        evicted
    }

    /// Sweep for idle supervisors every `max_idle / 2` until `cancel` fires.
    pub fn spawn_eviction(
        self: &Arc<Self>,
        max_idle: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = (max_idle / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = registry.evict_idle(max_idle).await;
                        if !evicted.is_empty() {
                            log::debug!("Registry: eviction sweep removed {}", evicted.len());
                        }
                    }
                }
            }
        })
    }

    /// Tear down every supervisor, ignoring use counts.
    pub async fn shutdown(&self) {
        let supervisors: Vec<_> = self.supervisors.write().await.drain().collect();
        log::info!("Registry: shutting down {} supervisors", supervisors.len());
        futures::future::join_all(
            supervisors
                .iter()
                .map(|(_, supervisor)| supervisor.shutdown()),
        )
        .await;
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod registry_test;
