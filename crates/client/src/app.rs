//! Service wiring shared by the CLI commands and background workers.

use std::sync::Arc;

use anyhow::Context;

use crate::config::ClientConfig;
use crate::gateway::{HttpGateway, RemoteGateway};
use crate::offline::{Connectivity, HealthCheck, OfflineMode};
use crate::store::{LocalStore, SqliteStore};
use crate::sync_manager::SyncManager;
use crate::sync_worker::{ElapsedTicker, SyncWorker, TimerPoller, WorkerHandle};
use crate::timer::TimerTracker;

/// Explicitly constructed services; nothing global.
pub struct AppState {
    pub config: ClientConfig,
    pub store: Arc<SqliteStore>,
    pub connectivity: Arc<dyn Connectivity>,
    pub sync_manager: Arc<SyncManager>,
    pub timer: Arc<TimerTracker>,
}

impl AppState {
    /// Open the local store and build the services from `config`.
    ///
    /// `force_offline` swaps the health probe for a gate that always reports offline.
    pub async fn open(config: ClientConfig, force_offline: bool) -> anyhow::Result<Self> {
        let store = Arc::new(
            SqliteStore::open(&config.db_path)
                .await
                .with_context(|| format!("failed to open local store at {}", config.db_path.display()))?,
        );

        let gateway: Arc<dyn RemoteGateway> = Arc::new(
            HttpGateway::new(
                &config.api_url,
                &config.api_prefix,
                config.token.clone(),
                config.request_timeout,
            )
            .context("failed to build API client")?,
        );

        let connectivity: Arc<dyn Connectivity> = if force_offline {
            Arc::new(OfflineMode::offline())
        } else {
            Arc::new(HealthCheck::new(&config.api_url, config.request_timeout))
        };

        let local: Arc<dyn LocalStore> = store.clone();
        let sync_manager = Arc::new(SyncManager::new(local, gateway, connectivity.clone()));
        let timer = Arc::new(TimerTracker::new(sync_manager.clone()));

        if config.token.is_empty() {
            tracing::warn!("TIMEKEEP_TOKEN is not set; requests will be rejected by a secured server");
        }

        Ok(Self {
            config,
            store,
            connectivity,
            sync_manager,
            timer,
        })
    }

    /// Spawn the sync, poll and tick workers.
    pub fn start_workers(&self) -> (Vec<WorkerHandle>, tokio::sync::watch::Receiver<Option<String>>) {
        let sync = SyncWorker::new(self.sync_manager.clone(), self.config.sync_interval)
            .with_tracker(self.timer.clone())
            .start();
        let poll = TimerPoller::new(self.timer.clone(), self.config.poll_interval).start();
        let (tick, elapsed) = ElapsedTicker::new(self.timer.clone()).start();
        (vec![sync, poll, tick], elapsed)
    }

    pub async fn close(self) {
        self.store.close().await;
    }
}
