//! Timer reconciliation: the client's view of the single running timer.
//!
//! Start and stop go straight to the server when it is reachable and no
//! earlier timer change is still queued. Otherwise they are queued and
//! applied optimistically, so the timer keeps ticking locally. A periodic poll then corrects the local view; on any
//! disagreement the server wins.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use timekeep_core::{ActiveTimer, DomainError, StartTimerRequest, TimeEntry, format_elapsed};

use crate::gateway::{GatewayError, StopOutcome};
use crate::operation::Operation;
use crate::store::{EntityCache, StoreError};
use crate::sync_manager::{DrainReport, SyncError, SyncManager, TimerChange};

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("a timer is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("could not record the timer change locally: {0}")]
    Store(#[from] StoreError),
    #[error("timer request failed: {0}")]
    Gateway(#[from] GatewayError),
    #[error("could not queue the timer change: {0}")]
    Sync(SyncError),
}

impl From<SyncError> for TimerError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Store(err) => TimerError::Store(err),
            SyncError::Domain(err) => TimerError::Domain(err),
            other => TimerError::Sync(other),
        }
    }
}

/// How a stop request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TimerStop {
    /// The server stopped the timer; the finished entry when returned.
    Stopped(Option<TimeEntry>),
    /// Nothing was running.
    AlreadyStopped,
    /// Offline: the stop is queued and the timer is idle locally.
    Queued,
}

/// Queued timer changes go through the sync engine, so they replay in the
/// order the user made them.
pub struct TimerTracker {
    sync: Arc<SyncManager>,
    active: RwLock<Option<ActiveTimer>>,
}

impl TimerTracker {
    pub fn new(sync: Arc<SyncManager>) -> Self {
        Self {
            sync,
            active: RwLock::new(None),
        }
    }

    pub async fn active(&self) -> Option<ActiveTimer> {
        self.active.read().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Start a timer. Rejected while one is running.
    pub async fn start(&self, request: StartTimerRequest) -> Result<ActiveTimer, TimerError> {
        let mut active = self.active.write().await;
        if active.is_some() {
            return Err(TimerError::AlreadyRunning);
        }
        if request.project_id.is_local() {
            return Err(DomainError::validation("project_id must be a server id").into());
        }

        if self.timer_change_queued().await? {
            tracing::debug!("earlier timer change not synced yet; queuing start behind it");
        } else if self.sync.connectivity().is_online().await {
            match self.sync.gateway().start_timer(&request).await {
                Ok(remote) => {
                    let timer = ActiveTimer::from(remote);
                    tracing::info!(project_id = %timer.project_id, "timer started");
                    *active = Some(timer.clone());
                    return Ok(timer);
                }
                Err(GatewayError::Network(reason)) => {
                    tracing::warn!("timer start could not reach the server, queuing: {}", reason);
                }
                Err(err) => return Err(err.into()),
            }
        }

        let timer = ActiveTimer::optimistic(&request, Utc::now());
        self.sync.queue(Operation::StartTimer(request)).await?;
        tracing::info!(project_id = %timer.project_id, "timer started offline");
        *active = Some(timer.clone());
        Ok(timer)
    }

    /// Stop the running timer. A server with nothing running is not an error.
    ///
    /// While an earlier start/stop is still queued the server is behind, so
    /// the stop is queued after it instead of being sent directly.
    pub async fn stop(&self) -> Result<TimerStop, TimerError> {
        let mut active = self.active.write().await;

        if self.timer_change_queued().await? {
            tracing::debug!("earlier timer change not synced yet; queuing stop behind it");
        } else if self.sync.connectivity().is_online().await {
            match self.sync.gateway().stop_timer().await {
                Ok(StopOutcome::Stopped(entry)) => {
                    if let Some(entry) = &entry {
                        self.sync.store().put_entity(entry).await?;
                    }
                    tracing::info!("timer stopped");
                    *active = None;
                    return Ok(TimerStop::Stopped(entry));
                }
                Ok(StopOutcome::AlreadyStopped) => {
                    tracing::info!("timer was already stopped on the server");
                    *active = None;
                    return Ok(TimerStop::AlreadyStopped);
                }
                Err(GatewayError::Network(reason)) => {
                    tracing::warn!("timer stop could not reach the server, queuing: {}", reason);
                }
                Err(err) => return Err(err.into()),
            }
        }

        if active.is_none() {
            return Ok(TimerStop::AlreadyStopped);
        }
        self.sync.queue(Operation::StopTimer).await?;
        tracing::info!("timer stopped offline");
        *active = None;
        Ok(TimerStop::Queued)
    }

    /// Re-read the server's timer and correct the local view.
    ///
    /// Skipped while offline or while a queued start/stop has not reached the
    /// server yet, since the server state is known to be behind.
    pub async fn poll(&self) -> Result<Option<ActiveTimer>, TimerError> {
        let mut active = self.active.write().await;
        if !self.sync.connectivity().is_online().await || self.timer_change_queued().await? {
            return Ok(active.clone());
        }

        let status = self.sync.gateway().timer_status().await?;
        let next = match (active.as_ref(), status.running()) {
            (Some(_), None) => {
                tracing::info!("server reports no running timer; clearing local timer");
                None
            }
            (Some(local), Some(remote)) if local.same_as(remote) => {
                Some(ActiveTimer::from(remote.clone()))
            }
            (local, Some(remote)) => {
                if local.is_some() {
                    tracing::info!("server timer differs; adopting server timer");
                } else {
                    tracing::info!(project_id = %remote.project_id, "timer running on the server");
                }
                Some(ActiveTimer::from(remote.clone()))
            }
            (None, None) => None,
        };
        *active = next.clone();
        Ok(next)
    }

    /// Rebuild the local view in a fresh process.
    ///
    /// The newest queued start/stop wins; otherwise the server is asked when
    /// reachable. The optimistic start time of a queued start is its queue time.
    pub async fn restore(&self) -> Result<Option<ActiveTimer>, TimerError> {
        let queued = self
            .sync
            .store()
            .list_queue()
            .await?
            .into_iter()
            .filter(|op| op.kind().is_timer())
            .last();

        let Some(pending) = queued else {
            return self.poll().await;
        };
        let restored = match &pending.operation {
            Operation::StartTimer(request) => Some(ActiveTimer::optimistic(request, pending.created_at)),
            _ => None,
        };
        *self.active.write().await = restored.clone();
        Ok(restored)
    }

    /// Adopt timer confirmations produced by a drain pass.
    pub async fn reconcile(&self, report: &DrainReport) -> bool {
        let Some(TimerChange::Started(remote)) = &report.timer else {
            return false;
        };
        let mut active = self.active.write().await;
        match active.as_ref() {
            Some(local) if !local.confirmed && local.project_id == remote.project_id => {
                tracing::debug!("queued timer start confirmed by the server");
                *active = Some(ActiveTimer::from(remote.clone()));
                true
            }
            _ => false,
        }
    }

    async fn timer_change_queued(&self) -> Result<bool, StoreError> {
        Ok(self
            .sync
            .store()
            .list_queue()
            .await?
            .iter()
            .any(|op| op.kind().is_timer()))
    }

    pub async fn elapsed(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.active.read().await.as_ref().map(|t| t.elapsed(now))
    }

    /// Elapsed time as shown to the user, e.g. `1m 30s`.
    pub async fn elapsed_display(&self, now: DateTime<Utc>) -> Option<String> {
        self.elapsed(now).await.map(format_elapsed)
    }
}
