//! Sync engine: replays the pending-operation queue against the API.
//!
//! This module provides a `SyncManager` that:
//! - Drains queued operations in creation order (FIFO)
//! - Retries each operation locally with exponential backoff
//! - Persists a retry counter across passes and drops operations at the ceiling
//! - Writes confirmed server state back into the entity cache
//! - Pulls fresh projects, tasks and time entries into the cache
//!
//! Only one drain runs at a time; a drain requested while another is in
//! flight returns immediately.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use timekeep_core::{
    Collection, DomainError, EntityId, NewTimeEntry, OperationId, Project, RunningTimer, Task,
    TimeEntry, TimeEntryChanges,
};

use crate::gateway::{GatewayError, RemoteGateway, StopOutcome, TimeEntryFilter};
use crate::offline::Connectivity;
use crate::operation::{Operation, PendingOperation};
use crate::store::{EntityCache, LocalStore, StoreError};

#[derive(Debug, Error)]
pub enum SyncError {
    /// The credential was rejected; the user must sign in again.
    #[error("unauthorized: sign in again to resume syncing")]
    Unauthorized,
    #[error("client is offline")]
    Offline,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("API error: {0}")]
    Gateway(GatewayError),
}

impl From<GatewayError> for SyncError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unauthorized => SyncError::Unauthorized,
            other => SyncError::Gateway(other),
        }
    }
}

/// Local retry and drop thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per operation within one drain pass.
    pub local_attempts: u32,
    /// Delay after the first failed attempt; doubles after each further one.
    pub base_delay: Duration,
    /// Persisted failed passes after which an operation is dropped.
    pub retry_ceiling: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            local_attempts: 3,
            base_delay: Duration::from_secs(1),
            retry_ceiling: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-indexed): base * 2^(attempt-1).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.base_delay
            .checked_mul(1u32 << (attempt - 1).min(16))
            .unwrap_or(Duration::MAX)
    }
}

/// What happens to later operations when one is deferred.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderingPolicy {
    /// Skip the failed operation and keep going.
    #[default]
    BestEffort,
    /// Stop the pass at the first deferred operation.
    HeadOfLine,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DrainStatus {
    #[default]
    Completed,
    /// Another drain was in flight; nothing was done.
    AlreadyRunning,
    /// The connectivity gate reported offline; nothing was done.
    Offline,
}

/// A timer transition the server confirmed during a drain.
#[derive(Debug, Clone, PartialEq)]
pub enum TimerChange {
    Started(RunningTimer),
    Stopped,
}

/// An operation removed because the server will never accept it.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub operation: PendingOperation,
    pub reason: String,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub status: DrainStatus,
    pub synced: Vec<OperationId>,
    /// Still queued, retry counter incremented (or waiting on an earlier create).
    pub deferred: Vec<OperationId>,
    /// Removed after reaching the retry ceiling. The changes are lost.
    pub dropped: Vec<PendingOperation>,
    pub rejected: Vec<Rejection>,
    /// Last timer transition confirmed by the server in this pass.
    pub timer: Option<TimerChange>,
}

impl DrainReport {
    fn skipped(status: DrainStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn ran(&self) -> bool {
        self.status == DrainStatus::Completed
    }

    pub fn is_clean(&self) -> bool {
        self.deferred.is_empty() && self.dropped.is_empty() && self.rejected.is_empty()
    }
}

/// Server reply to a replayed operation.
enum Applied {
    Created(TimeEntry),
    Updated(TimeEntry),
    Deleted(EntityId),
    TimerStarted(RunningTimer),
    TimerStopped(Option<TimeEntry>),
}

/// Where an operation's target id stands before replay.
enum Target {
    Ready(Operation),
    /// The create for this placeholder is still queued.
    Waiting,
    /// The placeholder was never confirmed and nothing will confirm it.
    Orphaned(EntityId),
}

/// Resets the in-flight flag on every exit path.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncManager {
    store: Arc<dyn LocalStore>,
    gateway: Arc<dyn RemoteGateway>,
    connectivity: Arc<dyn Connectivity>,
    retry: RetryPolicy,
    ordering: OrderingPolicy,
    draining: AtomicBool,
}

impl SyncManager {
    pub fn new(
        store: Arc<dyn LocalStore>,
        gateway: Arc<dyn RemoteGateway>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            store,
            gateway,
            connectivity,
            retry: RetryPolicy::default(),
            ordering: OrderingPolicy::default(),
            draining: AtomicBool::new(false),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ordering(mut self, ordering: OrderingPolicy) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<dyn RemoteGateway> {
        &self.gateway
    }

    pub fn connectivity(&self) -> &Arc<dyn Connectivity> {
        &self.connectivity
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Queue an operation for the next drain.
    pub async fn queue(&self, operation: Operation) -> Result<PendingOperation, SyncError> {
        let pending = PendingOperation::new(operation);
        self.store.enqueue(&pending).await?;
        tracing::info!(operation_id = %pending.id, kind = %pending.kind(), "queued operation");
        Ok(pending)
    }

    /// Queue a new time entry; returns the placeholder id it is known by until synced.
    pub async fn queue_create_time_entry(&self, entry: NewTimeEntry) -> Result<EntityId, SyncError> {
        entry.validate()?;
        let local_id = EntityId::local_placeholder();
        self.queue(Operation::CreateTimeEntry { local_id, entry }).await?;
        Ok(local_id)
    }

    pub async fn queue_update_time_entry(
        &self,
        id: EntityId,
        changes: TimeEntryChanges,
    ) -> Result<PendingOperation, SyncError> {
        changes.validate()?;
        self.queue(Operation::UpdateTimeEntry { id, changes }).await
    }

    pub async fn queue_delete_time_entry(&self, id: EntityId) -> Result<PendingOperation, SyncError> {
        self.queue(Operation::DeleteTimeEntry { id }).await
    }

    /// Replay every queued operation once.
    ///
    /// Returns `SyncError::Unauthorized` if the server rejects the credential;
    /// the pass stops there and the operation stays queued untouched.
    pub async fn drain(&self) -> Result<DrainReport, SyncError> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("drain already in progress");
            return Ok(DrainReport::skipped(DrainStatus::AlreadyRunning));
        }
        let _guard = DrainGuard(&self.draining);

        if !self.connectivity.is_online().await {
            tracing::debug!("skipping drain - offline");
            return Ok(DrainReport::skipped(DrainStatus::Offline));
        }

        let queue = self.store.list_queue().await?;
        if queue.is_empty() {
            return Ok(DrainReport::default());
        }
        tracing::info!("draining {} pending operations", queue.len());

        let mut report = DrainReport::default();
        // Placeholders whose create is still queued after this pass touched it.
        let mut unconfirmed: HashSet<EntityId> = queue
            .iter()
            .filter_map(|op| match op.operation {
                Operation::CreateTimeEntry { local_id, .. } => Some(local_id),
                _ => None,
            })
            .collect();

        // A deferred start/stop holds back later timer changes so they replay in order.
        let mut timer_blocked = false;

        for pending in queue {
            if timer_blocked && pending.kind().is_timer() {
                tracing::debug!(operation_id = %pending.id, "waiting on an earlier timer change");
                report.deferred.push(pending.id);
                continue;
            }

            let operation = match self.resolve_target(&pending.operation, &unconfirmed).await? {
                Target::Ready(operation) => operation,
                Target::Waiting => {
                    tracing::debug!(operation_id = %pending.id, "waiting on an unsynced create");
                    report.deferred.push(pending.id);
                    if self.ordering == OrderingPolicy::HeadOfLine {
                        break;
                    }
                    continue;
                }
                Target::Orphaned(local_id) => {
                    self.reject(&pending, format!("time entry {local_id} was never created"), &mut report)
                        .await?;
                    continue;
                }
            };

            match self.send_with_retries(&pending, &operation).await {
                Ok(applied) => {
                    self.record(&pending, applied, &mut report).await?;
                    if let Operation::CreateTimeEntry { local_id, .. } = pending.operation {
                        unconfirmed.remove(&local_id);
                    }
                    self.store.dequeue(pending.id).await?;
                    report.synced.push(pending.id);
                }
                Err(GatewayError::Unauthorized) => {
                    tracing::warn!(
                        operation_id = %pending.id,
                        "credential rejected; stopping drain with {} operations synced",
                        report.synced.len()
                    );
                    return Err(SyncError::Unauthorized);
                }
                Err(err) if err.is_transient() => {
                    let deferred = self.defer(&pending, &err, &mut report).await?;
                    if deferred && pending.kind().is_timer() {
                        timer_blocked = true;
                    }
                    if !deferred {
                        if let Operation::CreateTimeEntry { local_id, .. } = pending.operation {
                            unconfirmed.remove(&local_id);
                        }
                    }
                    if deferred && self.ordering == OrderingPolicy::HeadOfLine {
                        break;
                    }
                }
                Err(err) => {
                    if let Operation::CreateTimeEntry { local_id, .. } = pending.operation {
                        unconfirmed.remove(&local_id);
                    }
                    self.reject(&pending, err.to_string(), &mut report).await?;
                }
            }
        }

        tracing::info!(
            "drain complete: {} synced, {} deferred, {} dropped, {} rejected",
            report.synced.len(),
            report.deferred.len(),
            report.dropped.len(),
            report.rejected.len()
        );
        Ok(report)
    }

    /// Swap placeholder ids for server ids where the create already synced.
    async fn resolve_target(
        &self,
        operation: &Operation,
        unconfirmed: &HashSet<EntityId>,
    ) -> Result<Target, StoreError> {
        let id = match operation {
            Operation::UpdateTimeEntry { id, .. } | Operation::DeleteTimeEntry { id } if id.is_local() => *id,
            _ => return Ok(Target::Ready(operation.clone())),
        };

        let Some(server_id) = self.store.resolve_alias(id).await? else {
            return Ok(if unconfirmed.contains(&id) {
                Target::Waiting
            } else {
                Target::Orphaned(id)
            });
        };

        Ok(Target::Ready(match operation {
            Operation::UpdateTimeEntry { changes, .. } => Operation::UpdateTimeEntry {
                id: server_id,
                changes: changes.clone(),
            },
            _ => Operation::DeleteTimeEntry { id: server_id },
        }))
    }

    /// Up to `local_attempts` tries, sleeping with exponential backoff between them.
    async fn send_with_retries(
        &self,
        pending: &PendingOperation,
        operation: &Operation,
    ) -> Result<Applied, GatewayError> {
        let attempts = self.retry.local_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.send(operation).await {
                Ok(applied) => {
                    tracing::debug!(operation_id = %pending.id, "synced on attempt {}", attempt);
                    return Ok(applied);
                }
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        operation_id = %pending.id,
                        kind = %pending.kind(),
                        error = %err,
                        "attempt {} failed, retrying in {:?}",
                        attempt,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send(&self, operation: &Operation) -> Result<Applied, GatewayError> {
        match operation {
            Operation::CreateTimeEntry { entry, .. } => {
                self.gateway.create_time_entry(entry).await.map(Applied::Created)
            }
            Operation::UpdateTimeEntry { id, changes } => {
                self.gateway.update_time_entry(*id, changes).await.map(Applied::Updated)
            }
            Operation::DeleteTimeEntry { id } => match self.gateway.delete_time_entry(*id).await {
                Ok(()) | Err(GatewayError::NotFound) => Ok(Applied::Deleted(*id)),
                Err(err) => Err(err),
            },
            Operation::StartTimer(request) => {
                self.gateway.start_timer(request).await.map(Applied::TimerStarted)
            }
            Operation::StopTimer => match self.gateway.stop_timer().await? {
                StopOutcome::Stopped(entry) => Ok(Applied::TimerStopped(entry)),
                StopOutcome::AlreadyStopped => Ok(Applied::TimerStopped(None)),
            },
        }
    }

    /// Write confirmed server state into the cache.
    async fn record(
        &self,
        pending: &PendingOperation,
        applied: Applied,
        report: &mut DrainReport,
    ) -> Result<(), StoreError> {
        match applied {
            Applied::Created(entry) => {
                if let Operation::CreateTimeEntry { local_id, .. } = pending.operation {
                    self.store.put_alias(local_id, entry.id).await?;
                    tracing::info!("time entry {} confirmed as {}", local_id, entry.id);
                }
                self.store.put_entity(&entry).await?;
            }
            Applied::Updated(entry) => self.store.put_entity(&entry).await?,
            Applied::Deleted(id) => {
                self.store.delete(Collection::TimeEntries, id).await?;
            }
            Applied::TimerStarted(timer) => {
                report.timer = Some(TimerChange::Started(timer));
            }
            Applied::TimerStopped(entry) => {
                if let Some(entry) = entry {
                    self.store.put_entity(&entry).await?;
                }
                report.timer = Some(TimerChange::Stopped);
            }
        }
        Ok(())
    }

    /// Count a failed pass. Returns false if the operation hit the ceiling and was dropped.
    async fn defer(
        &self,
        pending: &PendingOperation,
        err: &GatewayError,
        report: &mut DrainReport,
    ) -> Result<bool, StoreError> {
        let retries = pending.retry_count + 1;
        if retries >= self.retry.retry_ceiling {
            self.store.dequeue(pending.id).await?;
            tracing::error!(
                operation_id = %pending.id,
                kind = %pending.kind(),
                payload = %pending.operation.payload(),
                error = %err,
                "dropping operation after {} failed sync passes",
                retries
            );
            report.dropped.push(pending.clone());
            return Ok(false);
        }

        self.store.update_retry_count(pending.id, retries).await?;
        tracing::warn!(
            operation_id = %pending.id,
            kind = %pending.kind(),
            error = %err,
            "deferring operation ({}/{} failed passes)",
            retries,
            self.retry.retry_ceiling
        );
        report.deferred.push(pending.id);
        Ok(true)
    }

    async fn reject(
        &self,
        pending: &PendingOperation,
        reason: String,
        report: &mut DrainReport,
    ) -> Result<(), StoreError> {
        self.store.dequeue(pending.id).await?;
        tracing::warn!(
            operation_id = %pending.id,
            kind = %pending.kind(),
            "server rejected operation: {}",
            reason
        );
        report.rejected.push(Rejection {
            operation: pending.clone(),
            reason,
        });
        Ok(())
    }

    async fn ensure_online(&self) -> Result<(), SyncError> {
        if self.connectivity.is_online().await {
            Ok(())
        } else {
            Err(SyncError::Offline)
        }
    }

    /// Replace cached projects with the server's list.
    pub async fn refresh_projects(&self) -> Result<Vec<Project>, SyncError> {
        self.ensure_online().await?;
        let projects = self.gateway.list_projects(None).await?;
        self.store.replace_entities(&projects).await?;
        self.store.mark_pulled(Collection::Projects, Utc::now()).await?;
        tracing::debug!("refreshed {} projects", projects.len());
        Ok(projects)
    }

    /// Refresh tasks; an unfiltered pull replaces the collection, a per-project pull upserts.
    pub async fn refresh_tasks(&self, project_id: Option<EntityId>) -> Result<Vec<Task>, SyncError> {
        self.ensure_online().await?;
        let tasks = self.gateway.list_tasks(project_id, None).await?;
        if project_id.is_none() {
            self.store.replace_entities(&tasks).await?;
            self.store.mark_pulled(Collection::Tasks, Utc::now()).await?;
        } else {
            for task in &tasks {
                self.store.put_entity(task).await?;
            }
        }
        tracing::debug!("refreshed {} tasks", tasks.len());
        Ok(tasks)
    }

    /// Upsert the listed time entries into the cache.
    pub async fn refresh_time_entries(&self, filter: &TimeEntryFilter) -> Result<Vec<TimeEntry>, SyncError> {
        self.ensure_online().await?;
        let entries = self.gateway.list_time_entries(filter).await?;
        for entry in &entries {
            self.store.put_entity(entry).await?;
        }
        if filter.is_unfiltered() {
            self.store.mark_pulled(Collection::TimeEntries, Utc::now()).await?;
        }
        tracing::debug!("refreshed {} time entries", entries.len());
        Ok(entries)
    }

    /// Pull every collection. Returns false, doing nothing, when offline.
    pub async fn refresh_all(&self) -> Result<bool, SyncError> {
        if !self.connectivity.is_online().await {
            return Ok(false);
        }
        self.refresh_projects().await?;
        self.refresh_tasks(None).await?;
        self.refresh_time_entries(&TimeEntryFilter::default()).await?;
        Ok(true)
    }
}
