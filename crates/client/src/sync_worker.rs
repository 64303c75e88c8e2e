//! Background workers: periodic drain, timer polling and the elapsed-time tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::sync_manager::{SyncError, SyncManager};
use crate::timer::TimerTracker;

/// A spawned worker and its shutdown signal.
pub struct WorkerHandle {
    name: &'static str,
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    fn spawn<F>(name: &'static str, run: impl FnOnce(Arc<Notify>) -> F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(run(shutdown.clone()));
        Self {
            name,
            shutdown,
            handle,
        }
    }

    /// Signal the worker and wait for it to finish its current iteration.
    pub async fn shutdown(self) {
        // notify_one stores a permit if the worker is not waiting right now.
        self.shutdown.notify_one();
        if let Err(err) = self.handle.await {
            tracing::error!("{} worker ended abnormally: {}", self.name, err);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Drains the queue on a fixed interval.
pub struct SyncWorker {
    manager: Arc<SyncManager>,
    tracker: Option<Arc<TimerTracker>>,
    interval: Duration,
}

impl SyncWorker {
    pub fn new(manager: Arc<SyncManager>, interval: Duration) -> Self {
        Self {
            manager,
            tracker: None,
            interval,
        }
    }

    /// Hand timer confirmations from each drain to the tracker.
    pub fn with_tracker(mut self, tracker: Arc<TimerTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn start(self) -> WorkerHandle {
        WorkerHandle::spawn("sync", move |shutdown| async move {
            tracing::info!("background sync worker started");

            let mut sync_interval = tokio::time::interval(self.interval);
            sync_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        tracing::info!("background sync worker received shutdown signal");
                        break;
                    }
                    _ = sync_interval.tick() => {
                        match self.manager.drain().await {
                            Ok(report) => {
                                if let Some(tracker) = &self.tracker {
                                    tracker.reconcile(&report).await;
                                }
                                if !report.dropped.is_empty() {
                                    tracing::error!(
                                        "{} queued changes were dropped after repeated sync failures",
                                        report.dropped.len()
                                    );
                                }
                            }
                            Err(SyncError::Unauthorized) => {
                                tracing::error!("sync paused: the server rejected the credential");
                            }
                            Err(err) => {
                                tracing::warn!("background sync failed: {}", err);
                            }
                        }
                    }
                }
            }

            tracing::info!("background sync worker stopped");
        })
    }
}

/// Polls the server timer, faster while a timer is running.
pub struct TimerPoller {
    tracker: Arc<TimerTracker>,
    running_interval: Duration,
    idle_interval: Duration,
}

impl TimerPoller {
    pub fn new(tracker: Arc<TimerTracker>, running_interval: Duration) -> Self {
        Self {
            tracker,
            running_interval,
            idle_interval: running_interval * 6,
        }
    }

    pub fn with_idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    pub fn start(self) -> WorkerHandle {
        WorkerHandle::spawn("timer poll", move |shutdown| async move {
            tracing::debug!("timer poller started");
            loop {
                let delay = if self.tracker.is_running().await {
                    self.running_interval
                } else {
                    self.idle_interval
                };

                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = tokio::time::sleep(delay) => {
                        if let Err(err) = self.tracker.poll().await {
                            tracing::warn!("timer poll failed: {}", err);
                        }
                    }
                }
            }
            tracing::debug!("timer poller stopped");
        })
    }
}

/// Publishes the formatted elapsed time once per second.
pub struct ElapsedTicker {
    tracker: Arc<TimerTracker>,
    period: Duration,
}

impl ElapsedTicker {
    pub fn new(tracker: Arc<TimerTracker>) -> Self {
        Self {
            tracker,
            period: Duration::from_secs(1),
        }
    }

    /// `None` on the channel means no timer is running.
    pub fn start(self) -> (WorkerHandle, watch::Receiver<Option<String>>) {
        let (tx, rx) = watch::channel(None);
        let handle = WorkerHandle::spawn("elapsed tick", move |shutdown| async move {
            let mut tick = tokio::time::interval(self.period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = tick.tick() => {
                        let display = self.tracker.elapsed_display(Utc::now()).await;
                        tx.send_if_modified(|current| {
                            if *current == display {
                                false
                            } else {
                                *current = display;
                                true
                            }
                        });
                        if tx.is_closed() {
                            break;
                        }
                    }
                }
            }
        });
        (handle, rx)
    }
}
