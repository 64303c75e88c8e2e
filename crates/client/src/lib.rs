//! `timekeep-client`
//!
//! **Responsibility:** Offline-capable client core for the time-tracking API.
//!
//! This crate provides:
//! - A local durable store (entity cache + pending-operation queue)
//! - A connectivity gate and a REST gateway with a typed failure taxonomy
//! - A sync engine that replays queued operations with retry/backoff
//! - Timer reconciliation against the server-authoritative timer
//!
//! The server remains the authority; local state is a cache plus a queue of
//! changes it has not confirmed yet.

pub mod app;
pub mod config;
pub mod gateway;
pub mod offline;
pub mod operation;
pub mod store;
pub mod sync_manager;
pub mod sync_worker;
pub mod timer;

pub use app::AppState;
pub use config::{ClientConfig, ConfigError};
pub use gateway::{GatewayError, HttpGateway, RemoteGateway, StopOutcome, TimeEntryFilter};
pub use offline::{Connectivity, ConnectivityState, HealthCheck, OfflineMode};
pub use operation::{Operation, OperationKind, PendingOperation};
pub use store::{EntityCache, LocalStore, MemoryStore, SqliteStore, StoreError};
pub use sync_manager::{DrainReport, DrainStatus, OrderingPolicy, RetryPolicy, SyncError, SyncManager};
pub use sync_worker::{ElapsedTicker, SyncWorker, TimerPoller, WorkerHandle};
pub use timer::{TimerError, TimerStop, TimerTracker};
