//! `timekeep-core`: domain building blocks for the time-tracking client.
//!
//! This crate contains **pure domain** types (no I/O): the server-shaped
//! records the client caches, the active timer model and identifiers.

pub mod entity;
pub mod error;
pub mod id;
pub mod timer;

pub use entity::{CachedEntity, Collection, NewTimeEntry, Project, Task, TimeEntry, TimeEntryChanges};
pub use error::{DomainError, DomainResult};
pub use id::{EntityId, OperationId};
pub use timer::{ActiveTimer, RunningTimer, StartTimerRequest, TimerStatus, format_elapsed};
