//! Server-shaped records cached by the client.
//!
//! These mirror the REST API response bodies. Unknown fields are ignored
//! and optional fields default, so a newer server does not break decoding.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::EntityId;

/// Namespace an entity is cached under.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    TimeEntries,
    Projects,
    Tasks,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::TimeEntries,
        Collection::Projects,
        Collection::Tasks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::TimeEntries => "time_entries",
            Collection::Projects => "projects",
            Collection::Tasks => "tasks",
        }
    }
}

impl core::fmt::Display for Collection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "time_entries" => Ok(Collection::TimeEntries),
            "projects" => Ok(Collection::Projects),
            "tasks" => Ok(Collection::Tasks),
            other => Err(DomainError::validation(format!("unknown collection '{other}'"))),
        }
    }
}

/// A record the local store can cache.
///
/// Identity is the server id; the collection decides the namespace.
pub trait CachedEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn id(&self) -> EntityId;
}

/// A recorded (or running) block of time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: EntityId,
    pub project_id: EntityId,
    #[serde(default)]
    pub task_id: Option<EntityId>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub billable: bool,
}

impl TimeEntry {
    /// True while the entry has no end (it backs the active timer).
    pub fn is_running(&self) -> bool {
        self.end_time.is_none()
    }
}

impl CachedEntity for TimeEntry {
    const COLLECTION: Collection = Collection::TimeEntries;

    fn id(&self) -> EntityId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub hourly_rate: Option<f64>,
    #[serde(default = "default_status")]
    pub status: String,
}

impl CachedEntity for Project {
    const COLLECTION: Collection = Collection::Projects;

    fn id(&self) -> EntityId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: EntityId,
    pub project_id: EntityId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
}

impl CachedEntity for Task {
    const COLLECTION: Collection = Collection::Tasks;

    fn id(&self) -> EntityId {
        self.id
    }
}

fn default_status() -> String {
    "active".to_string()
}

/// Field values for a time entry the server has not seen yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTimeEntry {
    pub project_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<EntityId>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub billable: bool,
}

impl NewTimeEntry {
    pub fn validate(&self) -> DomainResult<()> {
        if self.project_id.is_local() {
            return Err(DomainError::validation("project_id must be a server id"));
        }
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(DomainError::validation("end_time is before start_time"));
            }
        }
        Ok(())
    }
}

/// Partial update for an existing time entry; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeEntryChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billable: Option<bool>,
}

impl TimeEntryChanges {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.is_empty() {
            return Err(DomainError::validation("update carries no changes"));
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if end < start {
                return Err(DomainError::validation("end_time is before start_time"));
            }
        }
        Ok(())
    }
}
