//! Strongly-typed identifiers used across the client.

use core::str::FromStr;
use core::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

static LAST_PLACEHOLDER: AtomicI64 = AtomicI64::new(0);

/// Identifier of a server entity (time entry, project, task).
///
/// Server-assigned ids are positive. Entries created while offline carry a
/// negative placeholder until the server confirms them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(i64);

impl EntityId {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Allocate a local placeholder id (negative, time-derived, unique per process).
    pub fn local_placeholder() -> Self {
        let micros = Utc::now().timestamp_micros().max(1);
        let previous = LAST_PLACEHOLDER
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(micros.max(last + 1)))
            .unwrap_or(micros);
        Self(-micros.max(previous + 1))
    }

    pub const fn get(&self) -> i64 {
        self.0
    }

    /// True for placeholders that the server has not assigned yet.
    pub const fn is_local(&self) -> bool {
        self.0 < 0
    }
}

impl core::fmt::Display for EntityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<EntityId> for i64 {
    fn from(value: EntityId) -> Self {
        value.0
    }
}

impl FromStr for EntityId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .trim()
            .parse::<i64>()
            .map_err(|e| DomainError::invalid_id(format!("EntityId: {e}")))?;
        Ok(Self(raw))
    }
}

/// Identifier of a queued pending operation.
///
/// UUIDv7, so ids sort in creation order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for OperationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for OperationId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("OperationId: {e}")))?;
        Ok(Self(uuid))
    }
}
