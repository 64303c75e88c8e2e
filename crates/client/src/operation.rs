//! Pending operations: mutations waiting for server confirmation.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use timekeep_core::{EntityId, NewTimeEntry, OperationId, StartTimerRequest, TimeEntryChanges};

/// Persisted `kind` column of a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateTimeEntry,
    UpdateTimeEntry,
    DeleteTimeEntry,
    StartTimer,
    StopTimer,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateTimeEntry => "create_time_entry",
            OperationKind::UpdateTimeEntry => "update_time_entry",
            OperationKind::DeleteTimeEntry => "delete_time_entry",
            OperationKind::StartTimer => "start_timer",
            OperationKind::StopTimer => "stop_timer",
        }
    }

    pub fn is_timer(&self) -> bool {
        matches!(self, OperationKind::StartTimer | OperationKind::StopTimer)
    }
}

impl core::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = OperationDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_time_entry" => Ok(OperationKind::CreateTimeEntry),
            "update_time_entry" => Ok(OperationKind::UpdateTimeEntry),
            "delete_time_entry" => Ok(OperationKind::DeleteTimeEntry),
            "start_timer" => Ok(OperationKind::StartTimer),
            "stop_timer" => Ok(OperationKind::StopTimer),
            other => Err(OperationDecodeError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum OperationDecodeError {
    #[error("unknown operation kind '{0}'")]
    UnknownKind(String),
    #[error("invalid payload for {kind}: {source}")]
    Payload {
        kind: OperationKind,
        #[source]
        source: serde_json::Error,
    },
}

/// A mutation, with its field values.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// `local_id` is the placeholder the entry is known by until the
    /// server assigns its real id.
    CreateTimeEntry {
        local_id: EntityId,
        entry: NewTimeEntry,
    },
    UpdateTimeEntry {
        id: EntityId,
        changes: TimeEntryChanges,
    },
    DeleteTimeEntry {
        id: EntityId,
    },
    StartTimer(StartTimerRequest),
    StopTimer,
}

#[derive(Serialize, Deserialize)]
struct CreatePayload {
    local_id: EntityId,
    entry: NewTimeEntry,
}

#[derive(Serialize, Deserialize)]
struct UpdatePayload {
    id: EntityId,
    changes: TimeEntryChanges,
}

#[derive(Serialize, Deserialize)]
struct DeletePayload {
    id: EntityId,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::CreateTimeEntry { .. } => OperationKind::CreateTimeEntry,
            Operation::UpdateTimeEntry { .. } => OperationKind::UpdateTimeEntry,
            Operation::DeleteTimeEntry { .. } => OperationKind::DeleteTimeEntry,
            Operation::StartTimer(_) => OperationKind::StartTimer,
            Operation::StopTimer => OperationKind::StopTimer,
        }
    }

    /// The time entry this operation targets, if any.
    pub fn target(&self) -> Option<EntityId> {
        match self {
            Operation::CreateTimeEntry { local_id, .. } => Some(*local_id),
            Operation::UpdateTimeEntry { id, .. } | Operation::DeleteTimeEntry { id } => Some(*id),
            Operation::StartTimer(_) | Operation::StopTimer => None,
        }
    }

    /// JSON payload as persisted next to the kind.
    pub fn payload(&self) -> Value {
        let encoded = match self {
            Operation::CreateTimeEntry { local_id, entry } => serde_json::to_value(CreatePayload {
                local_id: *local_id,
                entry: entry.clone(),
            }),
            Operation::UpdateTimeEntry { id, changes } => serde_json::to_value(UpdatePayload {
                id: *id,
                changes: changes.clone(),
            }),
            Operation::DeleteTimeEntry { id } => serde_json::to_value(DeletePayload { id: *id }),
            Operation::StartTimer(request) => serde_json::to_value(request),
            Operation::StopTimer => Ok(Value::Object(Default::default())),
        };
        // Plain structs of ids, strings and timestamps always encode.
        encoded.unwrap_or(Value::Null)
    }

    /// Rebuild an operation from its persisted kind and payload.
    pub fn from_parts(kind: OperationKind, payload: Value) -> Result<Self, OperationDecodeError> {
        let wrap = |source| OperationDecodeError::Payload { kind, source };
        Ok(match kind {
            OperationKind::CreateTimeEntry => {
                let p: CreatePayload = serde_json::from_value(payload).map_err(wrap)?;
                Operation::CreateTimeEntry {
                    local_id: p.local_id,
                    entry: p.entry,
                }
            }
            OperationKind::UpdateTimeEntry => {
                let p: UpdatePayload = serde_json::from_value(payload).map_err(wrap)?;
                Operation::UpdateTimeEntry {
                    id: p.id,
                    changes: p.changes,
                }
            }
            OperationKind::DeleteTimeEntry => {
                let p: DeletePayload = serde_json::from_value(payload).map_err(wrap)?;
                Operation::DeleteTimeEntry { id: p.id }
            }
            OperationKind::StartTimer => {
                Operation::StartTimer(serde_json::from_value(payload).map_err(wrap)?)
            }
            OperationKind::StopTimer => Operation::StopTimer,
        })
    }
}

/// One queued, not-yet-confirmed mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    pub id: OperationId,
    pub operation: Operation,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl PendingOperation {
    pub fn new(operation: Operation) -> Self {
        Self {
            id: OperationId::new(),
            operation,
            created_at: Utc::now(),
            retry_count: 0,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }
}
