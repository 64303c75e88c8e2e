//! Active timer model and elapsed-time presentation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::id::EntityId;

/// Body of `POST timer/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTimerRequest {
    pub project_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Timer object as the server reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningTimer {
    /// Id of the backing time entry, when the server exposes it.
    #[serde(default)]
    pub id: Option<EntityId>,
    pub project_id: EntityId,
    #[serde(default)]
    pub task_id: Option<EntityId>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Response of `GET timer/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStatus {
    pub active: bool,
    #[serde(default)]
    pub timer: Option<RunningTimer>,
}

impl TimerStatus {
    pub fn idle() -> Self {
        Self {
            active: false,
            timer: None,
        }
    }

    /// The running timer, if the server reports one.
    ///
    /// `active: true` without a timer body is treated as idle.
    pub fn running(&self) -> Option<&RunningTimer> {
        if self.active { self.timer.as_ref() } else { None }
    }
}

/// The client's view of the single running timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTimer {
    pub entry_id: Option<EntityId>,
    pub project_id: EntityId,
    pub task_id: Option<EntityId>,
    pub start_time: DateTime<Utc>,
    pub notes: Option<String>,
    /// False while the start only exists in the local queue.
    pub confirmed: bool,
}

impl ActiveTimer {
    /// Optimistic timer for a start that could not reach the server.
    pub fn optimistic(request: &StartTimerRequest, started_at: DateTime<Utc>) -> Self {
        Self {
            entry_id: None,
            project_id: request.project_id,
            task_id: request.task_id,
            start_time: started_at,
            notes: request.notes.clone(),
            confirmed: false,
        }
    }

    /// Does the server timer describe the same running measurement?
    pub fn same_as(&self, remote: &RunningTimer) -> bool {
        match (self.entry_id, remote.id) {
            (Some(local), Some(server)) => local == server,
            _ => {
                self.project_id == remote.project_id
                    && self.task_id == remote.task_id
                    && self.start_time == remote.start_time
            }
        }
    }

    /// Time since the authoritative start, never negative.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        let elapsed = now.signed_duration_since(self.start_time);
        if elapsed < Duration::zero() {
            Duration::zero()
        } else {
            elapsed
        }
    }
}

impl From<RunningTimer> for ActiveTimer {
    fn from(remote: RunningTimer) -> Self {
        Self {
            entry_id: remote.id,
            project_id: remote.project_id,
            task_id: remote.task_id,
            start_time: remote.start_time,
            notes: remote.notes,
            confirmed: true,
        }
    }
}

/// Render an elapsed duration as `1h 2m 3s`, `1m 30s` or `45s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
