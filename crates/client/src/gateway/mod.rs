//! Remote gateway: a thin async client over the time-tracking REST API.
//!
//! One method per API operation. Every call carries the bearer credential
//! and returns the decoded body or a typed [`GatewayError`]. The gateway
//! never retries; retry policy belongs to the sync engine.

mod http;

#[cfg(test)]
pub(crate) mod fake;

pub use http::HttpGateway;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use timekeep_core::{
    EntityId, NewTimeEntry, Project, RunningTimer, StartTimerRequest, Task, TimeEntry,
    TimeEntryChanges, TimerStatus,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// 401: the credential is invalid or expired.
    #[error("unauthorized: credential rejected by the server")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    /// 400/409/422: the server rejected the payload.
    #[error("rejected by server: {0}")]
    Validation(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// No response reached the client.
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("unexpected response ({status}): {message}")]
    Unexpected { status: u16, message: String },
}

impl GatewayError {
    /// Failures worth another attempt later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Network(_)
                | GatewayError::Timeout
                | GatewayError::Server { .. }
                | GatewayError::Decode(_)
                | GatewayError::Unexpected { .. }
        )
    }
}

/// Result of `POST timer/stop`.
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// The server stopped a running timer; the finished entry when returned.
    Stopped(Option<TimeEntry>),
    /// Nothing was running (e.g. another device stopped it first).
    AlreadyStopped,
}

/// Filters for `GET time-entries`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeEntryFilter {
    pub project_id: Option<EntityId>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub billable: Option<bool>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl TimeEntryFilter {
    pub fn is_unfiltered(&self) -> bool {
        self == &Self::default()
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(project_id) = self.project_id {
            pairs.push(("project_id", project_id.to_string()));
        }
        if let Some(start) = self.start_date {
            pairs.push(("start_date", start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = self.end_date {
            pairs.push(("end_date", end.format("%Y-%m-%d").to_string()));
        }
        if let Some(billable) = self.billable {
            pairs.push(("billable", billable.to_string()));
        }
        if let Some(page) = self.page {
            pairs.push(("page", page.to_string()));
        }
        if let Some(per_page) = self.per_page {
            pairs.push(("per_page", per_page.to_string()));
        }
        pairs
    }
}

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn timer_status(&self) -> Result<TimerStatus, GatewayError>;

    async fn start_timer(&self, request: &StartTimerRequest) -> Result<RunningTimer, GatewayError>;

    /// Stop the running timer. Already-stopped is an outcome, not an error.
    async fn stop_timer(&self) -> Result<StopOutcome, GatewayError>;

    async fn list_time_entries(&self, filter: &TimeEntryFilter) -> Result<Vec<TimeEntry>, GatewayError>;

    async fn get_time_entry(&self, id: EntityId) -> Result<TimeEntry, GatewayError>;

    async fn create_time_entry(&self, entry: &NewTimeEntry) -> Result<TimeEntry, GatewayError>;

    async fn update_time_entry(
        &self,
        id: EntityId,
        changes: &TimeEntryChanges,
    ) -> Result<TimeEntry, GatewayError>;

    async fn delete_time_entry(&self, id: EntityId) -> Result<(), GatewayError>;

    async fn list_projects(&self, status: Option<&str>) -> Result<Vec<Project>, GatewayError>;

    async fn list_tasks(
        &self,
        project_id: Option<EntityId>,
        status: Option<&str>,
    ) -> Result<Vec<Task>, GatewayError>;
}
