//! In-process stand-in for the REST API, used by engine and tracker tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use timekeep_core::{
    EntityId, NewTimeEntry, Project, RunningTimer, StartTimerRequest, Task, TimeEntry,
    TimeEntryChanges, TimerStatus,
};

use super::{GatewayError, RemoteGateway, StopOutcome, TimeEntryFilter};

#[derive(Debug)]
struct Server {
    now: DateTime<Utc>,
    next_id: i64,
    entries: BTreeMap<EntityId, TimeEntry>,
    timer: Option<RunningTimer>,
    projects: Vec<Project>,
    tasks: Vec<Task>,
    /// Consumed one per call, before anything else.
    fail_next: VecDeque<GatewayError>,
    /// Persistent failure for one method name.
    fail_method: HashMap<&'static str, GatewayError>,
    /// Persistent failure for every call.
    fail_all: Option<GatewayError>,
    calls: Vec<&'static str>,
    /// Accepted updates in arrival order.
    updates: Vec<(EntityId, TimeEntryChanges)>,
}

#[derive(Debug)]
pub(crate) struct FakeGateway {
    server: Mutex<Server>,
}

impl FakeGateway {
    pub(crate) fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Server whose clock reads `now` until moved.
    pub(crate) fn at(now: DateTime<Utc>) -> Self {
        Self {
            server: Mutex::new(Server {
                now,
                next_id: 100,
                entries: BTreeMap::new(),
                timer: None,
                projects: Vec::new(),
                tasks: Vec::new(),
                fail_next: VecDeque::new(),
                fail_method: HashMap::new(),
                fail_all: None,
                calls: Vec::new(),
                updates: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Server> {
        self.server.lock().unwrap()
    }

    pub(crate) fn advance(&self, by: Duration) {
        self.lock().now += by;
    }

    pub(crate) fn fail_next(&self, err: GatewayError) {
        self.lock().fail_next.push_back(err);
    }

    pub(crate) fn fail_method(&self, method: &'static str, err: GatewayError) {
        self.lock().fail_method.insert(method, err);
    }

    pub(crate) fn fail_all(&self, err: GatewayError) {
        self.lock().fail_all = Some(err);
    }

    pub(crate) fn recover(&self) {
        let mut server = self.lock();
        server.fail_next.clear();
        server.fail_method.clear();
        server.fail_all = None;
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub(crate) fn call_count(&self, method: &str) -> usize {
        self.lock().calls.iter().filter(|c| **c == method).count()
    }

    pub(crate) fn updates(&self) -> Vec<(EntityId, TimeEntryChanges)> {
        self.lock().updates.clone()
    }

    pub(crate) fn entry(&self, id: EntityId) -> Option<TimeEntry> {
        self.lock().entries.get(&id).cloned()
    }

    pub(crate) fn entries(&self) -> Vec<TimeEntry> {
        self.lock().entries.values().cloned().collect()
    }

    pub(crate) fn running(&self) -> Option<RunningTimer> {
        self.lock().timer.clone()
    }

    pub(crate) fn seed_entry(&self, entry: TimeEntry) {
        self.lock().entries.insert(entry.id, entry);
    }

    pub(crate) fn seed_projects(&self, projects: Vec<Project>) {
        self.lock().projects = projects;
    }

    pub(crate) fn seed_tasks(&self, tasks: Vec<Task>) {
        self.lock().tasks = tasks;
    }

    /// Another device starts a timer behind the client's back.
    pub(crate) fn start_elsewhere(&self, project_id: EntityId, started_at: DateTime<Utc>) -> RunningTimer {
        let mut server = self.lock();
        server.start(&StartTimerRequest {
            project_id,
            task_id: None,
            notes: None,
        }, started_at)
    }

    /// Another device stops the running timer.
    pub(crate) fn stop_elsewhere(&self) {
        let mut server = self.lock();
        let now = server.now;
        server.stop(now);
    }

    fn enter(&self, method: &'static str) -> Result<std::sync::MutexGuard<'_, Server>, GatewayError> {
        let mut server = self.lock();
        server.calls.push(method);
        if let Some(err) = server.fail_next.pop_front() {
            return Err(err);
        }
        if let Some(err) = server.fail_method.get(method) {
            return Err(err.clone());
        }
        if let Some(err) = &server.fail_all {
            return Err(err.clone());
        }
        Ok(server)
    }
}

impl Server {
    fn allocate_id(&mut self) -> EntityId {
        let id = EntityId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn start(&mut self, request: &StartTimerRequest, at: DateTime<Utc>) -> RunningTimer {
        let id = self.allocate_id();
        self.entries.insert(
            id,
            TimeEntry {
                id,
                project_id: request.project_id,
                task_id: request.task_id,
                start_time: at,
                end_time: None,
                duration_seconds: None,
                notes: request.notes.clone(),
                billable: false,
            },
        );
        let timer = RunningTimer {
            id: Some(id),
            project_id: request.project_id,
            task_id: request.task_id,
            start_time: at,
            notes: request.notes.clone(),
        };
        self.timer = Some(timer.clone());
        timer
    }

    fn stop(&mut self, at: DateTime<Utc>) -> Option<TimeEntry> {
        let timer = self.timer.take()?;
        let entry = self.entries.get_mut(&timer.id?)?;
        entry.end_time = Some(at);
        entry.duration_seconds = Some((at - entry.start_time).num_seconds());
        Some(entry.clone())
    }
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn timer_status(&self) -> Result<TimerStatus, GatewayError> {
        let server = self.enter("timer_status")?;
        Ok(TimerStatus {
            active: server.timer.is_some(),
            timer: server.timer.clone(),
        })
    }

    async fn start_timer(&self, request: &StartTimerRequest) -> Result<RunningTimer, GatewayError> {
        let mut server = self.enter("start_timer")?;
        if server.timer.is_some() {
            return Err(GatewayError::Validation("a timer is already running".into()));
        }
        let now = server.now;
        Ok(server.start(request, now))
    }

    async fn stop_timer(&self) -> Result<StopOutcome, GatewayError> {
        let mut server = self.enter("stop_timer")?;
        if server.timer.is_none() {
            return Ok(StopOutcome::AlreadyStopped);
        }
        let now = server.now;
        Ok(StopOutcome::Stopped(server.stop(now)))
    }

    async fn list_time_entries(&self, filter: &TimeEntryFilter) -> Result<Vec<TimeEntry>, GatewayError> {
        let server = self.enter("list_time_entries")?;
        Ok(server
            .entries
            .values()
            .filter(|e| filter.project_id.is_none_or(|p| e.project_id == p))
            .filter(|e| filter.billable.is_none_or(|b| e.billable == b))
            .cloned()
            .collect())
    }

    async fn get_time_entry(&self, id: EntityId) -> Result<TimeEntry, GatewayError> {
        let server = self.enter("get_time_entry")?;
        server.entries.get(&id).cloned().ok_or(GatewayError::NotFound)
    }

    async fn create_time_entry(&self, entry: &NewTimeEntry) -> Result<TimeEntry, GatewayError> {
        let mut server = self.enter("create_time_entry")?;
        if entry.end_time.is_some_and(|end| end < entry.start_time) {
            return Err(GatewayError::Validation("end_time is before start_time".into()));
        }
        let id = server.allocate_id();
        let created = TimeEntry {
            id,
            project_id: entry.project_id,
            task_id: entry.task_id,
            start_time: entry.start_time,
            end_time: entry.end_time,
            duration_seconds: entry.end_time.map(|end| (end - entry.start_time).num_seconds()),
            notes: entry.notes.clone(),
            billable: entry.billable,
        };
        server.entries.insert(id, created.clone());
        Ok(created)
    }

    async fn update_time_entry(
        &self,
        id: EntityId,
        changes: &TimeEntryChanges,
    ) -> Result<TimeEntry, GatewayError> {
        let mut server = self.enter("update_time_entry")?;
        let entry = server.entries.get_mut(&id).ok_or(GatewayError::NotFound)?;
        if let Some(project_id) = changes.project_id {
            entry.project_id = project_id;
        }
        if let Some(task_id) = changes.task_id {
            entry.task_id = Some(task_id);
        }
        if let Some(start) = changes.start_time {
            entry.start_time = start;
        }
        if let Some(end) = changes.end_time {
            entry.end_time = Some(end);
        }
        if let Some(notes) = &changes.notes {
            entry.notes = Some(notes.clone());
        }
        if let Some(billable) = changes.billable {
            entry.billable = billable;
        }
        let updated = entry.clone();
        server.updates.push((id, changes.clone()));
        Ok(updated)
    }

    async fn delete_time_entry(&self, id: EntityId) -> Result<(), GatewayError> {
        let mut server = self.enter("delete_time_entry")?;
        server.entries.remove(&id).map(|_| ()).ok_or(GatewayError::NotFound)
    }

    async fn list_projects(&self, status: Option<&str>) -> Result<Vec<Project>, GatewayError> {
        let server = self.enter("list_projects")?;
        Ok(server
            .projects
            .iter()
            .filter(|p| status.is_none_or(|s| p.status == s))
            .cloned()
            .collect())
    }

    async fn list_tasks(
        &self,
        project_id: Option<EntityId>,
        status: Option<&str>,
    ) -> Result<Vec<Task>, GatewayError> {
        let server = self.enter("list_tasks")?;
        Ok(server
            .tasks
            .iter()
            .filter(|t| project_id.is_none_or(|p| t.project_id == p))
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect())
    }
}
