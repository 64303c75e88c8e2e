use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use timekeep_core::{Collection, EntityId, OperationId};

use super::{LocalStore, StoreError};
use crate::operation::PendingOperation;

#[derive(Debug, Default)]
struct State {
    entities: HashMap<Collection, BTreeMap<EntityId, Value>>,
    /// Insertion order; `list_queue` sorts by `created_at` stably.
    queue: Vec<PendingOperation>,
    aliases: HashMap<EntityId, EntityId>,
    pulls: HashMap<Collection, DateTime<Utc>>,
}

/// In-memory store.
///
/// Intended for tests/dev; nothing survives the process. Writes can be made
/// to fail on demand to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    reject_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `StoreError::Unavailable`.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    fn read(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes are rejected".to_string()));
        }
        self.read()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn put(&self, collection: Collection, id: EntityId, record: &Value) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state
            .entities
            .entry(collection)
            .or_default()
            .insert(id, record.clone());
        Ok(())
    }

    async fn get(&self, collection: Collection, id: EntityId) -> Result<Option<Value>, StoreError> {
        let state = self.read()?;
        Ok(state
            .entities
            .get(&collection)
            .and_then(|records| records.get(&id))
            .cloned())
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        let state = self.read()?;
        Ok(state
            .entities
            .get(&collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, collection: Collection, id: EntityId) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        Ok(state
            .entities
            .get_mut(&collection)
            .is_some_and(|records| records.remove(&id).is_some()))
    }

    async fn replace_collection(
        &self,
        collection: Collection,
        records: Vec<(EntityId, Value)>,
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state
            .entities
            .insert(collection, records.into_iter().collect());
        Ok(())
    }

    async fn enqueue(&self, operation: &PendingOperation) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.queue.push(operation.clone());
        Ok(())
    }

    async fn dequeue(&self, id: OperationId) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        let before = state.queue.len();
        state.queue.retain(|op| op.id != id);
        Ok(state.queue.len() != before)
    }

    async fn list_queue(&self) -> Result<Vec<PendingOperation>, StoreError> {
        let state = self.read()?;
        let mut queue = state.queue.clone();
        queue.sort_by_key(|op| op.created_at);
        Ok(queue)
    }

    async fn update_retry_count(&self, id: OperationId, count: u32) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let op = state
            .queue
            .iter_mut()
            .find(|op| op.id == id)
            .ok_or(StoreError::UnknownOperation(id))?;
        op.retry_count = count;
        Ok(())
    }

    async fn put_alias(&self, local_id: EntityId, server_id: EntityId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.aliases.insert(local_id, server_id);
        Ok(())
    }

    async fn resolve_alias(&self, local_id: EntityId) -> Result<Option<EntityId>, StoreError> {
        Ok(self.read()?.aliases.get(&local_id).copied())
    }

    async fn mark_pulled(&self, collection: Collection, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.pulls.insert(collection, at);
        Ok(())
    }

    async fn last_pulled(&self, collection: Collection) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.read()?.pulls.get(&collection).copied())
    }
}
