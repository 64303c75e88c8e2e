//! Local durable store: entity cache plus the pending-operation queue.
//!
//! Two namespaces share one backend:
//! - an **entity cache** keyed by collection + id, overwritten from server
//!   responses only;
//! - a **pending-operation queue** listed in creation order (FIFO).
//!
//! Every call is persisted before it returns. A failed write surfaces to the
//! caller and is never retried here.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use timekeep_core::{CachedEntity, Collection, EntityId, OperationId};

use crate::operation::PendingOperation;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to create store directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("corrupt record in {location}: {reason}")]
    Corrupt { location: String, reason: String },

    #[error("operation {0} is not queued")]
    UnknownOperation(OperationId),

    #[error("store is unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn corrupt(location: impl Into<String>, reason: impl ToString) -> Self {
        Self::Corrupt {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}

/// Persistence contract used by the sync engine and the timer tracker.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Insert or overwrite a cached record.
    async fn put(&self, collection: Collection, id: EntityId, record: &Value) -> Result<(), StoreError>;

    async fn get(&self, collection: Collection, id: EntityId) -> Result<Option<Value>, StoreError>;

    /// All cached records of a collection, ordered by id.
    async fn get_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError>;

    /// Returns whether a record was removed.
    async fn delete(&self, collection: Collection, id: EntityId) -> Result<bool, StoreError>;

    /// Atomically swap the whole collection for a fresh server listing.
    async fn replace_collection(
        &self,
        collection: Collection,
        records: Vec<(EntityId, Value)>,
    ) -> Result<(), StoreError>;

    async fn enqueue(&self, operation: &PendingOperation) -> Result<(), StoreError>;

    /// Remove an operation. Removing an operation that is not queued is a no-op.
    async fn dequeue(&self, id: OperationId) -> Result<bool, StoreError>;

    /// Queued operations in creation order (FIFO).
    async fn list_queue(&self) -> Result<Vec<PendingOperation>, StoreError>;

    async fn update_retry_count(&self, id: OperationId, count: u32) -> Result<(), StoreError>;

    /// Remember which server id a local placeholder became.
    async fn put_alias(&self, local_id: EntityId, server_id: EntityId) -> Result<(), StoreError>;

    async fn resolve_alias(&self, local_id: EntityId) -> Result<Option<EntityId>, StoreError>;

    async fn mark_pulled(&self, collection: Collection, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Time of the last successful pull; bounds the staleness of the cache.
    async fn last_pulled(&self, collection: Collection) -> Result<Option<DateTime<Utc>>, StoreError>;
}

/// Typed access to the entity cache.
#[async_trait]
pub trait EntityCache {
    async fn put_entity<E: CachedEntity>(&self, entity: &E) -> Result<(), StoreError>;

    async fn get_entity<E: CachedEntity>(&self, id: EntityId) -> Result<Option<E>, StoreError>;

    async fn all_entities<E: CachedEntity>(&self) -> Result<Vec<E>, StoreError>;

    async fn replace_entities<E: CachedEntity>(&self, entities: &[E]) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> EntityCache for S
where
    S: LocalStore + ?Sized,
{
    async fn put_entity<E: CachedEntity>(&self, entity: &E) -> Result<(), StoreError> {
        let record = serde_json::to_value(entity)?;
        self.put(E::COLLECTION, entity.id(), &record).await
    }

    async fn get_entity<E: CachedEntity>(&self, id: EntityId) -> Result<Option<E>, StoreError> {
        match self.get(E::COLLECTION, id).await? {
            Some(record) => serde_json::from_value(record)
                .map(Some)
                .map_err(|e| StoreError::corrupt(format!("{}/{}", E::COLLECTION, id), e)),
            None => Ok(None),
        }
    }

    async fn all_entities<E: CachedEntity>(&self) -> Result<Vec<E>, StoreError> {
        let records = self.get_all(E::COLLECTION).await?;
        records
            .into_iter()
            .map(|record| {
                serde_json::from_value(record)
                    .map_err(|e| StoreError::corrupt(E::COLLECTION.as_str(), e))
            })
            .collect()
    }

    async fn replace_entities<E: CachedEntity>(&self, entities: &[E]) -> Result<(), StoreError> {
        let mut records = Vec::with_capacity(entities.len());
        for entity in entities {
            records.push((entity.id(), serde_json::to_value(entity)?));
        }
        self.replace_collection(E::COLLECTION, records).await
    }
}
