use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use timekeep_core::{Collection, EntityId, OperationId};

use super::{LocalStore, StoreError};
use crate::operation::{Operation, OperationKind, PendingOperation};

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS entities (
        collection  TEXT    NOT NULL,
        id          INTEGER NOT NULL,
        data        TEXT    NOT NULL,
        cached_at   TEXT    NOT NULL,
        PRIMARY KEY (collection, id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pending_operations (
        seq          INTEGER PRIMARY KEY AUTOINCREMENT,
        id           TEXT    NOT NULL UNIQUE,
        kind         TEXT    NOT NULL,
        payload      TEXT    NOT NULL,
        created_at   TEXT    NOT NULL,
        retry_count  INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS id_aliases (
        local_id   INTEGER PRIMARY KEY,
        server_id  INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pull_state (
        collection  TEXT PRIMARY KEY,
        pulled_at   TEXT NOT NULL
    )
    "#,
];

/// SQLite-backed store.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        tracing::debug!(path = %path.display(), "opened local store");
        Self::with_pool(pool).await
    }

    /// Private in-memory database (tests/dev).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every connection to `:memory:` is its own database, so keep exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Remove a queued row that can never be replayed, logging what it held.
    async fn drop_undecodable(&self, row: &SqliteRow, err: &StoreError) -> Result<(), StoreError> {
        let seq: i64 = row.try_get("seq")?;
        let kind: String = row.try_get("kind").unwrap_or_default();
        let payload: String = row.try_get("payload").unwrap_or_default();

        sqlx::query("DELETE FROM pending_operations WHERE seq = ?1")
            .bind(seq)
            .execute(&self.pool)
            .await?;

        tracing::error!(
            seq,
            kind = %kind,
            payload = %payload,
            error = %err,
            "dropping undecodable pending operation"
        );
        Ok(())
    }

    /// Close the pool, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Fixed-width RFC 3339 so that text order equals time order.
fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_time(location: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(location, e))
}

fn decode_json(location: &str, raw: &str) -> Result<Value, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::corrupt(location, e))
}

/// Map a `pending_operations` row into a `PendingOperation`.
fn row_to_operation(row: &SqliteRow) -> Result<PendingOperation, StoreError> {
    let id_str: String = row.try_get("id")?;
    let id = id_str
        .parse::<OperationId>()
        .map_err(|e| StoreError::corrupt("pending_operations.id", e))?;

    let location = format!("pending_operations/{id}");

    let kind_str: String = row.try_get("kind")?;
    let kind = kind_str
        .parse::<OperationKind>()
        .map_err(|e| StoreError::corrupt(&location, e))?;

    let payload_str: String = row.try_get("payload")?;
    let payload = decode_json(&location, &payload_str)?;
    let operation = Operation::from_parts(kind, payload).map_err(|e| StoreError::corrupt(&location, e))?;

    let created_at_str: String = row.try_get("created_at")?;
    let created_at = decode_time(&location, &created_at_str)?;

    let retry_count: i64 = row.try_get("retry_count")?;

    Ok(PendingOperation {
        id,
        operation,
        created_at,
        retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
    })
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn put(&self, collection: Collection, id: EntityId, record: &Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO entities (collection, id, data, cached_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (collection, id)
            DO UPDATE SET data = excluded.data, cached_at = excluded.cached_at
            "#,
        )
        .bind(collection.as_str())
        .bind(id.get())
        .bind(record.to_string())
        .bind(encode_time(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, collection: Collection, id: EntityId) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT data FROM entities WHERE collection = ?1 AND id = ?2")
            .bind(collection.as_str())
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let data: String = row.try_get("data")?;
                decode_json(&format!("{collection}/{id}"), &data).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn get_all(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        let rows = sqlx::query("SELECT id, data FROM entities WHERE collection = ?1 ORDER BY id ASC")
            .bind(collection.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let data: String = row.try_get("data")?;
            records.push(decode_json(&format!("{collection}/{id}"), &data)?);
        }
        Ok(records)
    }

    async fn delete(&self, collection: Collection, id: EntityId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM entities WHERE collection = ?1 AND id = ?2")
            .bind(collection.as_str())
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_collection(
        &self,
        collection: Collection,
        records: Vec<(EntityId, Value)>,
    ) -> Result<(), StoreError> {
        let cached_at = encode_time(Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM entities WHERE collection = ?1")
            .bind(collection.as_str())
            .execute(&mut *tx)
            .await?;

        for (id, record) in records {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO entities (collection, id, data, cached_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(collection.as_str())
            .bind(id.get())
            .bind(record.to_string())
            .bind(&cached_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn enqueue(&self, operation: &PendingOperation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO pending_operations (id, kind, payload, created_at, retry_count)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(operation.id.to_string())
        .bind(operation.kind().as_str())
        .bind(operation.operation.payload().to_string())
        .bind(encode_time(operation.created_at))
        .bind(i64::from(operation.retry_count))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dequeue(&self, id: OperationId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM pending_operations WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_queue(&self) -> Result<Vec<PendingOperation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT seq, id, kind, payload, created_at, retry_count
            FROM pending_operations
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut queue = Vec::with_capacity(rows.len());
        for row in &rows {
            match row_to_operation(row) {
                Ok(op) => queue.push(op),
                Err(err) => self.drop_undecodable(row, &err).await?,
            }
        }
        Ok(queue)
    }

    async fn update_retry_count(&self, id: OperationId, count: u32) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE pending_operations SET retry_count = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(i64::from(count))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownOperation(id));
        }
        Ok(())
    }

    async fn put_alias(&self, local_id: EntityId, server_id: EntityId) -> Result<(), StoreError> {
        sqlx::query("INSERT OR REPLACE INTO id_aliases (local_id, server_id) VALUES (?1, ?2)")
            .bind(local_id.get())
            .bind(server_id.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn resolve_alias(&self, local_id: EntityId) -> Result<Option<EntityId>, StoreError> {
        let row = sqlx::query("SELECT server_id FROM id_aliases WHERE local_id = ?1")
            .bind(local_id.get())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let server_id: i64 = row.try_get("server_id")?;
                Ok(Some(EntityId::new(server_id)))
            }
            None => Ok(None),
        }
    }

    async fn mark_pulled(&self, collection: Collection, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("INSERT OR REPLACE INTO pull_state (collection, pulled_at) VALUES (?1, ?2)")
            .bind(collection.as_str())
            .bind(encode_time(at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn last_pulled(&self, collection: Collection) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = sqlx::query("SELECT pulled_at FROM pull_state WHERE collection = ?1")
            .bind(collection.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("pulled_at")?;
                decode_time("pull_state.pulled_at", &raw).map(Some)
            }
            None => Ok(None),
        }
    }
}
