//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the DocumentStore trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{DocumentStore, StoreError, StoreResult};
use crate::storage::{Labels, Meta, RawDocument};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite document store backend
///
/// The connection is shared behind a mutex; every operation is a single
/// statement, so the lock is never held across an await point.
pub struct SqliteDocumentStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteDocumentStore {
    /// Opens (or creates) a store at the given path
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    pub fn new(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Creates an in-memory store
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(StoreError::Disconnected)?;
        f(conn)
    }

    /// Counts documents per `(collection, kind)`
    pub fn count_by_kind(&self) -> StoreResult<Vec<(String, String, u64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT collection, kind, COUNT(*) FROM documents
                 GROUP BY collection, kind ORDER BY collection, kind",
            )?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get::<_, i64>(2)? as u64))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn parse_created_at(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Database(format!("invalid created_at '{}': {}", value, e)))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn read_one(
        &self,
        collection: &str,
        kind: &str,
        name: &str,
    ) -> StoreResult<RawDocument> {
        self.with_conn(|conn| {
            let row: Option<(i64, String, String, String)> = conn
                .query_row(
                    "SELECT version, created_at, labels, spec FROM documents
                     WHERE collection = ?1 AND kind = ?2 AND name = ?3",
                    params![collection, kind, name],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;

            let (version, created_at, labels, spec) = row.ok_or(StoreError::NotFound)?;
            let labels: Labels = serde_json::from_str(&labels)?;

            Ok(RawDocument {
                meta: Meta {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    version,
                    created_at: parse_created_at(&created_at)?,
                    labels,
                },
                spec: serde_json::from_str(&spec)?,
            })
        })
    }

    async fn create(&self, collection: &str, document: &RawDocument) -> StoreResult<()> {
        let labels = serde_json::to_string(&document.meta.labels)?;
        let spec = serde_json::to_string(&document.spec)?;

        self.with_conn(|conn| {
            let result = conn.execute(
                "INSERT INTO documents (collection, kind, name, version, created_at, labels, spec)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    collection,
                    document.meta.kind,
                    document.meta.name,
                    document.meta.version,
                    document.meta.created_at.to_rfc3339(),
                    labels,
                    spec
                ],
            );

            match result {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(StoreError::AlreadyExists),
                Err(e) => Err(e.into()),
            }
        })
    }

    async fn update_if_version(
        &self,
        collection: &str,
        kind: &str,
        name: &str,
        expected_version: i64,
        document: &RawDocument,
    ) -> StoreResult<()> {
        let labels = serde_json::to_string(&document.meta.labels)?;
        let spec = serde_json::to_string(&document.spec)?;

        self.with_conn(|conn| {
            // The stored version is bumped here rather than copied from the
            // document so it always advances by exactly one.
            let updated = conn.execute(
                "UPDATE documents SET version = version + 1, labels = ?1, spec = ?2
                 WHERE collection = ?3 AND kind = ?4 AND name = ?5 AND version = ?6",
                params![labels, spec, collection, kind, name, expected_version],
            )?;

            if updated == 0 {
                return Err(StoreError::VersionConflict {
                    expected: expected_version,
                });
            }

            Ok(())
        })
    }

    async fn disconnect(&self) -> StoreResult<()> {
        let conn = self.lock()?.take();

        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
            tracing::debug!("Document store disconnected");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Document;
    use serde_json::json;

    fn sample(name: &str) -> RawDocument {
        let mut doc = Document::new("session", name, json!({"data": null}));
        doc.meta.set_label("subsession_id", 42);
        doc
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let doc = sample("session_42");

        store.create("sessions", &doc).await.unwrap();
        let read = store
            .read_one("sessions", "session", "session_42")
            .await
            .unwrap();

        assert_eq!(read, doc);
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let result = store.read_one("sessions", "session", "session_1").await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_create_duplicate_fails_distinctly() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        store.create("sessions", &sample("session_42")).await.unwrap();

        let mut other = sample("session_42");
        other.spec = json!({"data": "other"});
        let result = store.create("sessions", &other).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists)));

        // The original is not overwritten
        let read = store
            .read_one("sessions", "session", "session_42")
            .await
            .unwrap();
        assert_eq!(read.spec, json!({"data": null}));
    }

    #[tokio::test]
    async fn test_same_name_in_other_collection_or_kind_is_distinct() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        store.create("sessions", &sample("x")).await.unwrap();
        store.create("seasons", &sample("x")).await.unwrap();

        let mut laps = sample("x");
        laps.meta.kind = "laps".to_string();
        store.create("sessions", &laps).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_with_matching_version_increments_by_one() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let mut doc = sample("session_42");
        store.create("sessions", &doc).await.unwrap();

        doc.spec = json!({"data": {"laps": 12}});
        store
            .update_if_version("sessions", "session", "session_42", 0, &doc)
            .await
            .unwrap();

        let read = store
            .read_one("sessions", "session", "session_42")
            .await
            .unwrap();
        assert_eq!(read.meta.version, 1);
        assert_eq!(read.spec, json!({"data": {"laps": 12}}));
        assert_eq!(read.meta.created_at, doc.meta.created_at);
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let doc = sample("session_42");
        store.create("sessions", &doc).await.unwrap();
        store
            .update_if_version("sessions", "session", "session_42", 0, &doc)
            .await
            .unwrap();

        let result = store
            .update_if_version("sessions", "session", "session_42", 0, &doc)
            .await;
        assert!(matches!(
            result,
            Err(StoreError::VersionConflict { expected: 0 })
        ));
    }

    #[tokio::test]
    async fn test_update_missing_document_conflicts() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let result = store
            .update_if_version("sessions", "session", "gone", 0, &sample("gone"))
            .await;
        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));
    }

    #[tokio::test]
    async fn test_update_keeps_created_at() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        let doc = sample("session_42");
        store.create("sessions", &doc).await.unwrap();

        let mut changed = doc.clone();
        changed.meta.created_at = Utc::now() + chrono::Duration::days(1);
        store
            .update_if_version("sessions", "session", "session_42", 0, &changed)
            .await
            .unwrap();

        let read = store
            .read_one("sessions", "session", "session_42")
            .await
            .unwrap();
        assert_eq!(read.meta.created_at, doc.meta.created_at);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        store.disconnect().await.unwrap();
        store.disconnect().await.unwrap();

        let result = store.read_one("sessions", "session", "session_1").await;
        assert!(matches!(result, Err(StoreError::Disconnected)));
    }

    #[tokio::test]
    async fn test_count_by_kind() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        store.create("sessions", &sample("a")).await.unwrap();
        store.create("sessions", &sample("b")).await.unwrap();
        store.create("seasons", &sample("c")).await.unwrap();

        let counts = store.count_by_kind().unwrap();
        assert_eq!(
            counts,
            vec![
                ("seasons".to_string(), "session".to_string(), 1),
                ("sessions".to_string(), "session".to_string(), 2),
            ]
        );
    }
}
