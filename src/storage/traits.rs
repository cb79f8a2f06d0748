//! Storage traits and error types
//!
//! This module defines the four-operation contract every document store
//! backend provides, and the error type those operations report.

use crate::storage::RawDocument;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document not found")]
    NotFound,

    #[error("Document already exists")]
    AlreadyExists,

    #[error("Document modified by another process (expected version {expected})")]
    VersionConflict { expected: i64 },

    #[error("Store connection is closed")]
    Disconnected,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    /// Conflicts are resolved by reprocessing the whole message from scratch
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists | Self::VersionConflict { .. } | Self::Sqlite(_)
        )
    }
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Trait for document store backends
///
/// A document is identified by `(kind, name)` inside a collection. The
/// store never merges documents itself: callers read, modify in memory and
/// write back with the version they read, so concurrent writers are
/// detected instead of silently overwriting each other.
///
/// Implementations must be safe to share across concurrently running
/// handlers.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads the document stored under `(kind, name)`
    ///
    /// Returns `StoreError::NotFound` if there is none.
    async fn read_one(&self, collection: &str, kind: &str, name: &str)
        -> StoreResult<RawDocument>;

    /// Inserts a new document
    ///
    /// Fails with `StoreError::AlreadyExists` if `(kind, name)` is already
    /// present; the existing document is left untouched.
    async fn create(&self, collection: &str, document: &RawDocument) -> StoreResult<()>;

    /// Replaces the document only if its stored version equals `expected_version`
    ///
    /// On success the stored version becomes `expected_version + 1` and the
    /// creation timestamp is preserved. Fails with
    /// `StoreError::VersionConflict` when no document matches, which covers
    /// both a version that moved on and a document that vanished.
    async fn update_if_version(
        &self,
        collection: &str,
        kind: &str,
        name: &str,
        expected_version: i64,
        document: &RawDocument,
    ) -> StoreResult<()>;

    /// Releases the underlying connection
    ///
    /// Calling this more than once is a no-op.
    async fn disconnect(&self) -> StoreResult<()>;
}
