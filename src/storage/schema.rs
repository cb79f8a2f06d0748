//! Database schema definitions
//!
//! This module contains the SQL schema for the document store.

/// SQL schema for the document store
///
/// Every collection shares one table; `(collection, kind, name)` is the
/// natural key and `version` is the optimistic-concurrency token.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    version INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    labels TEXT NOT NULL,
    spec TEXT NOT NULL,
    PRIMARY KEY (collection, kind, name)
);

CREATE INDEX IF NOT EXISTS idx_documents_kind ON documents(collection, kind);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
