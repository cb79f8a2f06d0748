//! Storage module for persisting crawled entities
//!
//! This module handles all document persistence for the crawler, including:
//! - The versioned document envelope shared by every entity kind
//! - The document store contract and its SQLite backend
//! - The get-or-create and version-checked save patterns used by handlers

mod repository;
mod schema;
mod sqlite;
mod traits;

pub use repository::{get_or_create, save};
pub use sqlite::SqliteDocumentStore;
pub use traits::{DocumentStore, StoreError, StoreResult};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Denormalized, indexable attributes of a document
pub type Labels = BTreeMap<String, serde_json::Value>;

/// Metadata envelope carried by every document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Entity type discriminator
    pub kind: String,

    /// Deterministic identifier built from domain keys
    pub name: String,

    /// Optimistic-concurrency token, starts at 0
    pub version: i64,

    /// Set once at creation, never changed afterwards
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub labels: Labels,
}

impl Meta {
    /// Sets or overwrites a label
    pub fn set_label(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.labels.insert(key.to_string(), value.into());
    }

    /// Sets a label, or removes it when the value is unknown
    pub fn set_label_opt<V: Into<serde_json::Value>>(&mut self, key: &str, value: Option<V>) {
        match value {
            Some(value) => self.set_label(key, value),
            None => {
                self.labels.remove(key);
            }
        }
    }

    /// Returns `kind/name`, used to identify the document in logs and errors
    pub fn key(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

/// A document with an entity-specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document<S> {
    pub meta: Meta,
    pub spec: S,
}

/// A document whose payload is kept as untyped JSON
///
/// This is the shape stores work with; handlers convert to and from their
/// typed specs.
pub type RawDocument = Document<serde_json::Value>;

impl<S> Document<S> {
    /// Builds a fresh, zero-version document with empty labels
    pub fn new(kind: &str, name: &str, spec: S) -> Self {
        Self {
            meta: Meta {
                kind: kind.to_string(),
                name: name.to_string(),
                version: 0,
                created_at: Utc::now(),
                labels: Labels::new(),
            },
            spec,
        }
    }
}

impl<S: Serialize> Document<S> {
    /// Converts the typed payload into the store's raw representation
    pub fn to_raw(&self) -> StoreResult<RawDocument> {
        Ok(Document {
            meta: self.meta.clone(),
            spec: serde_json::to_value(&self.spec)?,
        })
    }
}

impl RawDocument {
    /// Decodes the raw payload into a typed spec
    pub fn decode<S: DeserializeOwned>(self) -> StoreResult<Document<S>> {
        Ok(Document {
            meta: self.meta,
            spec: serde_json::from_value(self.spec)?,
        })
    }
}
