//! Grid-Crawl: an incremental crawler for hierarchical racing-league data
//!
//! This crate crawls leagues → seasons → sessions → per-driver laps by
//! exchanging fetch requests and responses over a work queue, and stores
//! normalized results as versioned documents with optimistic concurrency.

pub mod bus;
pub mod config;
pub mod crawler;
pub mod processing;
pub mod storage;

use thiserror::Error;

/// Main error type for Grid-Crawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store {op} failed for {key}: {source}")]
    Store {
        op: &'static str,
        key: String,
        source: storage::StoreError,
    },

    #[error("Bus error: {0}")]
    Bus(#[from] bus::BusError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Failed to decode {context}: {source}")]
    Decode {
        context: String,
        source: serde_json::Error,
    },

    #[error("Invalid parameter '{name}': {value:?}")]
    InvalidParam { name: String, value: Option<String> },

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Response for {endpoint} carries no chunk payload")]
    MissingChunks { endpoint: String },

    #[error("Chunk reassembly failed: {0}")]
    Chunk(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Processing task failed: {0}")]
    Panicked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrawlError {
    /// Wraps a store failure with the operation and entity key it hit
    pub fn store(op: &'static str, key: impl Into<String>, source: storage::StoreError) -> Self {
        Self::Store {
            op,
            key: key.into(),
            source,
        }
    }

    /// Wraps a JSON decode failure with what was being decoded
    pub fn decode(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            context: context.into(),
            source,
        }
    }

    /// Returns true if reprocessing the same message may succeed
    ///
    /// Malformed payloads fail identically on every delivery, so they are
    /// not retryable even though they still get negatively acknowledged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store { source, .. } => source.is_retryable(),
            Self::Bus(_) | Self::Http { .. } | Self::HttpStatus { .. } | Self::Cancelled => true,
            Self::Chunk(_) | Self::Io(_) => true,
            Self::Config(_)
            | Self::UrlParse(_)
            | Self::Decode { .. }
            | Self::InvalidParam { .. }
            | Self::UnknownEndpoint(_)
            | Self::MissingChunks { .. }
            | Self::Panicked(_) => false,
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Grid-Crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use bus::{Endpoint, FetchRequest, FetchResponse};
pub use config::Config;
pub use processing::{Dispatcher, HandlerContext};
pub use storage::{DocumentStore, SqliteDocumentStore};
