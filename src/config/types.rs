use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Grid-Crawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub store: StoreConfig,
    pub bus: BusConfig,
}

/// Remote API access configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL that endpoint paths are resolved against
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Bearer token sent with every API call
    #[serde(rename = "auth-token", default)]
    pub auth_token: Option<String>,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum number of chunk pages fetched at once for one response
    #[serde(rename = "max-concurrent-chunks", default = "default_max_concurrent_chunks")]
    pub max_concurrent_chunks: usize,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Document store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Collection holding session and laps documents
    #[serde(rename = "session-collection", default = "default_session_collection")]
    pub session_collection: String,

    /// Collection holding season documents
    #[serde(rename = "season-collection", default = "default_season_collection")]
    pub season_collection: String,
}

/// Work queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Path to the SQLite queue database
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Topic carrying fetch requests
    #[serde(rename = "request-topic", default = "default_request_topic")]
    pub request_topic: String,

    /// Topic carrying fetch responses
    #[serde(rename = "response-topic", default = "default_response_topic")]
    pub response_topic: String,

    /// Maximum number of messages processed concurrently per topic
    #[serde(rename = "max-in-flight", default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Delay between polls of an empty topic (milliseconds)
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay before a rejected message is delivered again (milliseconds)
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl BusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_chunks() -> usize {
    4
}

fn default_session_collection() -> String {
    "sessions".to_string()
}

fn default_season_collection() -> String {
    "seasons".to_string()
}

fn default_request_topic() -> String {
    "api-req".to_string()
}

fn default_response_topic() -> String {
    "api-res".to_string()
}

fn default_max_in_flight() -> usize {
    8
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_retry_delay_ms() -> u64 {
    1000
}
