//! Bus traits and error types

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while talking to the bus
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Failed to encode message: {0}")]
    Encode(serde_json::Error),

    #[error("Publish to '{topic}' was not confirmed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// A message handed to a consumer, to be acknowledged or rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: i64,
    pub payload: String,
    /// How many times this message has been handed out, this one included
    pub attempts: u32,
}

/// Publishing side of a topic
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes a payload and resolves once the bus has confirmed it
    ///
    /// Returns the id the bus assigned to the message.
    async fn publish(&self, payload: String) -> BusResult<i64>;
}

/// Consuming side of a topic
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Claims the next available message, if any
    async fn receive(&self) -> BusResult<Option<Delivery>>;

    /// Marks a message as processed; it will not be delivered again
    async fn ack(&self, id: i64) -> BusResult<()>;

    /// Rejects a message so that it is delivered again later
    async fn nack(&self, id: i64) -> BusResult<()>;
}
