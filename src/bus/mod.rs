//! Bus module: the work queue that closes the crawl loop
//!
//! Handlers publish `FetchRequest`s for newly discovered work; the
//! request-issuing side answers each with a `FetchResponse` that is routed
//! back to the handlers. This module provides:
//! - The message types and the known endpoint identifiers
//! - Publisher/subscriber traits, decoupled from any transport
//! - A SQLite-backed at-least-once queue implementing both

mod messages;
mod queue;
mod traits;

pub use messages::{Endpoint, FetchRequest, FetchResponse, Params};
pub use queue::{SqliteQueue, Topic};
pub use traits::{BusError, BusResult, Delivery, Publisher, Subscriber};
