//! Response processing pipeline
//!
//! This module turns fetch responses into stored documents and new work:
//! - The dispatcher routes a response to the handler registered for its endpoint
//! - Handlers read-or-create their document, update it, and save it with a
//!   version check
//! - Newly discovered child entities are fanned out as fetch requests
//!
//! Handlers keep no state between invocations. Everything they need is in
//! the `HandlerContext`, which is shared by all concurrently running
//! invocations.

mod dispatcher;
mod laps;
mod season;
mod session;

pub use dispatcher::{Dispatch, Dispatcher};
pub use laps::{laps_document_name, LapDataHandler, LapsSpec, LAPS_KIND};
pub use season::{
    season_document_name, LeagueSeasonSessionsHandler, ParsedSession, SeasonSpec, SEASON_KIND,
};
pub use session::{session_document_name, SessionResultsHandler, SessionSpec, SESSION_KIND};

use crate::bus::{FetchRequest, FetchResponse, Publisher};
use crate::config::StoreConfig;
use crate::storage::DocumentStore;
use crate::CrawlError;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Names of the collections documents are written to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collections {
    /// Holds `session` and `laps` documents
    pub sessions: String,
    /// Holds `season` documents
    pub seasons: String,
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            sessions: "sessions".to_string(),
            seasons: "seasons".to_string(),
        }
    }
}

impl From<&StoreConfig> for Collections {
    fn from(config: &StoreConfig) -> Self {
        Self {
            sessions: config.session_collection.clone(),
            seasons: config.season_collection.clone(),
        }
    }
}

/// Long-lived handles passed into every handler invocation
#[derive(Clone)]
pub struct HandlerContext {
    pub store: Arc<dyn DocumentStore>,
    pub publisher: Arc<dyn Publisher>,
    pub collections: Collections,
    /// Cancelling this makes in-flight handlers return `CrawlError::Cancelled`
    pub cancel: CancellationToken,
}

impl HandlerContext {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        publisher: Arc<dyn Publisher>,
        collections: Collections,
    ) -> Self {
        Self {
            store,
            publisher,
            collections,
            cancel: CancellationToken::new(),
        }
    }

    /// Ties handler invocations to an outer cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// What a handler did with one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    /// `kind/name` of the document that was saved
    pub document: String,
    /// Requests whose publication was confirmed
    pub emitted: usize,
    /// Requests that could not be published
    pub failed: usize,
}

/// A handler for the responses of one endpoint
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        response: &FetchResponse,
    ) -> Result<HandlerOutcome, CrawlError>;
}

/// Track reference embedded in several API payloads
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TrackRef {
    #[serde(default)]
    pub track_id: Option<i64>,
}

/// Result of publishing a batch of requests
#[derive(Debug, Default)]
pub(crate) struct FanOut {
    /// Confirmed requests, in the order they were given
    pub confirmed: Vec<FetchRequest>,
    pub failed: usize,
}

/// Publishes all requests concurrently and waits for every confirmation
///
/// Failures are logged and counted, never retried here.
pub(crate) async fn fan_out(publisher: &Arc<dyn Publisher>, requests: Vec<FetchRequest>) -> FanOut {
    let total = requests.len();
    let mut tasks = JoinSet::new();

    for (index, request) in requests.into_iter().enumerate() {
        let publisher = Arc::clone(publisher);
        tasks.spawn(async move {
            let result = match request.to_payload() {
                Ok(payload) => publisher.publish(payload).await.map(|_| ()),
                Err(e) => Err(e),
            };
            (index, request, result)
        });
    }

    let mut confirmed = Vec::with_capacity(total);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, request, Ok(()))) => confirmed.push((index, request)),
            Ok((_, request, Err(e))) => {
                tracing::warn!(
                    endpoint = %request.endpoint,
                    params = ?request.params,
                    "Failed to publish request: {}",
                    e
                );
            }
            Err(e) => tracing::warn!("Publish task failed: {}", e),
        }
    }

    confirmed.sort_by_key(|(index, _)| *index);

    FanOut {
        failed: total - confirmed.len(),
        confirmed: confirmed.into_iter().map(|(_, request)| request).collect(),
    }
}
