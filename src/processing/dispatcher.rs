//! Routing of responses to their endpoint handler

use crate::bus::{Endpoint, FetchResponse};
use crate::processing::{
    HandlerContext, HandlerOutcome, LapDataHandler, LeagueSeasonSessionsHandler,
    ResponseHandler, SessionResultsHandler,
};
use crate::CrawlError;
use std::collections::HashMap;
use std::sync::Arc;

/// What the dispatcher did with a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler processed the response
    Handled(HandlerOutcome),
    /// No handler is registered for the endpoint; the response is dropped
    Ignored,
}

/// Registration table from endpoint identifier to handler
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<&'static str, Arc<dyn ResponseHandler>>,
}

impl Dispatcher {
    /// Creates a dispatcher with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a dispatcher for the three crawled endpoints
    pub fn with_default_handlers() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(Endpoint::ResultsGet, Arc::new(SessionResultsHandler));
        dispatcher.register(Endpoint::LapData, Arc::new(LapDataHandler));
        dispatcher.register(
            Endpoint::LeagueSeasonSessions,
            Arc::new(LeagueSeasonSessionsHandler),
        );
        dispatcher
    }

    /// Registers (or replaces) the handler of an endpoint
    pub fn register(&mut self, endpoint: Endpoint, handler: Arc<dyn ResponseHandler>) {
        self.handlers.insert(endpoint.as_str(), handler);
    }

    /// Returns true if responses of this endpoint have a handler
    pub fn handles(&self, endpoint: &str) -> bool {
        self.handlers.contains_key(endpoint)
    }

    /// Routes a response to exactly one handler
    ///
    /// Unknown endpoints are not an error: they are logged and reported as
    /// `Dispatch::Ignored` so the message gets acknowledged. If the
    /// context is cancelled while the handler runs, the handler is dropped
    /// and `CrawlError::Cancelled` is returned.
    pub async fn dispatch(
        &self,
        ctx: &HandlerContext,
        response: &FetchResponse,
    ) -> Result<Dispatch, CrawlError> {
        let Some(handler) = self.handlers.get(response.endpoint.as_str()) else {
            tracing::info!("Skipping unknown endpoint: {}", response.endpoint);
            return Ok(Dispatch::Ignored);
        };

        tracing::debug!(endpoint = %response.endpoint, params = ?response.params, "Dispatching response");

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(CrawlError::Cancelled),
            result = handler.handle(ctx, response) => result?,
        };

        Ok(Dispatch::Handled(outcome))
    }
}
