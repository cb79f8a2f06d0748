//! Crawl coordinator - the receive loops closing the crawl graph
//!
//! Two loops run over the work queue:
//! - The request loop takes `FetchRequest`s, calls the remote API and
//!   publishes the `FetchResponse`
//! - The response loop takes `FetchResponse`s and dispatches them to the
//!   endpoint handlers, which publish new requests
//!
//! Each loop acknowledges a message only after it was fully processed and
//! rejects it on any error, so the queue redelivers it later.

use crate::bus::{
    Endpoint, FetchRequest, FetchResponse, Publisher, SqliteQueue, Subscriber, Topic,
};
use crate::config::Config;
use crate::crawler::chunks::ChunkReassembler;
use crate::crawler::fetcher::{ApiClient, RequestFetcher};
use crate::processing::{Collections, Dispatch, Dispatcher, HandlerContext};
use crate::storage::{DocumentStore, SqliteDocumentStore};
use crate::CrawlError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Processes the payload of one delivered message
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, payload: &str) -> Result<(), CrawlError>;
}

/// Decodes responses and hands them to the dispatcher
#[derive(Clone)]
pub struct ResponseProcessor {
    dispatcher: Arc<Dispatcher>,
    ctx: HandlerContext,
}

impl ResponseProcessor {
    pub fn new(dispatcher: Arc<Dispatcher>, ctx: HandlerContext) -> Self {
        Self { dispatcher, ctx }
    }
}

#[async_trait]
impl MessageProcessor for ResponseProcessor {
    async fn process(&self, payload: &str) -> Result<(), CrawlError> {
        let response = FetchResponse::from_payload(payload)?;

        match self.dispatcher.dispatch(&self.ctx, &response).await? {
            Dispatch::Handled(outcome) => tracing::debug!(
                document = %outcome.document,
                emitted = outcome.emitted,
                failed = outcome.failed,
                "Handled {} response",
                response.endpoint
            ),
            Dispatch::Ignored => {}
        }

        Ok(())
    }
}

#[async_trait]
impl MessageProcessor for RequestFetcher {
    async fn process(&self, payload: &str) -> Result<(), CrawlError> {
        let request = FetchRequest::from_payload(payload)?;
        if Endpoint::parse(&request.endpoint).is_none() {
            // Would fail the same way on every redelivery
            tracing::info!("Dropping request for unknown endpoint '{}'", request.endpoint);
            return Ok(());
        }
        self.handle(&request).await
    }
}

/// Counters of one receive loop
#[derive(Debug, Default)]
pub struct LoopStats {
    pub acked: AtomicU64,
    pub nacked: AtomicU64,
}

/// Acknowledges or rejects a delivery depending on how processing went
async fn settle(
    subscriber: &dyn Subscriber,
    id: i64,
    attempts: u32,
    result: Result<(), CrawlError>,
    stats: &LoopStats,
) {
    match result {
        Ok(()) => {
            stats.acked.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = subscriber.ack(id).await {
                tracing::error!("Failed to acknowledge message {}: {}", id, e);
            }
        }
        Err(e) => {
            stats.nacked.fetch_add(1, Ordering::Relaxed);
            if e.is_retryable() {
                tracing::warn!("Message {} failed (attempt {}): {}", id, attempts, e);
            } else {
                tracing::error!(
                    "Message {} failed and will fail again (attempt {}): {}",
                    id,
                    attempts,
                    e
                );
            }
            if let Err(e) = subscriber.nack(id).await {
                tracing::error!("Failed to reject message {}: {}", id, e);
            }
        }
    }
}

/// Receives and processes a single message
///
/// Returns `Ok(false)` when no message was available.
pub async fn pump_one(
    subscriber: &dyn Subscriber,
    processor: &dyn MessageProcessor,
    stats: &LoopStats,
) -> Result<bool, CrawlError> {
    let Some(delivery) = subscriber.receive().await? else {
        return Ok(false);
    };

    let result = processor.process(&delivery.payload).await;
    settle(subscriber, delivery.id, delivery.attempts, result, stats).await;
    Ok(true)
}

/// Runs a receive loop until the token is cancelled
///
/// At most `max_in_flight` messages are processed concurrently. When the
/// topic is empty the loop sleeps for `poll_interval`. On cancellation,
/// in-flight messages are rejected and awaited before returning.
pub async fn run_loop(
    name: &str,
    subscriber: Arc<dyn Subscriber>,
    processor: Arc<dyn MessageProcessor>,
    max_in_flight: usize,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> Arc<LoopStats> {
    let stats = Arc::new(LoopStats::default());
    let semaphore = Arc::new(Semaphore::new(max_in_flight));

    tracing::info!("Starting {} loop ({} in flight)", name, max_in_flight);

    loop {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let delivery = match subscriber.receive().await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => continue,
                }
            }
            Err(e) => {
                drop(permit);
                tracing::error!("{} loop failed to receive: {}", name, e);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => continue,
                }
            }
        };

        tracing::trace!("{} loop received message {}", name, delivery.id);

        let subscriber = Arc::clone(&subscriber);
        let processor = Arc::clone(&processor);
        let stats = Arc::clone(&stats);
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let payload = delivery.payload;
            // Processing runs in its own task so a panic still settles the message
            let mut processing = tokio::spawn(async move { processor.process(&payload).await });
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    processing.abort();
                    Err(CrawlError::Cancelled)
                }
                joined = &mut processing => joined
                    .unwrap_or_else(|e| Err(CrawlError::Panicked(e.to_string()))),
            };
            settle(subscriber.as_ref(), delivery.id, delivery.attempts, result, &stats).await;
        });
    }

    // Every permit back means every spawned message was settled
    let _ = semaphore.acquire_many(max_in_flight as u32).await;

    tracing::info!(
        "{} loop stopped: {} acknowledged, {} rejected",
        name,
        stats.acked.load(Ordering::Relaxed),
        stats.nacked.load(Ordering::Relaxed)
    );

    stats
}

/// Document counts and queue depths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    /// (collection, kind, count)
    pub documents: Vec<(String, String, u64)>,
    /// (topic, pending messages)
    pub queues: Vec<(String, u64)>,
}

/// Main crawl coordinator structure
pub struct Coordinator {
    config: Config,
    store: Arc<SqliteDocumentStore>,
    queue: Arc<SqliteQueue>,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Opens the document store and the work queue named in the configuration
    pub fn new(config: Config) -> Result<Self, CrawlError> {
        let store_path = config.store.database_path.clone();
        let store = SqliteDocumentStore::new(Path::new(&store_path))
            .map_err(|e| CrawlError::store("open", store_path, e))?;
        let queue = SqliteQueue::new(
            Path::new(&config.bus.database_path),
            config.bus.retry_delay(),
        )?;

        Ok(Self::with_backends(config, Arc::new(store), Arc::new(queue)))
    }

    /// Creates a coordinator over already opened backends
    pub fn with_backends(
        config: Config,
        store: Arc<SqliteDocumentStore>,
        queue: Arc<SqliteQueue>,
    ) -> Self {
        Self {
            config,
            store,
            queue,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops `run` when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn request_topic(&self) -> Topic {
        self.queue.topic(&self.config.bus.request_topic)
    }

    fn response_topic(&self) -> Topic {
        self.queue.topic(&self.config.bus.response_topic)
    }

    /// Queues the initial request of a league season crawl
    pub async fn seed(&self, league_id: i64, season_id: i64) -> Result<i64, CrawlError> {
        let request = FetchRequest::new(
            Endpoint::LeagueSeasonSessions,
            [
                ("league_id", league_id.to_string()),
                ("season_id", season_id.to_string()),
            ],
        );
        let id = self.request_topic().publish(request.to_payload()?).await?;

        tracing::info!("Seeded league {} season {} (message {})", league_id, season_id, id);
        Ok(id)
    }

    /// Counts stored documents and queued messages
    pub fn stats(&self) -> Result<CrawlStats, CrawlError> {
        Ok(CrawlStats {
            documents: self
                .store
                .count_by_kind()
                .map_err(|e| CrawlError::store("count", "*", e))?,
            queues: self.queue.pending_counts()?,
        })
    }

    fn response_processor(&self) -> ResponseProcessor {
        let ctx = HandlerContext::new(
            self.store.clone(),
            Arc::new(self.request_topic()),
            Collections::from(&self.config.store),
        )
        .with_cancellation(self.cancel.clone());

        ResponseProcessor::new(Arc::new(Dispatcher::with_default_handlers()), ctx)
    }

    fn request_fetcher(&self) -> Result<RequestFetcher, CrawlError> {
        Ok(RequestFetcher::new(
            Arc::new(ApiClient::new(&self.config.api)?),
            ChunkReassembler::new(self.config.api.max_concurrent_chunks),
            Arc::new(self.response_topic()),
        ))
    }

    /// Processes queued messages until both topics are empty
    ///
    /// Messages are handled one at a time. Rejected messages only come back
    /// after the retry delay, so they do not keep this from returning.
    /// Returns how many messages were processed.
    pub async fn drain(&self) -> Result<u64, CrawlError> {
        let requests = self.request_topic();
        let responses = self.response_topic();
        let fetcher = self.request_fetcher()?;
        let processor = self.response_processor();
        let stats = LoopStats::default();

        let mut processed = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }

            let fetched = pump_one(&requests, &fetcher, &stats).await?;
            let handled = pump_one(&responses, &processor, &stats).await?;
            if !fetched && !handled {
                break;
            }
            processed += u64::from(fetched) + u64::from(handled);
        }

        tracing::info!(
            "Drained {} messages ({} rejected)",
            processed,
            stats.nacked.load(Ordering::Relaxed)
        );
        Ok(processed)
    }

    /// Runs both receive loops until cancelled, then disconnects the store
    pub async fn run(&self) -> Result<(), CrawlError> {
        let bus = &self.config.bus;
        let fetcher: Arc<dyn MessageProcessor> = Arc::new(self.request_fetcher()?);
        let processor: Arc<dyn MessageProcessor> = Arc::new(self.response_processor());

        tracing::info!(
            "Crawling: requests on '{}', responses on '{}'",
            bus.request_topic,
            bus.response_topic
        );

        tokio::join!(
            run_loop(
                "request",
                Arc::new(self.request_topic()),
                fetcher,
                bus.max_in_flight,
                bus.poll_interval(),
                self.cancel.clone(),
            ),
            run_loop(
                "response",
                Arc::new(self.response_topic()),
                processor,
                bus.max_in_flight,
                bus.poll_interval(),
                self.cancel.clone(),
            ),
        );

        self.store
            .disconnect()
            .await
            .map_err(|e| CrawlError::store("disconnect", "*", e))?;

        tracing::info!("Crawl stopped");
        Ok(())
    }
}

/// Runs the crawl described by a configuration until Ctrl-C
///
/// # Example
///
/// ```no_run
/// use grid_crawl::config::load_config;
/// use grid_crawl::crawler::run_crawl;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("grid-crawl.toml"))?;
/// run_crawl(config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(config: Config) -> Result<(), CrawlError> {
    let coordinator = Coordinator::new(config)?;
    let cancel = coordinator.cancellation_token();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after in-flight messages");
            cancel.cancel();
        }
    });

    coordinator.run().await
}
