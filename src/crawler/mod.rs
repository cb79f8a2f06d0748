//! Crawler module for the request-issuing side and the receive loops
//!
//! This module contains everything that moves messages, including:
//! - Calling the remote API for fetch requests
//! - Reassembling chunked responses
//! - The request and response receive loops
//! - Overall crawl coordination

mod chunks;
mod coordinator;
mod fetcher;

pub use chunks::{ChunkInfo, ChunkReassembler, ChunkSource};
pub use coordinator::{
    pump_one, run_crawl, run_loop, Coordinator, CrawlStats, LoopStats, MessageProcessor,
    ResponseProcessor,
};
pub use fetcher::{build_http_client, ApiClient, RequestFetcher};
