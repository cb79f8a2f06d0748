//! Chunked response reassembly
//!
//! Large API results are not returned inline. Instead the body carries a
//! `chunk_info` descriptor naming a number of page files below a base URL,
//! each holding a JSON array of rows. Reassembly fetches every page and
//! concatenates them in page order. A result is only produced when all
//! pages were fetched.

use crate::CrawlError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Chunk descriptor embedded in a response body
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChunkInfo {
    #[serde(default)]
    pub chunk_size: u64,
    #[serde(default)]
    pub num_chunks: usize,
    #[serde(default)]
    pub rows: u64,
    #[serde(default)]
    pub base_download_url: String,
    #[serde(default)]
    pub chunk_file_names: Vec<String>,
}

impl ChunkInfo {
    /// Extracts the descriptor from a response body
    ///
    /// Returns `None` when the body has no (or a null) `chunk_info`.
    pub fn from_body(body: &Value) -> Result<Option<Self>, CrawlError> {
        match body.get("chunk_info") {
            None | Some(Value::Null) => Ok(None),
            Some(info) => Self::deserialize(info)
                .map(Some)
                .map_err(|e| CrawlError::decode("chunk_info", e)),
        }
    }

    /// URLs of all pages, in page order
    pub fn page_urls(&self) -> Result<Vec<String>, CrawlError> {
        if self.num_chunks != self.chunk_file_names.len() {
            return Err(CrawlError::Chunk(format!(
                "descriptor declares {} chunks but names {} files",
                self.num_chunks,
                self.chunk_file_names.len()
            )));
        }

        Ok(self
            .chunk_file_names
            .iter()
            .map(|file| format!("{}{}", self.base_download_url, file))
            .collect())
    }
}

/// Something that can fetch one chunk page
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Fetches a page and returns its rows
    async fn fetch_page(&self, url: &str) -> Result<Vec<Value>, CrawlError>;
}

/// Fetches chunk pages concurrently and concatenates them in order
#[derive(Debug, Clone)]
pub struct ChunkReassembler {
    max_concurrent: usize,
}

impl ChunkReassembler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Fetches every page the descriptor names
    ///
    /// Pages are fetched with at most `max_concurrent` requests in flight.
    /// If any page fails the remaining fetches are aborted and the error of
    /// the first failure observed is returned.
    pub async fn reassemble(
        &self,
        source: Arc<dyn ChunkSource>,
        info: &ChunkInfo,
    ) -> Result<Vec<Value>, CrawlError> {
        let urls = info.page_urls()?;
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for (index, url) in urls.into_iter().enumerate() {
            let source = Arc::clone(&source);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| CrawlError::Chunk(e.to_string()))?;
                tracing::trace!("Fetching chunk {}: {}", index, url);
                let rows = source.fetch_page(&url).await?;
                Ok::<_, CrawlError>((index, rows))
            });
        }

        let mut pages: Vec<Option<Vec<Value>>> = vec![None; tasks.len()];
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| CrawlError::Chunk(format!("chunk task failed: {}", e)));
            match result.and_then(|r| r) {
                Ok((index, rows)) => pages[index] = Some(rows),
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        let total = pages.iter().flatten().map(Vec::len).sum();
        let mut combined = Vec::with_capacity(total);
        for (index, page) in pages.into_iter().enumerate() {
            let rows = page.ok_or_else(|| CrawlError::Chunk(format!("chunk {} missing", index)))?;
            combined.extend(rows);
        }

        tracing::debug!(
            "Reassembled {} rows from {} chunks",
            combined.len(),
            info.num_chunks
        );

        Ok(combined)
    }

    /// Reassembles the chunks referenced by a response body
    ///
    /// A body without a descriptor reassembles to an empty array.
    pub async fn reassemble_body(
        &self,
        source: Arc<dyn ChunkSource>,
        body: &Value,
    ) -> Result<Vec<Value>, CrawlError> {
        match ChunkInfo::from_body(body)? {
            Some(info) => self.reassemble(source, &info).await,
            None => Ok(Vec::new()),
        }
    }
}
