//! Remote API fetcher
//!
//! This module is the request-issuing side of the crawl loop:
//! - Building the HTTP client from the API configuration
//! - GET requests against the known endpoint paths
//! - Fetching chunk pages for reassembly
//! - Turning a `FetchRequest` into a published `FetchResponse`

use crate::bus::{Endpoint, FetchRequest, FetchResponse, Params, Publisher};
use crate::config::ApiConfig;
use crate::crawler::chunks::{ChunkReassembler, ChunkSource};
use crate::{ConfigError, CrawlError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = concat!("grid-crawl/", env!("CARGO_PKG_VERSION"));

/// Builds an HTTP client with proper configuration
///
/// The auth token, when configured, is sent as a bearer token on every
/// API request. Chunk pages are fetched with a separate client that
/// carries no credentials.
pub fn build_http_client(config: &ApiConfig, with_auth: bool) -> Result<Client, CrawlError> {
    let mut headers = HeaderMap::new();
    if let (true, Some(token)) = (with_auth, config.auth_token.as_deref()) {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ConfigError::Validation(format!("invalid auth_token: {}", e)))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .timeout(config.timeout())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
        .map_err(|e| CrawlError::Http {
            url: config.base_url.clone(),
            source: e,
        })
}

/// Client for the remote data API
#[derive(Debug, Clone)]
pub struct ApiClient {
    api: Client,
    pages: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, CrawlError> {
        Ok(Self {
            api: build_http_client(config, true)?,
            pages: build_http_client(config, false)?,
            base_url: Url::parse(&config.base_url)?,
        })
    }

    /// Full URL of an endpoint call, params as query string
    pub fn endpoint_url(&self, endpoint: Endpoint, params: &Params) -> Result<Url, CrawlError> {
        let mut url = self.base_url.join(endpoint.path())?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        Ok(url)
    }

    /// Calls an endpoint and returns the raw body
    pub async fn get(&self, endpoint: Endpoint, params: &Params) -> Result<String, CrawlError> {
        let url = self.endpoint_url(endpoint, params)?;
        tracing::debug!("GET {}", url);
        get_text(&self.api, url.as_str()).await
    }
}

async fn get_text(client: &Client, url: &str) -> Result<String, CrawlError> {
    let http_error = |source| CrawlError::Http {
        url: url.to_string(),
        source,
    };

    let response = client.get(url).send().await.map_err(http_error)?;

    let status = response.status();
    if !status.is_success() {
        return Err(CrawlError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    response.text().await.map_err(http_error)
}

#[async_trait]
impl ChunkSource for ApiClient {
    async fn fetch_page(&self, url: &str) -> Result<Vec<Value>, CrawlError> {
        let body = get_text(&self.pages, url).await?;
        serde_json::from_str(&body).map_err(|e| CrawlError::decode(format!("chunk page {}", url), e))
    }
}

/// Executes fetch requests and publishes their responses
#[derive(Clone)]
pub struct RequestFetcher {
    client: Arc<ApiClient>,
    reassembler: ChunkReassembler,
    publisher: Arc<dyn Publisher>,
}

impl RequestFetcher {
    pub fn new(
        client: Arc<ApiClient>,
        reassembler: ChunkReassembler,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            client,
            reassembler,
            publisher,
        }
    }

    /// Fetches the data a request asks for
    ///
    /// Unknown endpoints are rejected. When the request wants chunks, the
    /// response only exists if every chunk page was fetched.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, CrawlError> {
        let endpoint = Endpoint::parse(&request.endpoint)
            .ok_or_else(|| CrawlError::UnknownEndpoint(request.endpoint.clone()))?;

        let body = self.client.get(endpoint, &request.params).await?;

        let chunks = if request.wants_chunks {
            let parsed: Value = serde_json::from_str(&body)
                .map_err(|e| CrawlError::decode(format!("{} body", endpoint), e))?;
            let source: Arc<dyn ChunkSource> = self.client.clone();
            let rows = self.reassembler.reassemble_body(source, &parsed).await?;
            Some(
                serde_json::to_string(&rows)
                    .map_err(|e| CrawlError::decode("reassembled chunks", e))?,
            )
        } else {
            None
        };

        Ok(FetchResponse {
            endpoint: request.endpoint.clone(),
            params: request.params.clone(),
            body,
            chunks,
        })
    }

    /// Fetches a request and publishes the response, waiting for confirmation
    pub async fn handle(&self, request: &FetchRequest) -> Result<(), CrawlError> {
        let response = self.fetch(request).await?;
        let id = self.publisher.publish(response.to_payload()?).await?;

        tracing::debug!(
            endpoint = %request.endpoint,
            params = ?request.params,
            message_id = id,
            "Published response"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_config() -> ApiConfig {
        ApiConfig {
            base_url: "https://members-ng.iracing.com".to_string(),
            auth_token: Some("token".to_string()),
            timeout_secs: 5,
            max_concurrent_chunks: 2,
        }
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(&api_config(), true).is_ok());
        assert!(build_http_client(&api_config(), false).is_ok());
    }

    #[test]
    fn test_endpoint_url() {
        let client = ApiClient::new(&api_config()).unwrap();
        let params: Params = [("subsession_id", "101"), ("include_licenses", "false")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let url = client.endpoint_url(Endpoint::ResultsGet, &params).unwrap();
        assert_eq!(
            url.as_str(),
            "https://members-ng.iracing.com/data/results/get?include_licenses=false&subsession_id=101"
        );

        let url = client
            .endpoint_url(Endpoint::LeagueSeasonSessions, &Params::new())
            .unwrap();
        assert_eq!(url.as_str(), "https://members-ng.iracing.com/data/league/season_sessions");
    }

    #[test]
    fn test_invalid_token_is_rejected() {
        let mut config = api_config();
        config.auth_token = Some("bad\ntoken".to_string());
        assert!(build_http_client(&config, true).is_err());
    }
}
