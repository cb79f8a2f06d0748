//! Wire messages exchanged over the bus
//!
//! A `FetchRequest` describes one unit of crawl work; the request-issuing
//! side answers it with a `FetchResponse` carrying the raw API body.

use crate::bus::traits::{BusError, BusResult};
use crate::CrawlError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Request parameters, always string-valued on the wire
pub type Params = BTreeMap<String, String>;

/// Remote endpoints the crawler knows how to request and process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Full result set of one subsession
    ResultsGet,
    /// Per-lap data of one participant in one sim-session
    LapData,
    /// Subsessions belonging to a league season
    LeagueSeasonSessions,
}

impl Endpoint {
    /// All known endpoints
    pub const ALL: [Endpoint; 3] = [
        Endpoint::ResultsGet,
        Endpoint::LapData,
        Endpoint::LeagueSeasonSessions,
    ];

    /// Identifier used in bus messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResultsGet => "results_get",
            Self::LapData => "lap_data",
            Self::LeagueSeasonSessions => "league_season_sessions",
        }
    }

    /// Path of the endpoint on the remote API
    pub fn path(&self) -> &'static str {
        match self {
            Self::ResultsGet => "/data/results/get",
            Self::LapData => "/data/results/lap_data",
            Self::LeagueSeasonSessions => "/data/league/season_sessions",
        }
    }

    /// Parses a bus identifier, returning None for unknown endpoints
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One unit of crawl work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub endpoint: String,

    #[serde(default)]
    pub params: Params,

    /// Whether the chunk pages referenced by the body should be reassembled
    #[serde(rename = "chunks", default, skip_serializing_if = "is_false")]
    pub wants_chunks: bool,
}

impl FetchRequest {
    /// Builds a request for a known endpoint
    pub fn new<K, V>(endpoint: Endpoint, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            endpoint: endpoint.as_str().to_string(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            wants_chunks: false,
        }
    }

    /// Marks the request as needing chunk reassembly
    pub fn with_chunks(mut self) -> Self {
        self.wants_chunks = true;
        self
    }

    /// Serializes the request for publishing
    pub fn to_payload(&self) -> BusResult<String> {
        serde_json::to_string(self).map_err(BusError::Encode)
    }

    /// Decodes a request received from the bus
    pub fn from_payload(payload: &str) -> Result<Self, CrawlError> {
        serde_json::from_str(payload).map_err(|e| CrawlError::decode("fetch request", e))
    }
}

/// The answer to a `FetchRequest`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub endpoint: String,

    #[serde(default)]
    pub params: Params,

    /// Raw JSON body returned by the API
    pub body: String,

    /// Reassembled chunk pages as a raw JSON array, present iff requested
    #[serde(default)]
    pub chunks: Option<String>,
}

impl FetchResponse {
    /// Serializes the response for publishing
    pub fn to_payload(&self) -> BusResult<String> {
        serde_json::to_string(self).map_err(BusError::Encode)
    }

    /// Decodes a response received from the bus
    pub fn from_payload(payload: &str) -> Result<Self, CrawlError> {
        serde_json::from_str(payload).map_err(|e| CrawlError::decode("fetch response", e))
    }

    /// Returns a request parameter parsed as an integer id
    pub fn int_param(&self, name: &str) -> Result<i64, CrawlError> {
        let value = self.params.get(name);
        value
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| CrawlError::InvalidParam {
                name: name.to_string(),
                value: value.cloned(),
            })
    }
}
