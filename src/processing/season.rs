//! Handler for `league_season_sessions` responses
//!
//! The season document is the record of which subsessions of a league
//! season have already been requested. Its `parsed_sessions` map only ever
//! grows, so a redelivered or concurrent response can never un-discover a
//! subsession.

use crate::bus::{Endpoint, FetchRequest, FetchResponse};
use crate::processing::{fan_out, HandlerContext, HandlerOutcome, ResponseHandler, TrackRef};
use crate::storage::{get_or_create, save};
use crate::CrawlError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const SEASON_KIND: &str = "season";

/// Deterministic name of the season document of a league season
pub fn season_document_name(league_id: i64, season_id: i64) -> String {
    format!("league_{}_season_{}", league_id, season_id)
}

/// What is known about one discovered subsession
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,
}

impl ParsedSession {
    /// Overwrites fields for which the newer observation has a value
    fn merge(&mut self, newer: &ParsedSession) {
        if newer.launch_at.is_some() {
            self.launch_at = newer.launch_at;
        }
        if newer.track_id.is_some() {
            self.track_id = newer.track_id;
        }
    }
}

/// Payload of a season document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeasonSpec {
    /// Discovered subsessions keyed by subsession id
    #[serde(default)]
    pub parsed_sessions: BTreeMap<String, ParsedSession>,
}

#[derive(Debug, Deserialize)]
struct SeasonSessionsBody {
    #[serde(default)]
    sessions: Vec<SeasonSessionRow>,
}

#[derive(Debug, Deserialize)]
struct SeasonSessionRow {
    #[serde(default)]
    subsession_id: Option<i64>,
    #[serde(default)]
    launch_at: Option<DateTime<Utc>>,
    #[serde(default)]
    track: Option<TrackRef>,
}

/// Subsessions listed in a payload, first occurrence wins
fn listed_sessions(body: SeasonSessionsBody) -> Vec<(String, ParsedSession)> {
    let mut seen = BTreeSet::new();
    let mut listed = Vec::new();

    for row in body.sessions {
        let subsession_id = match row.subsession_id {
            Some(id) if id > 0 => id.to_string(),
            _ => {
                tracing::debug!("Season session without subsession_id, skipping");
                continue;
            }
        };

        if seen.insert(subsession_id.clone()) {
            listed.push((
                subsession_id,
                ParsedSession {
                    launch_at: row.launch_at,
                    track_id: row.track.and_then(|t| t.track_id),
                },
            ));
        }
    }

    listed
}

/// Records the subsessions of a league season and requests the new ones
#[derive(Debug, Default, Clone, Copy)]
pub struct LeagueSeasonSessionsHandler;

#[async_trait]
impl ResponseHandler for LeagueSeasonSessionsHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        response: &FetchResponse,
    ) -> Result<HandlerOutcome, CrawlError> {
        let league_id = response.int_param("league_id")?;
        let season_id = response.int_param("season_id")?;

        let body: SeasonSessionsBody = serde_json::from_str(&response.body)
            .map_err(|e| CrawlError::decode("league_season_sessions body", e))?;
        let listed = listed_sessions(body);

        let collection = ctx.collections.seasons.as_str();
        let name = season_document_name(league_id, season_id);

        // Dedup against the document as stored now, never a cached copy
        let mut season = get_or_create::<SeasonSpec>(ctx.store.as_ref(), collection, SEASON_KIND, &name)
            .await
            .map_err(|e| CrawlError::store("get_or_create", format!("{}/{}", SEASON_KIND, name), e))?;

        let requests: Vec<FetchRequest> = listed
            .iter()
            .filter(|(id, _)| !season.spec.parsed_sessions.contains_key(id))
            .map(|(id, _)| {
                FetchRequest::new(
                    Endpoint::ResultsGet,
                    [
                        ("subsession_id", id.as_str()),
                        ("include_licenses", "false"),
                    ],
                )
            })
            .collect();

        tracing::debug!(
            league_id,
            season_id,
            listed = listed.len(),
            new = requests.len(),
            "Computed undiscovered subsessions"
        );

        let report = fan_out(&ctx.publisher, requests).await;
        if report.failed > 0 {
            tracing::warn!(
                "{} results requests for league {} season {} were not published, they will be retried on the next delivery",
                report.failed,
                league_id,
                season_id
            );
        }

        let confirmed: BTreeSet<&str> = report
            .confirmed
            .iter()
            .filter_map(|r| r.params.get("subsession_id").map(String::as_str))
            .collect();

        for (id, observed) in &listed {
            match season.spec.parsed_sessions.get_mut(id) {
                Some(known) => known.merge(observed),
                None if confirmed.contains(id.as_str()) => {
                    season
                        .spec
                        .parsed_sessions
                        .insert(id.clone(), observed.clone());
                }
                None => {}
            }
        }

        season.meta.set_label("league_id", league_id);
        season.meta.set_label("season_id", season_id);

        save(ctx.store.as_ref(), collection, &mut season)
            .await
            .map_err(|e| CrawlError::store("save", season.meta.key(), e))?;

        tracing::info!(
            "Published {} results requests for league {} season {}",
            report.confirmed.len(),
            league_id,
            season_id
        );

        Ok(HandlerOutcome {
            document: season.meta.key(),
            emitted: report.confirmed.len(),
            failed: report.failed,
        })
    }
}
