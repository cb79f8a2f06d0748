//! Handler for `results_get` responses

use crate::bus::{Endpoint, FetchRequest, FetchResponse};
use crate::processing::{fan_out, HandlerContext, HandlerOutcome, ResponseHandler, TrackRef};
use crate::storage::{get_or_create, save};
use crate::CrawlError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

pub const SESSION_KIND: &str = "session";

/// Deterministic name of the session document of a subsession
pub fn session_document_name(subsession_id: i64) -> String {
    format!("session_{}", subsession_id)
}

/// Payload of a session document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSpec {
    /// The result body exactly as returned by the API
    #[serde(default)]
    pub data: Value,
}

/// Fields of the result body used for labels and lap fan-out
#[derive(Debug, Deserialize)]
struct ResultsBody {
    subsession_id: i64,
    #[serde(default)]
    league_id: Option<i64>,
    #[serde(default)]
    season_id: Option<i64>,
    #[serde(default)]
    track: Option<TrackRef>,
    #[serde(default)]
    session_results: Vec<SimSession>,
}

#[derive(Debug, Deserialize)]
struct SimSession {
    simsession_number: i64,
    #[serde(default)]
    results: Vec<ParticipantRow>,
}

#[derive(Debug, Deserialize)]
struct ParticipantRow {
    #[serde(default)]
    cust_id: Option<i64>,
}

impl ResultsBody {
    /// Distinct (sim-session, participant) pairs in payload order
    fn lap_keys(&self) -> Vec<(i64, i64)> {
        let mut seen = BTreeSet::new();
        let mut keys = Vec::new();

        for simsession in &self.session_results {
            for row in &simsession.results {
                let Some(cust_id) = row.cust_id else {
                    tracing::debug!(
                        subsession_id = self.subsession_id,
                        simsession_number = simsession.simsession_number,
                        "Result row without cust_id, skipping"
                    );
                    continue;
                };
                let key = (simsession.simsession_number, cust_id);
                if seen.insert(key) {
                    keys.push(key);
                }
            }
        }

        keys
    }
}

/// Stores a subsession's results and requests lap data for every participant
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionResultsHandler;

#[async_trait]
impl ResponseHandler for SessionResultsHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        response: &FetchResponse,
    ) -> Result<HandlerOutcome, CrawlError> {
        let raw: Value = serde_json::from_str(&response.body)
            .map_err(|e| CrawlError::decode("results_get body", e))?;
        let body = ResultsBody::deserialize(&raw)
            .map_err(|e| CrawlError::decode("results_get body", e))?;

        let subsession_id = body.subsession_id;
        tracing::info!("Processing results for subsession {}", subsession_id);

        let collection = ctx.collections.sessions.as_str();
        let name = session_document_name(subsession_id);

        let mut session = get_or_create::<SessionSpec>(ctx.store.as_ref(), collection, SESSION_KIND, &name)
            .await
            .map_err(|e| CrawlError::store("get_or_create", format!("{}/{}", SESSION_KIND, name), e))?;

        session.meta.set_label_opt("league_id", body.league_id);
        session.meta.set_label_opt("season_id", body.season_id);
        session.meta.set_label("subsession_id", subsession_id);
        session
            .meta
            .set_label_opt("track_id", body.track.as_ref().and_then(|t| t.track_id));
        session.spec.data = raw;

        save(ctx.store.as_ref(), collection, &mut session)
            .await
            .map_err(|e| CrawlError::store("save", session.meta.key(), e))?;

        tracing::debug!(
            document = %session.meta.key(),
            version = session.meta.version,
            "Saved session results"
        );

        let requests: Vec<FetchRequest> = body
            .lap_keys()
            .into_iter()
            .map(|(simsession_number, cust_id)| {
                FetchRequest::new(
                    Endpoint::LapData,
                    [
                        ("subsession_id", subsession_id.to_string()),
                        ("simsession_number", simsession_number.to_string()),
                        ("cust_id", cust_id.to_string()),
                    ],
                )
                .with_chunks()
            })
            .collect();

        let report = fan_out(&ctx.publisher, requests).await;
        if report.failed > 0 {
            tracing::warn!(
                "{} lap data requests for subsession {} were not published",
                report.failed,
                subsession_id
            );
        }

        tracing::info!(
            "Published {} lap data requests for subsession {}",
            report.confirmed.len(),
            subsession_id
        );

        Ok(HandlerOutcome {
            document: session.meta.key(),
            emitted: report.confirmed.len(),
            failed: report.failed,
        })
    }
}
