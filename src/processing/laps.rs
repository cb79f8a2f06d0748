//! Handler for `lap_data` responses

use crate::bus::FetchResponse;
use crate::processing::{HandlerContext, HandlerOutcome, ResponseHandler, TrackRef};
use crate::storage::{get_or_create, save};
use crate::CrawlError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const LAPS_KIND: &str = "laps";

/// Deterministic name of the laps document of one participant in one sim-session
pub fn laps_document_name(subsession_id: i64, simsession_number: i64, cust_id: i64) -> String {
    format!("laps_{}_{}_{}", subsession_id, simsession_number, cust_id)
}

/// Payload of a laps document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LapsSpec {
    /// Base lap data body as returned by the API
    #[serde(default)]
    pub data: Value,
    /// Reassembled lap rows of every chunk page, in page order
    #[serde(default)]
    pub chunks: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct LapDataBody {
    #[serde(default)]
    session_info: Option<SessionInfo>,
    #[serde(default)]
    car_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionInfo {
    #[serde(default)]
    track: Option<TrackRef>,
}

/// Stores the lap rows of one participant
#[derive(Debug, Default, Clone, Copy)]
pub struct LapDataHandler;

#[async_trait]
impl ResponseHandler for LapDataHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        response: &FetchResponse,
    ) -> Result<HandlerOutcome, CrawlError> {
        // The body does not echo these, the request params are authoritative
        let subsession_id = response.int_param("subsession_id")?;
        let simsession_number = response.int_param("simsession_number")?;
        let cust_id = response.int_param("cust_id")?;

        let raw: Value = serde_json::from_str(&response.body)
            .map_err(|e| CrawlError::decode("lap_data body", e))?;
        let body = LapDataBody::deserialize(&raw)
            .map_err(|e| CrawlError::decode("lap_data body", e))?;

        let chunks = response
            .chunks
            .as_deref()
            .ok_or_else(|| CrawlError::MissingChunks {
                endpoint: response.endpoint.clone(),
            })?;
        let chunks: Vec<Value> = serde_json::from_str(chunks)
            .map_err(|e| CrawlError::decode("lap_data chunks", e))?;

        let collection = ctx.collections.sessions.as_str();
        let name = laps_document_name(subsession_id, simsession_number, cust_id);

        let mut laps = get_or_create::<LapsSpec>(ctx.store.as_ref(), collection, LAPS_KIND, &name)
            .await
            .map_err(|e| CrawlError::store("get_or_create", format!("{}/{}", LAPS_KIND, name), e))?;

        let track_id = body
            .session_info
            .and_then(|info| info.track)
            .and_then(|track| track.track_id);

        laps.meta.set_label("subsession_id", subsession_id);
        laps.meta.set_label("simsession_number", simsession_number);
        laps.meta.set_label("cust_id", cust_id);
        laps.meta.set_label_opt("track_id", track_id);
        laps.meta.set_label_opt("car_id", body.car_id);

        let rows = chunks.len();
        laps.spec.data = raw;
        laps.spec.chunks = chunks;

        save(ctx.store.as_ref(), collection, &mut laps)
            .await
            .map_err(|e| CrawlError::store("save", laps.meta.key(), e))?;

        tracing::info!(
            "Saved {} laps for {}/{}/{}",
            rows,
            subsession_id,
            simsession_number,
            cust_id
        );

        Ok(HandlerOutcome {
            document: laps.meta.key(),
            emitted: 0,
            failed: 0,
        })
    }
}
