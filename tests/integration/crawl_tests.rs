//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the remote API and run the full
//! crawl loop end-to-end over an in-memory queue and document store.

use grid_crawl::bus::SqliteQueue;
use grid_crawl::config::{ApiConfig, BusConfig, Config, StoreConfig};
use grid_crawl::crawler::Coordinator;
use grid_crawl::processing::{LapsSpec, SeasonSpec, SessionSpec};
use grid_crawl::storage::{Document, DocumentStore, SqliteDocumentStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing at the mock API
fn create_test_config(base_url: &str) -> Config {
    Config {
        api: ApiConfig {
            base_url: base_url.to_string(),
            auth_token: Some("test-token".to_string()),
            timeout_secs: 5,
            max_concurrent_chunks: 2,
        },
        store: StoreConfig {
            database_path: ":memory:".to_string(),
            session_collection: "sessions".to_string(),
            season_collection: "seasons".to_string(),
        },
        bus: BusConfig {
            database_path: ":memory:".to_string(),
            request_topic: "api-req".to_string(),
            response_topic: "api-res".to_string(),
            max_in_flight: 4,
            poll_interval_ms: 10,
            retry_delay_ms: 60_000,
        },
    }
}

struct Harness {
    coordinator: Coordinator,
    store: Arc<SqliteDocumentStore>,
    queue: Arc<SqliteQueue>,
}

fn harness(server: &MockServer) -> Harness {
    let store = Arc::new(SqliteDocumentStore::open_in_memory().unwrap());
    let queue = Arc::new(SqliteQueue::open_in_memory(Duration::from_secs(60)).unwrap());
    let coordinator = Coordinator::with_backends(
        create_test_config(&server.uri()),
        store.clone(),
        queue.clone(),
    );
    Harness {
        coordinator,
        store,
        queue,
    }
}

async fn mount_season(server: &MockServer, subsessions: &[i64], expected_calls: u64) {
    let sessions: Vec<_> = subsessions
        .iter()
        .map(|id| {
            json!({
                "subsession_id": id,
                "launch_at": "2024-03-01T19:00:00Z",
                "track": {"track_id": 341, "track_name": "Spa"}
            })
        })
        .collect();

    Mock::given(method("GET"))
        .and(path("/data/league/season_sessions"))
        .and(query_param("league_id", "5"))
        .and(query_param("season_id", "9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "league_id": 5,
            "season_id": 9,
            "sessions": sessions
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

/// Each subsession has one race sim-session with two drivers
async fn mount_results(server: &MockServer, subsession_id: i64) {
    Mock::given(method("GET"))
        .and(path("/data/results/get"))
        .and(query_param("subsession_id", subsession_id.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "subsession_id": subsession_id,
            "league_id": 5,
            "season_id": 9,
            "track": {"track_id": 341},
            "session_results": [
                {"simsession_number": 0, "results": [{"cust_id": 11}, {"cust_id": 12}]}
            ]
        })))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_laps(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/data/results/lap_data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "session_info": {"track": {"track_id": 341}},
            "car_id": 132,
            "chunk_info": {
                "num_chunks": 2,
                "base_download_url": format!("{}/chunks/", server.uri()),
                "chunk_file_names": ["a.json", "b.json"]
            }
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/chunks/a.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"lap_number": 1}])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/chunks/b.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"lap_number": 2}])))
        .mount(server)
        .await;
}

async fn read<S: serde::de::DeserializeOwned>(
    store: &SqliteDocumentStore,
    collection: &str,
    kind: &str,
    name: &str,
) -> Document<S> {
    store
        .read_one(collection, kind, name)
        .await
        .unwrap_or_else(|e| panic!("{}/{} should exist: {}", kind, name, e))
        .decode()
        .unwrap()
}

#[tokio::test]
async fn test_full_crawl_of_a_league_season() {
    let server = MockServer::start().await;
    mount_season(&server, &[101, 102], 1).await;
    mount_results(&server, 101).await;
    mount_results(&server, 102).await;
    mount_laps(&server).await;

    let h = harness(&server);
    h.coordinator.seed(5, 9).await.unwrap();

    // 1 season + 2 results + 4 laps requests, each with its response
    let processed = h.coordinator.drain().await.unwrap();
    assert_eq!(processed, 14);

    let season: Document<SeasonSpec> = read(&h.store, "seasons", "season", "league_5_season_9").await;
    assert_eq!(season.meta.version, 1);
    let ids: Vec<_> = season.spec.parsed_sessions.keys().cloned().collect();
    assert_eq!(ids, vec!["101", "102"]);
    assert_eq!(season.spec.parsed_sessions["102"].track_id, Some(341));

    let session: Document<SessionSpec> = read(&h.store, "sessions", "session", "session_101").await;
    assert_eq!(session.meta.version, 1);
    assert_eq!(session.meta.labels["league_id"], json!(5));

    let laps: Document<LapsSpec> = read(&h.store, "sessions", "laps", "laps_102_0_12").await;
    assert_eq!(laps.meta.version, 1);
    assert_eq!(laps.meta.labels["car_id"], json!(132));
    assert_eq!(laps.spec.chunks, vec![json!({"lap_number": 1}), json!({"lap_number": 2})]);

    let stats = h.coordinator.stats().unwrap();
    assert_eq!(
        stats.documents,
        vec![
            ("seasons".to_string(), "season".to_string(), 1),
            ("sessions".to_string(), "laps".to_string(), 4),
            ("sessions".to_string(), "session".to_string(), 2),
        ]
    );
    assert!(stats.queues.is_empty());
}

#[tokio::test]
async fn test_recrawl_only_fetches_new_subsessions() {
    let server = MockServer::start().await;
    mount_season(&server, &[101], 1).await;
    mount_results(&server, 101).await;
    mount_laps(&server).await;

    let h = harness(&server);
    h.coordinator.seed(5, 9).await.unwrap();
    h.coordinator.drain().await.unwrap();

    // The season now lists a second subsession
    server.reset().await;
    mount_season(&server, &[101, 102], 1).await;
    mount_results(&server, 102).await;
    mount_laps(&server).await;

    h.coordinator.seed(5, 9).await.unwrap();
    h.coordinator.drain().await.unwrap();
    assert!(h.queue.pending_counts().unwrap().is_empty());

    let season: Document<SeasonSpec> = read(&h.store, "seasons", "season", "league_5_season_9").await;
    assert_eq!(season.meta.version, 2);
    assert_eq!(season.spec.parsed_sessions.len(), 2);

    // Session 101 was not fetched again
    let session: Document<SessionSpec> = read(&h.store, "sessions", "session", "session_101").await;
    assert_eq!(session.meta.version, 1);
    let session: Document<SessionSpec> = read(&h.store, "sessions", "session", "session_102").await;
    assert_eq!(session.meta.version, 1);
}

#[tokio::test]
async fn test_failing_api_call_stays_queued() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data/league/season_sessions"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server);
    h.coordinator.seed(5, 9).await.unwrap();

    let processed = h.coordinator.drain().await.unwrap();

    assert_eq!(processed, 1);
    assert!(h.coordinator.stats().unwrap().documents.is_empty());
    assert_eq!(
        h.queue.pending_counts().unwrap(),
        vec![("api-req".to_string(), 1)]
    );
}
