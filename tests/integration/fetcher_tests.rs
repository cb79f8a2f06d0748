//! Integration tests for the API fetcher
//!
//! These tests run the request-issuing side against a wiremock server,
//! including chunk reassembly over HTTP.

use grid_crawl::bus::{Endpoint, FetchRequest, FetchResponse, SqliteQueue, Topic};
use grid_crawl::config::ApiConfig;
use grid_crawl::crawler::{ApiClient, ChunkReassembler, RequestFetcher};
use grid_crawl::CrawlError;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api_config(base_url: &str) -> ApiConfig {
    ApiConfig {
        base_url: base_url.to_string(),
        auth_token: Some("secret".to_string()),
        timeout_secs: 5,
        max_concurrent_chunks: 3,
    }
}

fn fetcher(server: &MockServer) -> (RequestFetcher, Arc<SqliteQueue>, Topic) {
    let config = api_config(&server.uri());
    let queue = Arc::new(SqliteQueue::open_in_memory(Duration::from_secs(60)).unwrap());
    let responses = queue.topic("api-res");
    let fetcher = RequestFetcher::new(
        Arc::new(ApiClient::new(&config).unwrap()),
        ChunkReassembler::new(config.max_concurrent_chunks),
        Arc::new(responses.clone()),
    );
    (fetcher, queue, responses)
}

fn published_response(queue: &SqliteQueue) -> FetchResponse {
    let delivery = queue
        .claim("api-res")
        .unwrap()
        .expect("a response should have been published");
    FetchResponse::from_payload(&delivery.payload).unwrap()
}

#[tokio::test]
async fn test_fetch_sends_params_and_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data/results/get"))
        .and(query_param("subsession_id", "101"))
        .and(query_param("include_licenses", "false"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"subsession_id":101}"#))
        .expect(1)
        .mount(&server)
        .await;

    let (fetcher, queue, _) = fetcher(&server);
    let request = FetchRequest::new(
        Endpoint::ResultsGet,
        [("subsession_id", "101"), ("include_licenses", "false")],
    );

    fetcher.handle(&request).await.unwrap();

    let response = published_response(&queue);
    assert_eq!(response.endpoint, "results_get");
    assert_eq!(response.params, request.params);
    assert_eq!(response.body, r#"{"subsession_id":101}"#);
    assert_eq!(response.chunks, None);
}

#[tokio::test]
async fn test_chunks_are_reassembled_in_page_order() {
    let server = MockServer::start().await;

    let body = json!({
        "success": true,
        "session_info": {"subsession_id": 101},
        "chunk_info": {
            "chunk_size": 2,
            "num_chunks": 3,
            "rows": 5,
            "base_download_url": format!("{}/chunks/", server.uri()),
            "chunk_file_names": ["p0.json", "p1.json", "p2.json"]
        }
    });

    Mock::given(method("GET"))
        .and(path("/data/results/lap_data"))
        .and(query_param("cust_id", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    // The first page is the slowest to arrive
    for (index, rows, delay) in [
        (0, json!([{"lap": 1}, {"lap": 2}]), 150),
        (1, json!([{"lap": 3}, {"lap": 4}]), 50),
        (2, json!([{"lap": 5}]), 0),
    ] {
        Mock::given(method("GET"))
            .and(path(format!("/chunks/p{}.json", index)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(rows)
                    .set_delay(Duration::from_millis(delay)),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let (fetcher, queue, _) = fetcher(&server);
    let request = FetchRequest::new(
        Endpoint::LapData,
        [
            ("subsession_id", "101"),
            ("simsession_number", "0"),
            ("cust_id", "7"),
        ],
    )
    .with_chunks();

    fetcher.handle(&request).await.unwrap();

    let response = published_response(&queue);
    let chunks: Vec<Value> = serde_json::from_str(response.chunks.as_deref().unwrap()).unwrap();
    let laps: Vec<_> = chunks.iter().map(|row| row["lap"].as_i64().unwrap()).collect();
    assert_eq!(laps, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_body_without_chunk_info_gives_empty_chunks() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data/results/lap_data"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"chunk_info":null}"#))
        .mount(&server)
        .await;

    let (fetcher, queue, _) = fetcher(&server);
    let request = FetchRequest::new(Endpoint::LapData, [("cust_id", "7")]).with_chunks();

    fetcher.handle(&request).await.unwrap();

    assert_eq!(published_response(&queue).chunks.as_deref(), Some("[]"));
}

#[tokio::test]
async fn test_failed_chunk_page_publishes_nothing() {
    let server = MockServer::start().await;

    let body = json!({
        "chunk_info": {
            "num_chunks": 2,
            "base_download_url": format!("{}/chunks/", server.uri()),
            "chunk_file_names": ["p0.json", "p1.json"]
        }
    });

    Mock::given(method("GET"))
        .and(path("/data/results/lap_data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chunks/p0.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"lap": 1}])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chunks/p1.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (fetcher, queue, _) = fetcher(&server);
    let request = FetchRequest::new(Endpoint::LapData, [("cust_id", "7")]).with_chunks();

    let result = fetcher.handle(&request).await;

    assert!(matches!(result, Err(CrawlError::HttpStatus { status: 503, .. })));
    assert!(queue.pending_counts().unwrap().is_empty());
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data/league/season_sessions"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (fetcher, queue, _) = fetcher(&server);
    let request = FetchRequest::new(
        Endpoint::LeagueSeasonSessions,
        [("league_id", "5"), ("season_id", "9")],
    );

    let result = fetcher.handle(&request).await;

    match result {
        Err(e @ CrawlError::HttpStatus { status: 401, .. }) => assert!(e.is_retryable()),
        other => panic!("expected HTTP 401, got {:?}", other),
    }
    assert!(queue.pending_counts().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_endpoint_is_rejected() {
    let server = MockServer::start().await;
    let (fetcher, _, _) = fetcher(&server);

    let request = FetchRequest {
        endpoint: "member_info".to_string(),
        params: Default::default(),
        wants_chunks: false,
    };

    let result = fetcher.handle(&request).await;
    assert!(matches!(result, Err(CrawlError::UnknownEndpoint(ref e)) if e == "member_info"));
}
