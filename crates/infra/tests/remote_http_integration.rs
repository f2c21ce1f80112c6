//! HTTP mutation client and engine against a mock remote
//!
//! Covers the wire contract (path, idempotency header, JSON body), status
//! classification and a full capture-then-replay cycle through the engine.

use std::time::Duration;

use offsync_core::RemoteMutationApi;
use offsync_domain::constants::IDEMPOTENCY_KEY_HEADER;
use offsync_domain::{ActionType, Config, ErrorClass, RemoteError, SessionEnd, StorageBackend};
use offsync_infra::{Engine, HttpClient, HttpMutationClient};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> HttpMutationClient {
    let http = HttpClient::builder().timeout(Duration::from_secs(5)).build().unwrap();
    HttpMutationClient::new(http, server.uri())
}

async fn apply_with_status(status: u16) -> Result<offsync_core::RemoteAck, RemoteError> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status).set_body_string("upstream says no"))
        .mount(&server)
        .await;

    client_for(&server).apply("key-1", &ActionType::new("update_record"), &json!({})).await
}

#[tokio::test]
async fn posts_payload_with_idempotency_key() {
    let server = MockServer::start().await;
    let payload = json!({ "id": "rec-9", "fields": { "status": "closed" } });

    Mock::given(method("POST"))
        .and(path("/actions/update_record"))
        .and(header(IDEMPOTENCY_KEY_HEADER, "0190-key"))
        .and(body_json(payload.clone()))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": "srv-42", "replayed": false })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let ack = client_for(&server)
        .apply("0190-key", &ActionType::new("update_record"), &payload)
        .await
        .expect("2xx should be accepted");

    assert_eq!(ack.remote_id.as_deref(), Some("srv-42"));
    assert!(!ack.replayed);
}

#[tokio::test]
async fn base_url_trailing_slash_is_ignored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/actions/create_record"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let http = HttpClient::new().unwrap();
    let client = HttpMutationClient::new(http, format!("{}/", server.uri()));
    client.apply("k", &ActionType::new("create_record"), &json!({})).await.unwrap();
}

#[tokio::test]
async fn replayed_acknowledgement_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "replayed": true })))
        .mount(&server)
        .await;

    let ack = client_for(&server)
        .apply("dup", &ActionType::new("create_record"), &json!({ "title": "x" }))
        .await
        .unwrap();
    assert!(ack.replayed);
    assert_eq!(ack.remote_id, None);
}

#[tokio::test]
async fn empty_success_body_is_accepted() {
    let ack = apply_with_status(204).await.expect("204 should be accepted");
    assert_eq!(ack.remote_id, None);
    assert!(!ack.replayed);
}

#[tokio::test]
async fn server_errors_and_throttling_are_transient() {
    for status in [500, 502, 503, 429, 408] {
        let err = apply_with_status(status).await.expect_err("status should fail");
        assert_eq!(err.class(), ErrorClass::Transient, "status {status}");
    }
}

#[tokio::test]
async fn rejections_are_permanent_and_keep_the_body() {
    for status in [400, 404, 409, 422] {
        let err = apply_with_status(status).await.expect_err("status should fail");
        assert_eq!(err.class(), ErrorClass::Permanent, "status {status}");
        assert!(err.to_string().contains("upstream says no"), "{err}");
    }
}

#[tokio::test]
async fn refused_connection_is_transient() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let http = HttpClient::builder().timeout(Duration::from_secs(2)).build().unwrap();
    let client = HttpMutationClient::new(http, format!("http://127.0.0.1:{port}"));

    let err = client
        .apply("k", &ActionType::new("create_record"), &json!({}))
        .await
        .expect_err("nothing is listening");
    assert_eq!(err.class(), ErrorClass::Transient);
}

#[tokio::test]
async fn slow_remote_times_out_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let http = HttpClient::builder().timeout(Duration::from_millis(200)).build().unwrap();
    let client = HttpMutationClient::new(http, server.uri());

    let err = client
        .apply("k", &ActionType::new("create_record"), &json!({}))
        .await
        .expect_err("request should time out");
    assert_eq!(err.class(), ErrorClass::Transient);
}

fn engine_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.storage.backend = StorageBackend::Memory;
    config.remote.base_url = server.uri();
    config.remote.probe_interval_secs = 0;
    config.sync.auto_sync_interval_secs = 0;
    config
}

#[tokio::test]
async fn engine_replays_captured_actions_once_online() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let engine = Engine::builder(engine_config(&server)).initially_online(false).build().await.unwrap();

    let mut ids = Vec::new();
    for (kind, payload) in [
        ("create_record", json!({ "title": "Valve check" })),
        ("update_record", json!({ "id": "rec-1", "status": "done" })),
        ("upload_blob", json!({ "name": "meter.jpg" })),
    ] {
        ids.push(engine.enqueue(ActionType::new(kind), payload).await.unwrap());
    }

    let offline = engine.drain().await;
    assert_eq!(offline.end, Some(SessionEnd::WentOffline));
    assert!(server.received_requests().await.unwrap().is_empty());

    engine.set_network_reachable(true);
    let session = engine.drain().await;
    assert_eq!(session.end, Some(SessionEnd::Drained));
    assert_eq!(session.succeeded, ids);
    assert_eq!(engine.summary().await.total, 0);

    let requests = server.received_requests().await.unwrap();
    let keys: Vec<String> = requests
        .iter()
        .map(|request| {
            request.headers.get(IDEMPOTENCY_KEY_HEADER).unwrap().to_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(keys, ids);
    let paths: Vec<&str> = requests.iter().map(|request| request.url.path()).collect();
    assert_eq!(paths, ["/actions/create_record", "/actions/update_record", "/actions/upload_blob"]);
}

#[tokio::test]
async fn engine_dead_letters_rejected_action_and_continues() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/actions/create_record"))
        .respond_with(ResponseTemplate::new(422).set_body_string("title is required"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/actions/update_record"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let engine = Engine::builder(engine_config(&server)).initially_online(true).build().await.unwrap();
    let rejected = engine.enqueue(ActionType::new("create_record"), json!({})).await.unwrap();
    let accepted =
        engine.enqueue(ActionType::new("update_record"), json!({ "id": "rec-2" })).await.unwrap();

    let session = engine.drain().await;
    assert_eq!(session.end, Some(SessionEnd::Drained));
    assert_eq!(session.failed_permanent, vec![rejected.clone()]);
    assert_eq!(session.succeeded, vec![accepted]);

    let dead = engine.queue().get(&rejected).await.unwrap();
    assert!(dead.is_dead_letter());
    assert!(dead.last_error.unwrap().contains("422"));
}

#[tokio::test]
async fn engine_start_is_idempotent_with_probe_enabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut config = engine_config(&server);
    config.remote.probe_interval_secs = 1;
    let mut engine = Engine::builder(config).build().await.unwrap();

    engine.start().await.unwrap();
    engine.start().await.unwrap();
    assert!(engine.is_running());

    engine.stop().await.unwrap();
    assert!(!engine.is_running());
}
