use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use memrepro::actor::{ActorHost, ActorHostConfig};
use memrepro::fanout::FanOut;
use memrepro::storage::MemoryStoreProvider;
use memrepro::web::{AppState, build_router};
use serde_json::Value;
use tower::ServiceExt;

fn app() -> axum::Router {
    let host = Arc::new(ActorHost::new(
        Arc::new(MemoryStoreProvider::new()),
        ActorHostConfig::new(),
    ));
    let fanout = Arc::new(
        FanOut::new(host.clone()).with_call_timeout(Some(Duration::from_millis(100))),
    );
    build_router(AppState::new(host, fanout))
}

async fn send(app: &axum::Router, method: Method, uri: &str, body: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");

    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("response expected");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should be readable");
    (status, String::from_utf8_lossy(&body).into_owned())
}

fn decode_json(body: &str) -> Value {
    serde_json::from_str(body).expect("body should be valid JSON")
}

#[tokio::test]
async fn fan_out_route_returns_summary_and_responses() {
    let app = app();

    let (status, body) = send(&app, Method::GET, "/put/2", "").await;
    assert_eq!(status, StatusCode::OK);
    let json = decode_json(&body);
    assert_eq!(json["summary"]["numObjects"], 2);
    assert_eq!(json["summary"]["actualChunks"], 2048);
    assert_eq!(json["summary"]["expectedChunks"], 8192);
    assert_eq!(json["summary"]["dataLoadedPercentage"], 25.0);
    assert_eq!(json["summary"]["failures"], 0);
    let responses = json["responses"].as_object().unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses["feed-2021-07-01"]["result"]["kind"], "put");
    assert_eq!(responses["feed-2021-07-01"]["result"]["insertCount"], 1024);

    let (status, body) = send(&app, Method::POST, "/query/2", "").await;
    assert_eq!(status, StatusCode::OK);
    let json = decode_json(&body);
    assert_eq!(
        json["responses"]["feed-2021-07-02"]["result"]["debug"],
        "lineStrings=31744"
    );
}

#[tokio::test]
async fn simple_mode_targets_the_singleton_actor() {
    let app = app();

    let (status, body) = send(&app, Method::GET, "/put", "").await;
    assert_eq!(status, StatusCode::OK);
    let json = decode_json(&body);
    assert_eq!(json["success"], true);
    assert_eq!(json["version"], 1);
    assert_eq!(json["memoryChunks"], 1024);

    let (_, body) = send(&app, Method::POST, "/actors/singleton", r#"{"kind":"query"}"#).await;
    let json = decode_json(&body);
    assert_eq!(json["memoryChunks"], 1024);
    assert_eq!(json["result"]["debug"], "lineStrings=31744");
}

#[tokio::test]
async fn actor_boundary_reports_protocol_failures_in_band() {
    let app = app();

    let (status, body) = send(&app, Method::POST, "/actors/feed-x", r#"{"kind":"zap"}"#).await;
    assert_eq!(status, StatusCode::OK);
    let json = decode_json(&body);
    assert_eq!(json["success"], false);
    assert_eq!(json["side"], "do");
    assert_eq!(json["loadedListCalls"], 1);
    assert!(json.get("memoryChunks").is_none());

    let (status, body) = send(&app, Method::POST, "/actors/feed-x", r#"{"kind":"clear"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decode_json(&body)["result"]["kind"], "clear");
}

#[tokio::test]
async fn unknown_paths_answer_404() {
    let app = app();

    for uri in ["/", "/drop", "/drop/3", "/put/abc", "/put/-1", "/put/2/extra"] {
        let (status, body) = send(&app, Method::GET, uri, "").await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body, "404", "{uri}");
    }
}

#[tokio::test]
async fn unsupported_methods_answer_404() {
    let app = app();

    let cases = [
        (Method::GET, "/actors/feed-2021-07-01"),
        (Method::DELETE, "/actors/feed-2021-07-01"),
        (Method::GET, "/actors/feed-2021-07-01/hang"),
        (Method::PUT, "/put/2"),
        (Method::DELETE, "/query"),
    ];
    for (method, uri) in cases {
        let (status, body) = send(&app, method.clone(), uri, "").await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert_eq!(body, "404", "{method} {uri}");
    }
}

#[tokio::test]
async fn out_of_range_width_answers_400() {
    let app = app();

    for uri in ["/put/0", "/query/31"] {
        let (status, body) = send(&app, Method::GET, uri, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(body.contains("between 1 and 30"), "{uri}: {body}");
    }
}

#[tokio::test]
async fn hang_fan_out_reports_client_timeouts() {
    let app = app();

    let (status, body) = send(&app, Method::GET, "/hang/3", "").await;
    assert_eq!(status, StatusCode::OK);
    let json = decode_json(&body);
    assert_eq!(json["summary"]["failures"], 3);
    assert_eq!(json["responses"]["feed-2021-07-03"]["side"], "client");
}
