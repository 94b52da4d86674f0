//! End-to-end behaviour of the timeout layer behind a real listener.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::Redirect;
use axum::{routing::get, Json, Router};
use handler_timeout::http::recovery_layer;
use handler_timeout::timeout::{TimeoutLayer, TimeoutOptions};
use serde_json::{json, Value};

mod common;

const DEFAULT_MSG: &str = r#"{"code": -1, "msg":"http: Handler timeout"}"#;

fn app(timeouts: Arc<AtomicUsize>) -> Router {
    let options = TimeoutOptions::builder()
        .timeout(Duration::from_secs(2))
        .error_status(StatusCode::REQUEST_TIMEOUT)
        .default_msg(DEFAULT_MSG)
        .callback(move |request| {
            assert_eq!(request.uri().path(), "/long");
            timeouts.fetch_add(1, Ordering::SeqCst);
        })
        .skip(|request| request.uri().path() == "/health")
        .build();

    Router::new()
        .route(
            "/short",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Json(json!({"hello": "short"}))
            }),
        )
        .route(
            "/long",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(6)).await;
                Json(json!({"hello": "long"}))
            }),
        )
        .route(
            "/panic",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let divisor = std::hint::black_box(0);
                (100 / divisor).to_string()
            }),
        )
        .route(
            "/health",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                "ok"
            }),
        )
        .route("/a", get(|| async { Json("this is page A") }))
        .route("/b", get(|| async { Redirect::permanent("/a") }))
        .layer(TimeoutLayer::new(options))
        .layer(recovery_layer())
}

#[tokio::test]
async fn test_short_handler_response_is_delivered() {
    let server = common::serve_router(app(Arc::new(AtomicUsize::new(0)))).await;

    let res = common::client().get(server.url("/short")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), r#"{"hello":"short"}"#);
}

#[tokio::test]
async fn test_long_handler_gets_fallback_at_deadline() {
    let timeouts = Arc::new(AtomicUsize::new(0));
    let server = common::serve_router(app(timeouts.clone())).await;

    let start = Instant::now();
    let res = common::client().get(server.url("/long")).send().await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(res.status(), 408);
    assert_eq!(res.text().await.unwrap(), DEFAULT_MSG);
    assert!(elapsed >= Duration::from_secs(2), "answered early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "answered late: {:?}", elapsed);
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_panic_reaches_recovery_layer() {
    let server = common::serve_router(app(Arc::new(AtomicUsize::new(0)))).await;

    let res = common::client().get(server.url("/panic")).send().await.unwrap();
    assert_eq!(res.status(), 500);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], "E003");
    let msg = body["msg"].as_str().unwrap();
    assert!(msg.contains("divide by zero"), "unexpected message: {}", msg);
}

#[tokio::test]
async fn test_skipped_path_ignores_deadline() {
    let timeouts = Arc::new(AtomicUsize::new(0));
    let server = common::serve_router(app(timeouts.clone())).await;

    let start = Instant::now();
    let res = common::client().get(server.url("/health")).send().await.unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "ok");
    assert!(start.elapsed() >= Duration::from_secs(3));
    assert_eq!(timeouts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_redirect_passes_through() {
    let server = common::serve_router(app(Arc::new(AtomicUsize::new(0)))).await;

    let res = common::client().get(server.url("/b")).send().await.unwrap();
    assert_eq!(res.status(), 308);
    assert_eq!(res.headers()["location"], "/a");
}
