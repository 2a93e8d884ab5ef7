//! HTTP surface tests
//!
//! Exercise the axum router directly with `tower::ServiceExt::oneshot`,
//! no listener needed.

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use common::{build_engine, test_config, StubChat};
use recall::server::router;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn app(dir: &TempDir) -> axum::Router {
    let chat = StubChat::new();
    chat.set_extraction(
        "MEMORIES:\nUser loves hiking in the Alps.\nENTITIES:\nAlps | location | mountains",
    );
    router(Arc::new(build_engine(test_config(dir), chat)))
}

#[tokio::test]
async fn health_reports_provider() {
    let dir = TempDir::new().unwrap();
    let response = app(&dir)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body, json!({"ok": true, "provider": "rag"}));
}

#[tokio::test]
async fn ingest_then_search_over_http() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);

    let response = app
        .clone()
        .oneshot(post(
            "/ingest",
            json!({
                "containerTag": "alice",
                "sessionId": "s1",
                "messages": [{"role": "user", "content": "I love hiking in the Alps"}],
                "date": "2026-02-23"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["documentIds"][0], "alice_s1_0");

    let response = app
        .clone()
        .oneshot(post(
            "/search",
            json!({"containerTag": "alice", "query": "Alps hiking"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let results = body["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0]["type"], "chunk");
    assert!(results[0]["content"].as_str().unwrap().contains("Alps"));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/containers")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["containers"], json!(["alice"]));
}

#[tokio::test]
async fn empty_messages_rejected() {
    let dir = TempDir::new().unwrap();
    let response = app(&dir)
        .oneshot(post(
            "/ingest",
            json!({"containerTag": "alice", "sessionId": "s1", "messages": []}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("messages"));
}

#[tokio::test]
async fn malformed_body_rejected() {
    let dir = TempDir::new().unwrap();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/search")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{ nope"))
        .unwrap();
    let response = app(&dir).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());
}

#[tokio::test]
async fn invalid_tag_rejected() {
    let dir = TempDir::new().unwrap();
    let response = app(&dir)
        .oneshot(post(
            "/search",
            json!({"containerTag": "no spaces allowed", "query": "x"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn search_unknown_container_is_empty_200() {
    let dir = TempDir::new().unwrap();
    let response = app(&dir)
        .oneshot(post(
            "/search",
            json!({"containerTag": "ghost", "query": "anything"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"results": []}));
}

#[tokio::test]
async fn store_and_clear() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir);

    let response = app
        .clone()
        .oneshot(post(
            "/store",
            json!({"containerTag": "notes", "text": "remember the milk"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"ok": true}));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/clear/notes")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"ok": true}));

    let response = app
        .oneshot(post(
            "/search",
            json!({"containerTag": "notes", "query": "milk"}),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!({"results": []}));
}
