//! HTTP surface
//!
//! A thin axum router over the engine: ingest, search, store, clear,
//! health, and container listing. CORS is permissive for local
//! development. Malformed requests get 400 with `{error}`; everything
//! else that fails gets 500.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::error::RecallError;
use crate::types::{
    IngestRequest, IngestResponse, SearchRequest, SearchResponse, Session, StoreRequest,
};

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid tag regex"));

/// Build the application router
pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/containers", get(containers))
        .route("/ingest", post(ingest))
        .route("/search", post(search))
        .route("/store", post(store))
        .route("/clear/:tag", delete(clear))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn error_response(error: RecallError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!(error = %error, "request failed");
    }
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

fn validate_tag(tag: &str) -> Result<(), Response> {
    if TAG_RE.is_match(tag) {
        Ok(())
    } else {
        Err(bad_request(format!("invalid containerTag: {:?}", tag)))
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| bad_request(format!("invalid body: {}", e)))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "provider": "rag" }))
}

async fn containers(State(engine): State<Arc<Engine>>) -> Response {
    match engine.containers().await {
        Ok(tags) => Json(json!({ "containers": tags })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn ingest(State(engine): State<Arc<Engine>>, body: Bytes) -> Response {
    let req: IngestRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if let Err(resp) = validate_tag(&req.container_tag) {
        return resp;
    }
    if req.messages.is_empty() {
        return bad_request("messages must be non-empty".to_string());
    }

    let session = Session {
        session_id: req.session_id,
        turns: req.messages,
        date: req.date,
    };

    match engine.ingest(&req.container_tag, vec![session]).await {
        Ok(ids) => Json(IngestResponse { document_ids: ids }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn search(State(engine): State<Arc<Engine>>, body: Bytes) -> Response {
    let req: SearchRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if let Err(resp) = validate_tag(&req.container_tag) {
        return resp;
    }

    match engine.search(&req.container_tag, &req.query, req.limit).await {
        Ok(results) => Json(SearchResponse { results }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn store(State(engine): State<Arc<Engine>>, body: Bytes) -> Response {
    let req: StoreRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if let Err(resp) = validate_tag(&req.container_tag) {
        return resp;
    }
    if req.text.trim().is_empty() {
        return bad_request("text must be non-empty".to_string());
    }

    match engine.store_text(&req.container_tag, &req.text).await {
        Ok(_) => Json(json!({ "ok": true })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn clear(State(engine): State<Arc<Engine>>, Path(tag): Path<String>) -> Response {
    if let Err(resp) = validate_tag(&tag) {
        return resp;
    }

    match engine.clear(&tag).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => error_response(e),
    }
}
