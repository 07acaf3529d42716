//! HTTP surface: `/scrape` (emails or businesses) and `/health`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header::RETRY_AFTER},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use harvest_common::{ErrorKind, ExtractionTarget, HarvestError};
use harvest_web::Orchestrator;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::rate::{RateKey, RateLimit};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub limiter: Arc<dyn RateLimit>,
}

pub fn router(state: AppState) -> Router {
    let scrape = Router::new()
        .route("/scrape", get(scrape_businesses).post(scrape_emails))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/health", get(health))
        .merge(scrape)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Default, Deserialize)]
struct KeywordQuery {
    keyword: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UrlParams {
    url: Option<String>,
}

async fn scrape_businesses(
    State(state): State<AppState>,
    Query(query): Query<KeywordQuery>,
) -> Response {
    let target = match ExtractionTarget::keyword(query.keyword.as_deref().unwrap_or_default()) {
        Ok(target) => target,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.detail()),
    };
    respond(state.orchestrator.run(&target).await)
}

async fn scrape_emails(
    State(state): State<AppState>,
    Query(query): Query<UrlParams>,
    body: Bytes,
) -> Response {
    let from_body = serde_json::from_slice::<UrlParams>(&body)
        .ok()
        .and_then(|params| params.url);
    let raw = from_body.or(query.url).unwrap_or_default();
    if raw.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "URL is required");
    }
    let target = match ExtractionTarget::url(&raw) {
        Ok(target) => target,
        Err(err) => {
            tracing::debug!(target: "harvest.server", url = %raw, error = %err, "scrape.invalid_url");
            return error_response(StatusCode::BAD_REQUEST, "Invalid URL");
        }
    };
    respond(state.orchestrator.run(&target).await)
}

fn respond(result: harvest_common::ExtractionResult) -> Response {
    match result {
        Ok(extraction) => Json(extraction).into_response(),
        Err(err) => {
            let status = status_for(&err);
            if status.is_server_error() {
                tracing::warn!(target: "harvest.server", kind = ?err.kind(), error = %err, "scrape.failed");
            }
            error_response(status, &err.to_string())
        }
    }
}

pub fn status_for(err: &HarvestError) -> StatusCode {
    match err.kind() {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::PolicyDenied => StatusCode::FORBIDDEN,
        ErrorKind::ControlNotFound | ErrorKind::FetchFailed => StatusCode::BAD_GATEWAY,
        ErrorKind::Blocked => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer);
    if state.limiter.try_acquire(&key) {
        return next.run(request).await;
    }

    tracing::info!(target: "harvest.server", client = %key.0, "rate.limited");
    let mut response = error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
    let secs = state.limiter.retry_after().as_secs().max(1);
    if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
        response.headers_mut().insert(RETRY_AFTER, value);
    }
    response
}

/// Client identity: first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer.
fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> RateKey {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let key = header("x-forwarded-for")
        .or_else(|| header("x-real-ip"))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    RateKey(key)
}
