//! HTTP endpoints: beacon ingestion, live tail reads and health.

use crate::capture::{Capture, RequestBuffer};
use crate::core::config::ServerConfig;
use crate::core::types::UNKNOWN_COUNTRY;
use crate::core::{DeviceClass, PerfError, RequestContext};
use crate::live::{LiveFilter, LiveRead, ZERO_CURSOR};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Header carrying the site id of a beacon
pub const SITE_HEADER: &str = "x-perftail-site";

/// Country headers, first match wins
pub const COUNTRY_HEADERS: &[&str] = &["cf-ipcountry", "x-country-code"];

/// Shared handler state.
#[derive(Clone)]
pub struct HttpState {
    pub capture: Arc<Capture>,
    pub default_site: u32,
}

/// Create the router for the configured paths.
pub fn create_http_router(server: &ServerConfig, state: HttpState) -> Router {
    Router::new()
        .route(&server.beacon_path, post(handle_beacon))
        .route(&server.live_path, get(handle_live))
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(tower_http::cors::Any)
                        .allow_methods(tower_http::cors::Any)
                        .allow_headers(tower_http::cors::Any),
                ),
        )
        .with_state(state)
}

/// Derive site, country and device from request headers.
pub fn request_context(headers: &HeaderMap, default_site: u32) -> RequestContext {
    let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);

    let site = text(SITE_HEADER)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default_site);
    let country = COUNTRY_HEADERS
        .iter()
        .filter_map(|h| text(h))
        .find(|v| v.len() == 2 && v.chars().all(|c| c.is_ascii_alphabetic()))
        .map_or_else(|| UNKNOWN_COUNTRY.to_string(), str::to_ascii_uppercase);
    let device = text(header::USER_AGENT.as_str())
        .map_or(DeviceClass::Unknown, DeviceClass::from_user_agent);

    RequestContext { site, country, device }
}

/// Accept one beacon: 202 when taken (or deliberately skipped), 400 when malformed.
async fn handle_beacon(State(state): State<HttpState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let context = request_context(&headers, state.default_site);
    let capture = state.capture.clone();

    let outcome = tokio::task::spawn_blocking(move || {
        let mut buffer = RequestBuffer::new();
        let outcome = capture.ingest(&mut buffer, &body, &context, Utc::now().date_naive());
        if !buffer.is_empty() {
            capture.finish(buffer);
        }
        outcome
    })
    .await;

    match outcome {
        Ok(Ok(outcome)) => {
            tracing::trace!(?outcome, "Beacon accepted");
            StatusCode::ACCEPTED
        },
        Ok(Err(reason)) => {
            tracing::warn!("Rejected malformed beacon: {}", reason);
            StatusCode::BAD_REQUEST
        },
        Err(e) => {
            tracing::error!("Beacon task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        },
    }
}

/// Live tail query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct LiveParams {
    pub index: Option<String>,
    pub filter: Option<String>,
    pub endpoint: Option<String>,
    pub site: Option<String>,
    pub limit: Option<usize>,
}

async fn handle_live(
    State(state): State<HttpState>,
    Query(params): Query<LiveParams>,
) -> std::result::Result<Json<LiveRead>, HttpError> {
    let filter = LiveFilter::parse(params.filter.as_deref(), params.endpoint.as_deref(), params.site.as_deref())
        .map_err(|e| HttpError::BadRequest(e.to_string()))?;
    let cursor = params.index.unwrap_or_else(|| ZERO_CURSOR.to_string());
    let capture = state.capture.clone();

    let read = tokio::task::spawn_blocking(move || capture.live().read(&cursor, &filter, params.limit))
        .await
        .map_err(|e| HttpError::Internal(e.to_string()))?
        .map_err(HttpError::from)?;
    Ok(Json(read))
}

/// Health check endpoint.
async fn health_check(State(state): State<HttpState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "live_available": state.capture.live().available(),
    }))
}

/// HTTP-specific error type.
#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
    Internal(String),
}

impl From<PerfError> for HttpError {
    fn from(err: PerfError) -> Self {
        match err {
            PerfError::Malformed(_) | PerfError::InvalidPattern(_) => HttpError::BadRequest(err.to_string()),
            other => HttpError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            HttpError::Internal(msg) => {
                tracing::error!("Live read failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            },
        };

        let body = Json(serde_json::json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            HttpError::Internal(msg) => write!(f, "Internal Error: {}", msg),
        }
    }
}

impl std::error::Error for HttpError {}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_request_context_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(SITE_HEADER, HeaderValue::from_static("4"));
        headers.insert("cf-ipcountry", HeaderValue::from_static("de"));
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148"),
        );
        let context = request_context(&headers, 1);
        assert_eq!(context.site, 4);
        assert_eq!(context.country, "DE");
        assert_eq!(context.device, DeviceClass::Mobile);
    }

    #[test]
    fn test_request_context_defaults() {
        let mut headers = HeaderMap::new();
        headers.insert(SITE_HEADER, HeaderValue::from_static("nope"));
        headers.insert("x-country-code", HeaderValue::from_static("XX1"));
        let context = request_context(&headers, 9);
        assert_eq!(context.site, 9);
        assert_eq!(context.country, UNKNOWN_COUNTRY);
        assert_eq!(context.device, DeviceClass::Unknown);
    }
}
