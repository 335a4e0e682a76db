//! HTTP routes and handlers

use axum::{
    body::{self, Body},
    extract::{Request, State},
    handler::Handler,
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use thiserror::Error;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::error;

use crate::proxy::{inspect, AppState};

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP: [header::HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HeaderName::from_static("keep-alive"),
];

/// Router of the standalone proxy: everything except the service endpoints is
/// inspected and forwarded to the backend.
pub fn create_router(state: AppState) -> Router {
    let limit = state.config.max_body_bytes;
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .fallback(forward.layer(middleware::from_fn_with_state(state.clone(), inspect)))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(limit))
        .with_state(state)
}

/// Put inspection in front of an in-process application
pub fn protect(app: Router, state: AppState) -> Router {
    app.layer(middleware::from_fn_with_state(state, inspect))
}

async fn health_check() -> &'static str {
    "OK"
}

async fn metrics(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

/// Forward the (already inspected) request to the backend
async fn forward(State(state): State<AppState>, request: Request) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();
    let body = body::to_bytes(body, state.config.max_body_bytes)
        .await
        .map_err(|_| AppError::PayloadTooLarge)?;

    let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let url = format!("{}{}", state.config.backend_url.trim_end_matches('/'), path_and_query);

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);

    let backend = state
        .http_client
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let status = backend.status();
    let mut headers = backend.headers().clone();
    strip_hop_by_hop(&mut headers);
    let body = backend.bytes().await?;

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Error handling
#[derive(Debug, Error)]
enum AppError {
    #[error("request body too large")]
    PayloadTooLarge,

    #[error("backend request failed: {0}")]
    Backend(#[from] reqwest::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Backend(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            AppError::Backend(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            error!(error = %self, "Forwarding failed");
        }

        // Backend details stay in the logs
        let reason = status.canonical_reason().unwrap_or("Error");
        (status, format!("{}\n", reason)).into_response()
    }
}
