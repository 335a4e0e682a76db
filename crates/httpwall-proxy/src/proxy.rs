//! Core proxy logic

use anyhow::Result;
use axum::{
    body::{self, Body},
    extract::{Request, State},
    http::{header::CONTENT_LENGTH, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use httpwall_core::{CurrentUser, InspectedRequest, RawResponse, SessionUser};
use httpwall_policy::{ChainResult, InterceptingResponse, Phase, PolicyEngine, RuleSet, Verdict};
use httpwall_telemetry::{AuditTrail, MetricsCollector};
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{IdentityConfig, ProxyConfig};

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<ProxyConfig>,

    /// Compiled inbound and outbound chains
    pub engine: Arc<PolicyEngine>,

    /// HTTP client for backend requests
    pub http_client: reqwest::Client,

    /// Prometheus metrics handle for rendering
    pub metrics_handle: PrometheusHandle,

    /// Counters over chain runs
    pub collector: MetricsCollector,

    /// Record of every policy abort
    pub audit: Arc<Mutex<AuditTrail>>,
}

impl AppState {
    /// Initialize application state from configuration
    pub fn new(config: ProxyConfig, metrics_handle: PrometheusHandle) -> Result<Self> {
        let engine = Self::load_policy_engine(&config)?;
        Self::with_engine(config, engine, metrics_handle)
    }

    /// Build state around an already compiled engine
    pub fn with_engine(config: ProxyConfig, engine: PolicyEngine, metrics_handle: PrometheusHandle) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.backend_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let audit = AuditTrail::bounded(config.audit_capacity);

        Ok(Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
            http_client,
            metrics_handle,
            collector: MetricsCollector::new(),
            audit: Arc::new(Mutex::new(audit)),
        })
    }

    /// Load policy engine from configuration
    fn load_policy_engine(config: &ProxyConfig) -> Result<PolicyEngine> {
        let policy_path = Path::new(&config.policy_path);
        if !policy_path.exists() {
            warn!("Policy path does not exist, using empty policy engine: {}", config.policy_path);
            return Ok(PolicyEngine::empty());
        }

        let rule_set = RuleSet::from_file(policy_path)?;
        let engine = rule_set.compile(config.load_mode)?;
        info!(
            "Loaded policy '{}' with {} rules from: {}",
            rule_set.name,
            engine.rule_count(),
            config.policy_path
        );
        Ok(engine)
    }
}

/// Turn gateway identity headers into the request's user
pub fn identify(headers: &HeaderMap, identity: &IdentityConfig) -> SessionUser {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    match header(&identity.user_header) {
        Some(name) => {
            let roles = header(&identity.roles_header)
                .map(|roles| {
                    roles
                        .split(',')
                        .map(str::trim)
                        .filter(|r| !r.is_empty())
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            SessionUser::logged_in(name, roles)
        }
        None => SessionUser::anonymous(),
    }
}

/// Copy of the request kept for the outbound chain once the original has
/// been handed to the application
fn snapshot(request: &InspectedRequest) -> InspectedRequest {
    let mut copy = http::Request::new(request.body().clone());
    *copy.method_mut() = request.method().clone();
    *copy.uri_mut() = request.uri().clone();
    *copy.version_mut() = request.version();
    *copy.headers_mut() = request.headers().clone();
    if let Some(user) = request.extensions().get::<CurrentUser>() {
        copy.extensions_mut().insert(user.clone());
    }
    copy
}

/// Inspection middleware: inbound chain, application, outbound chain
pub async fn inspect(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.collector.record_request();
    metrics::counter!("httpwall_requests_total").increment(1);
    let request_id = uuid::Uuid::new_v4().to_string();

    let (mut parts, body) = request.into_parts();
    let body = match body::to_bytes(body, state.config.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            debug!(request_id = %request_id, error = %e, "Request body rejected");
            state.collector.record_blocked();
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };
    if state.config.identity.enabled {
        let user = identify(&parts.headers, &state.config.identity);
        parts.extensions.insert(CurrentUser::new(user));
    }
    let inspected: InspectedRequest = http::Request::from_parts(parts, body);

    // Inbound header writes land here and form the base of the final response
    let mut raw = RawResponse::new(Bytes::new());
    let inbound = state.engine.evaluate_inbound(&inspected, &mut raw);
    if let Some(response) = enforce(&state, &request_id, &inspected, Phase::Inbound, &inbound, raw.headers()) {
        return response;
    }
    let inbound_headers = raw.headers().clone();

    let kept = snapshot(&inspected);
    let (parts, body) = inspected.into_parts();
    let response = next.run(Request::from_parts(parts, Body::from(body))).await;

    let (parts, body) = response.into_parts();
    let body = match body::to_bytes(body, state.config.max_response_bytes).await {
        Ok(body) => body,
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Application response could not be buffered");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };
    let intercepted = InterceptingResponse::capture(http::Response::from_parts(parts, body));
    let outbound = state.engine.evaluate_outbound(&kept, intercepted, &mut raw);
    if let Some(response) = enforce(&state, &request_id, &kept, Phase::Outbound, &outbound, &inbound_headers) {
        return response;
    }

    // The body may have been rewritten
    raw.headers_mut().remove(CONTENT_LENGTH);
    raw.map(Body::from)
}

/// Resolve a chain result; `Some` replaces the application's response.
///
/// `committed` holds the headers the inbound chain wrote before the abort.
fn enforce(
    state: &AppState,
    request_id: &str,
    request: &InspectedRequest,
    phase: Phase,
    result: &ChainResult,
    committed: &HeaderMap,
) -> Option<Response> {
    state.collector.record_chain(result);
    if result.is_allowed() {
        return None;
    }

    let verdict = state.engine.enforcer().resolve(result);
    let path = request.uri().path();
    warn!(
        request_id = %request_id,
        phase = %phase,
        rule = ?result.aborted_by(),
        path = %path,
        verdict = verdict.label(),
        "Policy abort"
    );
    state.audit.lock().record_abort(
        request_id,
        request.method().as_str(),
        path,
        result,
        verdict.label(),
    );

    match verdict {
        Verdict::Allow => None,
        verdict => {
            state.collector.record_blocked();
            verdict
                .into_response()
                .map(|page| decorate(state, request_id, request, committed, page))
        }
    }
}

/// Run a block page through the outbound chain on top of the inbound
/// writes, so header rules cover it like any other response. An abort
/// here keeps the page as committed.
fn decorate(
    state: &AppState,
    request_id: &str,
    request: &InspectedRequest,
    committed: &HeaderMap,
    page: RawResponse,
) -> Response {
    let mut raw = RawResponse::new(Bytes::new());
    *raw.headers_mut() = committed.clone();

    let result = state
        .engine
        .evaluate_outbound(request, InterceptingResponse::capture(page), &mut raw);
    if let Some(rule) = result.aborted_by() {
        debug!(request_id = %request_id, rule = %rule, "Outbound rule aborted on a block page");
    }

    raw.headers_mut().remove(CONTENT_LENGTH);
    raw.map(Body::from)
}
