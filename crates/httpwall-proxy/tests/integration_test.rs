//! Integration tests for the httpwall proxy

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    routing::{delete, get},
    Router,
};
use httpwall_policy::{LoadMode, RuleSet};
use httpwall_proxy::{create_router, protect, AppState, ProxyConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

const POLICY: &str = r#"
name: integration
settings:
  mode: block
rules:
  - type: restrict_method
    id: read-only-items
    path: "/items.*"
    methods: [GET]
  - type: require_role
    id: admins
    path: "/admin/.*"
    roles: [admin]
  - type: add_header
    id: xfo
    header: X-Frame-Options
    value: DENY
    path: "/admin/.*"
    exceptions: ["/admin/export"]
  - type: detect_outbound_content
    id: stack-traces
    keywords: ["Traceback (most recent call last)"]
"#;

fn state_with(policy: &str, configure: impl FnOnce(&mut ProxyConfig)) -> AppState {
    let mut config = ProxyConfig::default();
    config.identity.enabled = true;
    configure(&mut config);
    let engine = RuleSet::from_yaml(policy)
        .unwrap()
        .compile(LoadMode::Strict)
        .unwrap();
    let handle = PrometheusBuilder::new().build_recorder().handle();
    AppState::with_engine(config, engine, handle).unwrap()
}

fn state() -> AppState {
    state_with(POLICY, |_| {})
}

/// In-process application counting how often it is reached
fn app(hits: Arc<AtomicUsize>) -> Router {
    let counted = move |body: &'static str| {
        let hits = hits.clone();
        move || async move {
            hits.fetch_add(1, Ordering::SeqCst);
            body
        }
    };
    Router::new()
        .route("/admin/users", get(counted("users")))
        .route("/admin/export", get(counted("export")))
        .route("/items", get(counted("items")).delete(counted("deleted")))
        .route("/items/:id", delete(counted("deleted")))
        .route("/crash", get(counted("Traceback (most recent call last): boom")))
        .route("/echo", axum::routing::post(|body: String| async move { body }))
}

fn admin_get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-authenticated-user", "alice")
        .header("x-authenticated-roles", "admin")
        .body(Body::empty())
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_header_injected_on_matching_path() {
    let router = protect(app(Arc::default()), state());

    let response = router.oneshot(admin_get("/admin/users")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    assert_eq!(body_text(response).await, "users");
}

#[tokio::test]
async fn test_exception_path_gets_no_header() {
    let router = protect(app(Arc::default()), state());

    let response = router.oneshot(admin_get("/admin/export")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-frame-options").is_none());
}

#[tokio::test]
async fn test_inbound_block_never_reaches_application() {
    let hits = Arc::new(AtomicUsize::new(0));
    let state = state();
    let router = protect(app(hits.clone()), state.clone());

    let request = Request::builder()
        .method("DELETE")
        .uri("/items")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    let audit = state.audit.lock();
    assert_eq!(audit.len(), 1);
    let event = audit.events().next().unwrap();
    assert_eq!(event.rule_id, "read-only-items");
    assert_eq!(event.method, "DELETE");
    assert_eq!(event.disposition, "block");
    assert!(audit.verify());
}

#[tokio::test]
async fn test_role_check_uses_identity_headers() {
    let state = state();
    let router = protect(app(Arc::default()), state.clone());

    let anonymous = Request::builder()
        .uri("/admin/users")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(anonymous).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!body_text(response).await.contains("logged in"));

    let viewer = Request::builder()
        .uri("/admin/users")
        .header("x-authenticated-user", "bob")
        .header("x-authenticated-roles", "viewer")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(viewer).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    assert_eq!(state.collector.snapshot().blocked_requests, 2);
}

#[tokio::test]
async fn test_block_page_carries_outbound_headers() {
    let router = protect(app(Arc::default()), state());

    let anonymous = |uri: &str| Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(anonymous("/admin/users")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-store");

    let response = router.oneshot(anonymous("/admin/export")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.headers().get("x-frame-options").is_none());
}

#[tokio::test]
async fn test_outbound_detection_replaces_response() {
    let router = protect(app(Arc::default()), state());

    let response = router
        .oneshot(Request::builder().uri("/crash").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!body_text(response).await.contains("Traceback"));
}

#[tokio::test]
async fn test_log_mode_lets_aborts_through() {
    let policy = POLICY.replace("mode: block", "mode: log");
    let state = state_with(&policy, |_| {});
    let hits = Arc::new(AtomicUsize::new(0));
    let router = protect(app(hits.clone()), state.clone());

    let request = Request::builder()
        .method("DELETE")
        .uri("/items")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    let audit = state.audit.lock();
    assert_eq!(audit.events().next().unwrap().disposition, "allow");
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let state = state_with(POLICY, |config| config.max_body_bytes = 8);
    let router = protect(app(Arc::default()), state);

    let request = Request::builder()
        .method("POST")
        .uri("/echo")
        .body(Body::from("this body is far too long"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_request_body_reaches_application_after_inspection() {
    let router = protect(app(Arc::default()), state());

    let request = Request::builder()
        .method("POST")
        .uri("/echo")
        .body(Body::from("hello"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "hello");
}

#[tokio::test]
async fn test_standalone_router_forwards_to_backend() {
    let backend = Router::new().route("/hello", get(|| async { ([("x-backend", "1")], "hi from backend") }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, backend).await.unwrap();
    });

    let state = state_with(POLICY, |config| {
        config.backend_url = format!("http://{}", backend_addr);
    });
    let router = create_router(state);

    let health = router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_text(health).await, "OK");

    let response = router
        .oneshot(Request::builder().uri("/hello").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-backend").unwrap(), "1");
    assert_eq!(body_text(response).await, "hi from backend");
}
