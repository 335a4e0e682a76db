//! Latency benchmarks for rule chain evaluation
//!
//! Measures the per-request cost of the inbound and outbound chains of a
//! realistic storefront policy.
//!
//! Run with: cargo bench -p httpwall-policy

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use httpwall_core::{InspectedRequest, RawResponse};
use httpwall_policy::{InterceptingResponse, LoadMode, PolicyEngine, RuleSet};

const POLICY: &str = r#"
name: bench
rules:
  - { type: restrict_method, id: api-methods, path: "/api/.*", methods: [GET, HEAD, POST] }
  - { type: virtual_patch, id: traversal, parameter: file, pattern: "\\.\\./" }
  - { type: add_header, id: xfo, header: X-Frame-Options, value: DENY }
  - { type: add_header, id: nosniff, header: X-Content-Type-Options, value: nosniff }
  - { type: add_cookie_flags, id: cookies }
  - { type: replace_content, id: server-banner, pattern: "Apache/[0-9.]+", replacement: "server", content_type: "text/html.*" }
  - type: detect_outbound_content
    id: leak
    keywords: ["BEGIN RSA PRIVATE KEY", "ORA-00933", "stack trace:"]
"#;

fn engine() -> PolicyEngine {
    RuleSet::from_yaml(POLICY)
        .expect("Failed to parse policy")
        .compile(LoadMode::Strict)
        .expect("Failed to compile policy")
}

fn request(uri: &str) -> InspectedRequest {
    http::Request::builder().uri(uri).body(Bytes::new()).unwrap()
}

fn app_response(body: &Bytes) -> RawResponse {
    http::Response::builder()
        .header("content-type", "text/html; charset=utf-8")
        .header("set-cookie", "session=abc; Path=/")
        .body(body.clone())
        .unwrap()
}

fn benchmark_inbound_chain(c: &mut Criterion) {
    let engine = engine();
    let cases = vec![
        ("clean", "/api/items?file=report.pdf"),
        ("traversal", "/download?file=..%2F..%2Fetc%2Fpasswd"),
    ];

    let mut group = c.benchmark_group("Inbound_Chain");
    for (name, uri) in cases {
        let request = request(uri);
        group.bench_with_input(BenchmarkId::new("evaluate", name), &request, |b, request| {
            b.iter(|| {
                let mut raw = RawResponse::new(Bytes::new());
                black_box(engine.evaluate_inbound(black_box(request), &mut raw))
            });
        });
    }
    group.finish();
}

fn benchmark_outbound_chain(c: &mut Criterion) {
    let engine = engine();
    let request = request("/products/42");

    let mut group = c.benchmark_group("Outbound_Chain");
    for size in [1024usize, 16 * 1024, 256 * 1024] {
        let body = Bytes::from("<p>Powered by Apache/2.4.1</p>".repeat(size / 30 + 1));
        group.bench_with_input(BenchmarkId::new("evaluate", size), &body, |b, body| {
            b.iter(|| {
                let intercepted = InterceptingResponse::capture(app_response(body));
                let mut raw = RawResponse::new(Bytes::new());
                black_box(engine.evaluate_outbound(&request, intercepted, &mut raw))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_inbound_chain, benchmark_outbound_chain);
criterion_main!(benches);
