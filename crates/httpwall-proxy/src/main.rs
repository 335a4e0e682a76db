//! httpwall Proxy
//!
//! Reverse proxy enforcing a rule set in front of an HTTP application.

use anyhow::Result;
use clap::Parser;
use httpwall_policy::LoadMode;
use httpwall_proxy::{create_router, AppState, Overrides, ProxyConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "httpwall-proxy")]
#[command(about = "httpwall request/response inspection proxy", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HTTPWALL_CONFIG", default_value = "httpwall.yaml")]
    config: String,

    /// Backend application URL
    #[arg(short, long, env = "HTTPWALL_BACKEND_URL")]
    backend: Option<String>,

    /// Rule set file
    #[arg(short, long, env = "HTTPWALL_POLICY")]
    policy: Option<String>,

    /// Listen address
    #[arg(short = 'l', long, env = "HTTPWALL_LISTEN")]
    listen: Option<String>,

    /// Listen port
    #[arg(short = 'P', long, env = "HTTPWALL_PORT")]
    port: Option<u16>,

    /// Largest request body buffered for inspection
    #[arg(long, env = "HTTPWALL_MAX_BODY_BYTES")]
    max_body_bytes: Option<usize>,

    /// Skip invalid rules instead of refusing to start
    #[arg(long, env = "HTTPWALL_LENIENT")]
    lenient: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            listen: self.listen.clone(),
            port: self.port,
            backend_url: self.backend.clone(),
            policy_path: self.policy.clone(),
            max_body_bytes: self.max_body_bytes,
            load_mode: self.lenient.then_some(LoadMode::Lenient),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    info!("Starting httpwall proxy");

    let config = ProxyConfig::load(&cli.config, &cli.overrides())?;
    info!("Configuration loaded successfully");
    info!("Backend: {}", config.backend_url);
    info!("Policy: {}", config.policy_path);

    let metrics_handle = init_metrics()?;

    let addr = config.socket_addr()?;
    let state = AppState::new(config, metrics_handle)?;
    let audit = state.audit.clone();

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Proxy listening on http://{}", addr);

    let shutdown = async {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping server...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    let trail = audit.lock();
    info!(
        events = trail.len(),
        verified = trail.verify(),
        "Server shutdown complete"
    );
    Ok(())
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("httpwall=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("httpwall=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Initialize metrics exporter and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!("httpwall_requests_total", "Total number of requests inspected");
    metrics::describe_counter!(
        "httpwall_rule_outcomes_total",
        "Rule evaluations by rule and result"
    );
    metrics::describe_counter!("httpwall_chain_aborts_total", "Chain aborts by rule");
    metrics::describe_counter!("httpwall_verdicts_total", "Enforced verdicts by kind");
    metrics::describe_histogram!(
        "httpwall_chain_latency_us",
        metrics::Unit::Microseconds,
        "Chain evaluation latency in microseconds by phase"
    );

    info!("Metrics exporter initialized");
    Ok(handle)
}
