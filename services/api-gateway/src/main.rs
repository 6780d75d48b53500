//! API Gateway
//!
//! Single-binary service that:
//! 1. Listens for incoming requests
//! 2. Creates one client proxy per request from a shared factory
//! 3. Injects configured headers and the upstream bearer token
//! 4. Forwards through a pooled upstream handler that is rotated on a timer

mod config;
mod metrics;
mod proxy;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use handler_pool::{ClientProxyFactory, FactoryBuilder};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::proxy::ProxyState;

/// Time allowed for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(proxy_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Factory whose clients carry the configured upstream, timeout, headers and token.
fn build_factory(config: &Config) -> Result<ClientProxyFactory<reqwest::Client>> {
    let base_url = reqwest::Url::parse(&config.proxy.upstream_url)
        .with_context(|| format!("invalid upstream_url {}", config.proxy.upstream_url))?;
    let timeout = Duration::from_secs(config.proxy.timeout_secs);
    let headers = config.headers.clone();
    let token = config.proxy.token.clone();

    let factory_config = config
        .pool
        .apply(FactoryBuilder::http())
        .context("invalid [pool] settings")?
        .configure_client_config(move |client| {
            client.set_base_url(base_url.clone());
            client.set_timeout(timeout);
            for header in &headers {
                client.insert_header(&header.name, &header.value);
            }
            if let Some(token) = &token {
                client.insert_header("authorization", &token.bearer());
            }
        })
        .build()
        .context("failed to build client proxy factory")?;

    Ok(ClientProxyFactory::new(factory_config))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting api-gateway");

    // Install before the pool emits anything
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.proxy.listen_addr,
        upstream_url = %config.proxy.upstream_url,
        headers = config.headers.len(),
        token = config.proxy.token.is_some(),
        "configuration loaded"
    );

    let factory = Arc::new(build_factory(&config)?);

    let app_state = AppState {
        proxy: ProxyState {
            factory: Arc::clone(&factory),
            upstream_url: config.proxy.upstream_url.clone(),
            timeout: Duration::from_secs(config.proxy.timeout_secs),
        },
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };

    let app = build_router(app_state, config.proxy.max_connections);

    let listener = TcpListener::bind(config.proxy.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.proxy.listen_addr))?;
    info!(addr = %config.proxy.listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let snapshot = factory.snapshot();
            warn!(
                in_flight = snapshot.current.map(|c| c.in_flight).unwrap_or(0)
                    + snapshot.draining_in_flight,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    let report = factory.shutdown();
    info!(
        retired = report.retired.len(),
        pending_drain = report.pending_drain,
        "shutdown complete"
    );
    Ok(())
}

/// Pool health plus uptime. 503 once the factory has shut down.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.proxy.factory.snapshot();
    let status_code = if snapshot.closed {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    } else {
        axum::http::StatusCode::OK
    };

    let mut body = snapshot.health();
    body["uptime_seconds"] = serde_json::json!(state.started_at.elapsed().as_secs());

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Catch-all handler that proxies all non-admin requests upstream.
async fn proxy_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    proxy::proxy_request(&state.proxy, request, request_id).await
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
