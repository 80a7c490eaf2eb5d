use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    admission::AdmissionPolicy,
    handlers::{create_drop, get_drop, health, revoke_drop},
    store::Store,
    AppState,
};

/// Largest accepted create body: the ciphertext ceiling plus room for the
/// rest of the envelope, so an oversized ciphertext trips its own rule.
pub const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024 + 16 * 1024;

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Prefix for generated links; defaults to `http://localhost:<port>`.
    pub base_url: Option<String>,
    pub sweep_interval: Duration,
    pub cors_origins: Option<String>,
    /// Set `BURNENV_REVEAL_REASONS=true` to return distinct expired /
    /// exhausted / not-found errors.
    pub reveal_reasons: bool,
    pub policy: AdmissionPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("BURNENV_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("BURNENV_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            base_url: std::env::var("BURNENV_BASE_URL").ok(),
            sweep_interval: Duration::from_secs(
                std::env::var("BURNENV_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|&secs| secs > 0)
                    .unwrap_or(30),
            ),
            cors_origins: std::env::var("BURNENV_CORS_ORIGINS").ok(),
            reveal_reasons: std::env::var("BURNENV_REVEAL_REASONS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            policy: AdmissionPolicy::default(),
        }
    }
}

/// Routes of the drop API, without CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/v1/drop",
            post(create_drop).layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES)),
        )
        .route("/v1/drop/{id}", get(get_drop).delete(revoke_drop))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let store = Store::new();
    let sweep = store.clone().spawn_sweep(cfg.sweep_interval);

    let base_url = cfg
        .base_url
        .clone()
        .unwrap_or_else(|| format!("http://localhost:{}", cfg.port));
    info!(%base_url, reveal_reasons = cfg.reveal_reasons, "in-memory only: restart loses all secrets");

    let state = AppState {
        store,
        policy: Arc::new(cfg.policy),
        base_url,
        reveal_reasons: cfg.reveal_reasons,
    };

    let app = router(state).layer(build_cors(cfg.cors_origins.as_deref()));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "burnenv server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");

    sweep.stop().await;
    info!("server stopped");
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
