mod routes;

use std::{sync::Arc, time::Instant};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use lexscan_client::HttpAnalysisClient;
use lexscan_core::{config::Config, Session};
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::routes::*;

// ── AppState ──────────────────────────────────────────────────────────────

pub struct AppState {
    pub session: Session,
    pub start_time: Instant,
    /// Flipped to `true` once shutdown starts; ends open event streams.
    pub shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn new(session: Session) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            session,
            start_time: Instant::now(),
            shutdown,
        }
    }
}

pub(crate) fn app(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        // Health
        .route("/api/health", get(health))
        // Chat
        .route("/api/transcript", get(get_transcript))
        .route("/api/messages", post(post_message))
        .route("/api/upload", post(upload))
        // Jobs
        .route("/api/jobs/:id", get(get_job).delete(cancel_job))
        // Documents
        .route("/api/sources", get(list_sources))
        .route("/api/sources/select", post(select_source))
        .route("/api/sources/:id/pdf", get(source_pdf))
        // Chart
        .route("/api/chart", get(get_chart))
        // SSE
        .route("/api/events", get(sse_events))
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::disable()),
        )
        .with_state(state)
}

async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
    let _ = state.shutdown.send(true);
}

// ── main ──────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lexscan_server=info,lexscan_core=info,lexscan_client=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        analysis = %config.analysis_api_url,
        highlight = %config.highlight_api_url,
        poll_ms = config.poll_interval_ms,
        "analysis services configured"
    );

    let client = HttpAnalysisClient::from_config(&config);
    let session = Session::new(Arc::new(client), &config);
    let state = Arc::new(AppState::new(session));

    let max_upload_bytes = usize::try_from(config.max_upload_mb)
        .unwrap_or(usize::MAX)
        .saturating_mul(1024 * 1024);
    let app = app(Arc::clone(&state), max_upload_bytes);

    let addr = format!("{}:{}", config.web_bind, config.web_port);
    info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state)))
        .await?;

    state.session.shutdown().await;
    Ok(())
}
