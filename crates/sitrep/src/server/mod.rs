//! HTTP surface for uploads, job status and progress streaming.

pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::service::SitrepService;
use routes::AppState;

/// Multipart framing allowance on top of the payload limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub struct SitrepServer {
    config: ServerConfig,
    state: AppState,
}

impl SitrepServer {
    pub fn new(service: Arc<SitrepService>) -> Self {
        Self {
            config: service.config().server.clone(),
            state: service,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Builds the router with all routes.
    pub fn build_router(&self) -> Router {
        let max_upload =
            self.state.config().storage.max_upload_bytes as usize + MULTIPART_OVERHEAD;

        Router::new()
            .route("/health", get(routes::health))
            .nest("/api", api_routes(max_upload))
            .with_state(Arc::clone(&self.state))
            // Applied bottom to top
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&self.config.cors_origins))
    }

    /// Serves until Ctrl-C, then aborts running jobs.
    pub async fn start(self) -> Result<()> {
        let router = self.build_router();
        let listener =
            tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        tracing::info!("Listening on http://{}", listener.local_addr()?);

        let cleanup = self.state.spawn_cleanup();
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        cleanup.abort();
        self.state.shutdown();
        served?;
        Ok(())
    }
}

pub fn api_routes(max_upload: usize) -> Router<AppState> {
    // Only uploads get the raised body limit.
    let upload: Router<AppState> = Router::new()
        .route("/upload", post(routes::upload))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(RequestBodyLimitLayer::new(max_upload));

    Router::new()
        .merge(upload)
        .route("/status/:job_id", get(routes::status))
        .route("/progress-stream/:job_id", get(routes::progress_stream))
        .route("/stats/:job_id", get(routes::stats))
        .route("/data/:job_id", get(routes::processed_data))
        .route("/download/:job_id", get(routes::download))
        .route("/jobs", get(routes::list_jobs))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
