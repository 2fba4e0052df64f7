//! HTTP server for lexisd

use crate::routes;
use anyhow::Result;
use axum::Router;
use lexis_common::Services;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Largest accepted request body (nested block payloads included)
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared across handlers
pub struct AppState {
    pub services: Services,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            start_time: Instant::now(),
        }
    }
}

/// Build the full router with its middleware
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .merge(routes::user_routes())
        .merge(routes::discipline_routes())
        .merge(routes::module_routes())
        .merge(routes::lesson_routes())
        .merge(routes::block_routes())
        .merge(routes::question_routes())
        .merge(routes::option_routes())
        .with_state(Arc::new(state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
}

/// Run the HTTP server until ctrl-c
pub async fn run(state: AppState, addr: &str) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("  Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c, serving without a shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutting down gracefully");
        })
        .await?;
    Ok(())
}
