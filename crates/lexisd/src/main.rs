//! Lexis Daemon - learning platform backend
//!
//! Serves the course catalogue, records lesson and question progress, and
//! awards experience points.

use anyhow::Result;
use lexis_common::{LexisConfig, Services};
use lexisd::server::{self, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Lexis Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let config = LexisConfig::load();
    let services = Services::open(&config).await?;
    info!("Database ready at {}", config.database.path.display());

    server::run(AppState::new(services), &config.server.listen_addr).await
}
