//! Taskdeck - real-time task and chat sync server
//!
//! Usage: `taskdeck [CONFIG]`. See `config` for the file format.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskdeck_core::Database;
use taskdeck_net::Server;

mod bootstrap;
mod config;
mod error;

use config::Config;
use error::Result;

/// Time given to sessions to flush their shutdown notice
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting taskdeck");

    if let Err(e) = run().await {
        tracing::error!("Server failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let path = config::locate(std::env::args().nth(1))?;
    let config = Config::load(&path)?;

    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::open(&db_path)?;
    tracing::info!(path = %db_path.display(), schema = db.schema_version(), "Database ready");

    let tokens = bootstrap::seed_users(&db, &config.users)?;
    if tokens.is_empty() {
        tracing::warn!("No users configured; every handshake will be rejected");
    }

    let server = Server::start(
        config.server.bind,
        db,
        Arc::new(tokens),
        config.server_config(),
    )
    .await?;
    tracing::info!(addr = %server.addr(), "Listening");

    tokio::signal::ctrl_c().await?;
    tracing::info!(sessions = server.session_count(), "Shutting down");
    server.shutdown();
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    Ok(())
}
