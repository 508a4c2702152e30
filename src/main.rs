//! Hearthbeat server entry point

use anyhow::{Context, Result};
use clap::Parser;
use hearthbeat::config::Settings;
use hearthbeat::live::LiveBroker;
use hearthbeat::server::{run_server, AppState};
use hearthbeat::storage::{AuthStore, MemoryStore, PostgresConfig, PostgresStore};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "hearthbeatd", about = "Family calendar sync server")]
struct Args {
    /// Address to bind, e.g. 127.0.0.1:8080 (overrides HB_BIND)
    #[arg(long)]
    bind: Option<String>,

    /// Postgres connection URL; without it state lives in memory only
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut settings = Settings::from_env()?;
    if let Some(bind) = args.bind {
        settings.bind_addr = bind.parse().context("Invalid bind address")?;
    }
    let settings = Arc::new(settings);

    let store: Arc<dyn AuthStore> = match args.database_url {
        Some(url) => {
            let config = PostgresConfig::from_url(&url).context("Invalid DATABASE_URL")?;
            Arc::new(PostgresStore::new(config).await?)
        }
        None => {
            warn!("No DATABASE_URL set, using in-memory storage; state is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let broker = LiveBroker::new(settings.queue_capacity);
    broker.start_delivery();

    let state = AppState::new(Arc::clone(&settings), store, broker);

    info!("Starting Hearthbeat server...");
    run_server(settings.bind_addr, state, shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
