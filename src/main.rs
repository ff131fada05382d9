//! The moderation core's binary entry point: load configuration, wire
//! the ports, and run the dispatcher loop until shutdown, in the spirit
//! of the teacher's `main.rs` (config first, then tracing, then ports,
//! then a spawned set of background tasks).

use dino_core::adapters::{
    InMemorySessionStore, LoggingBroadcast, LoggingExternalBus, LoggingInternalBus,
    PermissiveAuthPort,
};
use dino_core::config::Config;
use dino_core::dispatcher::Dispatcher;
use dino_core::store::SqlitePersistenceStore;
use std::sync::Arc;
use tracing::{error, info};

fn resolve_config_path() -> String {
    std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = resolve_config_path();

    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("ERROR: failed to load config from {config_path}: {e}");
        e
    })?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!(sid = %config.server.sid, "starting moderation core");

    let persistence = Arc::new(
        SqlitePersistenceStore::connect(
            &config.database.url,
            config.database.pool_size,
            config.server.sid.clone(),
        )
        .await
        .map_err(|e| {
            error!(error = %e, "failed to connect to persistence store");
            anyhow::anyhow!("persistence connect failed: {e}")
        })?,
    );

    let sessions = Arc::new(InMemorySessionStore::default());
    let broadcast = Arc::new(LoggingBroadcast);
    let external = Arc::new(LoggingExternalBus);
    let internal = Arc::new(LoggingInternalBus);
    let _auth = Arc::new(PermissiveAuthPort);

    let _dispatcher = Arc::new(Dispatcher::new(
        sessions.clone(),
        persistence.clone(),
        broadcast,
        external,
        internal,
    ));
    info!("dispatcher ready");

    let shutdown = async {
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("failed to install SIGINT handler");
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    };

    // The dispatcher's actual envelope feed arrives over C5 (internal
    // bus subscribe), which is supplied by the surrounding deployment;
    // this process just keeps the ports alive until shutdown.
    shutdown.await;
    info!("shutting down");
    Ok(())
}
