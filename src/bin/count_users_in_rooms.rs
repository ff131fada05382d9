//! One-shot job (C12, §4.7): count distinct users across all room
//! memberships and write the result to the shared cache. Grounded on
//! `bin/count_users_in_rooms.py`, sharing the library's `Config` and
//! `PersistenceStore` rather than a hand-rolled second connection path.

use dino_core::config::Config;
use dino_core::ports::PersistenceStore;
use dino_core::store::SqlitePersistenceStore;
use tracing::info;

const CACHE_KEY: &str = "users:online:inrooms";

fn resolve_config_path() -> String {
    std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = resolve_config_path();
    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("ERROR: failed to load config from {config_path}: {e}");
        e
    })?;

    let store = SqlitePersistenceStore::connect(
        &config.database.url,
        config.database.pool_size,
        config.server.sid.clone(),
    )
    .await?;

    let count = store.count_distinct_users_in_rooms().await?;
    store.write_cache(CACHE_KEY, count).await?;

    info!(count, key = CACHE_KEY, "wrote distinct user count to cache");
    Ok(())
}
