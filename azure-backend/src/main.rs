use std::sync::Arc;

use azure_backend::{Azure, config::Config};
use azure_db::Database;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = "debug";
    #[cfg(not(debug_assertions))]
    let log_level = "info";

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting Azure player-state service...");

    // Load configuration from environment variables or use defaults
    let config = Config::from_env();
    tracing::info!(
        "Configuration: db_path={}, grace={}s, player_sweep={}s, request_lifespan={}s, request_sweep={}s, autosave={}s, request_policy={:?}",
        config.database_path,
        config.cache_grace_period.as_secs(),
        config.player_sweep_interval.as_secs(),
        config.request_lifespan.as_secs(),
        config.request_sweep_interval.as_secs(),
        config.autosave_interval.as_secs(),
        config.request_policy
    );

    let db = Database::open(&config.database_path).await?;
    let azure = Azure::new(Arc::new(db), config);
    azure.warm_names().await?;
    azure.start_reaper();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    let report = azure.shutdown().await;
    if report.failed > 0 {
        anyhow::bail!("{} player records could not be saved", report.failed);
    }
    Ok(())
}
