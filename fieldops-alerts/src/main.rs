use anyhow::Context;
use fieldops_alerts::config::AppConfig;
use fieldops_alerts::services::ServiceContainer;
use fieldops_alerts::{database, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;

    let (logging_config, _guard) = logging::init_logging(&config.log_dir)?;

    let pool = database::init_pool(&config.database_url)
        .await
        .with_context(|| format!("failed to open {}", config.database_url))?;
    database::run_migrations(&pool).await?;

    let container = ServiceContainer::new(pool, &config).await?;
    logging_config.start_retention_cleanup(container.cancellation_token());
    container.initialize().await?;

    tracing::info!(
        queue_mode = %container.queue().mode(),
        "fieldops-alerts started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    container.shutdown().await?;
    Ok(())
}
