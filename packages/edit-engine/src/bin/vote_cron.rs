//! Vote resolution daemon
//!
//! Connects to Postgres, runs migrations and drives `run_vote_tick` every
//! `VOTE_CRON_INTERVAL_SECS`. On Unix, SIGHUP reloads the voting thresholds
//! from the environment.

use std::sync::Arc;

use anyhow::{Context, Result};
use edit_engine::config::{Config, ConfigHandle};
use edit_engine::kernel::{run_migrations, start_scheduler, EngineDeps, PgEditStore};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,edit_engine=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting vote cron");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(voting = ?config.voting, "Voting configuration loaded");

    // Database setup
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    run_migrations(&pool).await?;
    tracing::info!("Migrations complete");

    let handle = ConfigHandle::new(config.voting.clone());
    let store = PgEditStore::new(pool.clone(), handle.clone());
    let deps = EngineDeps::with_store(Arc::new(store), handle.clone());

    let mut scheduler = start_scheduler(deps).await?;

    #[cfg(unix)]
    {
        let reload = handle.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};

            let mut hangups = match signal(SignalKind::hangup()) {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "SIGHUP handler unavailable, config reload disabled");
                    return;
                }
            };
            while hangups.recv().await.is_some() {
                if let Err(e) = reload.reload_from_env() {
                    tracing::error!("Config reload failed, keeping previous values: {:#}", e);
                }
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down vote cron");

    scheduler.shutdown().await?;
    pool.close().await;
    Ok(())
}
