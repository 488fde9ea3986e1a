// Main entry point for the colonies server

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use colonies_core::config::Config;
use colonies_core::domains::files::{ObjectStorage, S3Driver};
use colonies_core::kernel::{AssignmentEngine, EventHub, GeneratorWorker, RecoveryWorker};
use colonies_core::server::{build_app, AppState};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,colonies_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting colonies server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    if !config.tls_insecure && config.tls_cert.is_some() {
        tracing::warn!(
            "TLS_CERT is set but the server binds plain HTTP; terminate TLS at a fronting proxy"
        );
    }

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url())
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    if let Some(prefix) = &config.db_prefix {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {prefix}"))
            .execute(&pool)
            .await
            .context("Failed to create database schema")?;
    }

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Object storage (optional)
    let s3: Option<Arc<dyn ObjectStorage>> = match &config.s3 {
        Some(s3_config) => {
            let driver = S3Driver::new(s3_config).await;
            if let Err(e) = driver.ensure_bucket().await {
                tracing::warn!(error = %e, "object storage not reachable at startup");
            }
            Some(Arc::new(driver))
        }
        None => {
            tracing::info!("No S3 endpoint configured; file transfers are metadata-only");
            None
        }
    };

    // Shutdown signal shared by workers and waiters
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let events = EventHub::new(shutdown_rx.clone());
    let assignment = Arc::new(AssignmentEngine::new(pool.clone(), events.clone()));

    // Background workers
    let recovery = RecoveryWorker::new(
        pool.clone(),
        events.clone(),
        Duration::from_millis(config.recovery_interval_ms),
        shutdown_rx.clone(),
    );
    tokio::spawn(recovery.run());

    let generator = GeneratorWorker::new(
        pool.clone(),
        events.clone(),
        Duration::from_millis(config.generator_interval_ms),
        shutdown_rx,
    );
    tokio::spawn(generator.run());

    // Build application
    let app = build_app(AppState {
        pool,
        server_id: config.server_id.clone(),
        events,
        assignment,
        s3,
    });

    // Start server
    let addr = format!("{}:{}", config.server_host, config.server_port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("Server error")?;

    Ok(())
}
