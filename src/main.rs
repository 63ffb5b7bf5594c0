//! Loadout media server
//!
//! Serves the media import endpoint, the allow-listed image proxy and health checks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use loadout::AppState;
use loadout::api;
use loadout::config::Config;
use loadout::db::Database;
use loadout::services::{ImageImporter, LogFormat, StorageClient, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(LogFormat::from_env());

    let config = Config::from_env()
        .inspect_err(|e| tracing::error!(error = %format!("{e:#}"), "Invalid configuration"))?;
    let config = Arc::new(config);

    tracing::info!("Starting Loadout media server");

    let db = Database::connect(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database connected");

    if config.run_migrations {
        db.migrate().await?;
        tracing::info!("Database migrations applied");
    }

    let storage_client = StorageClient::new(
        config.supabase_url.clone(),
        config.supabase_service_key.clone(),
    );

    if let Err(e) = storage_client.ensure_bucket(&config.media_bucket, true).await {
        tracing::warn!(error = %e, bucket = %config.media_bucket, "Failed to ensure media bucket - imports may fail");
    }

    let bucket = storage_client.bucket(&config.media_bucket);
    tracing::info!(bucket = %bucket.name(), admin = config.admin_enabled, "Media bucket selected");

    let importer = ImageImporter::new(
        Arc::new(bucket),
        Arc::new(db.media()),
        config.import_fetch_timeout,
    )?;

    let http_client = api::image_proxy::proxy_client(
        &config.proxy_allowed_hosts,
        Duration::from_secs(30),
    )
    .context("Failed to build proxy HTTP client")?;

    let state = AppState {
        config: config.clone(),
        db,
        importer: Arc::new(importer),
        http_client,
    };

    let app = api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
