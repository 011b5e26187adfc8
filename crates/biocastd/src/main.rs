use std::sync::Arc;

use anyhow::{Context, Result};
use biocast_core::{Catalog, Pipeline};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod render;
mod web;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "biocastd starting");

    let config = config::Config::from_env();

    // Load models, index and catalog synchronously (fail-fast)
    let pipeline = Pipeline::load(&config.core).context("failed to load models and catalog index")?;
    let catalog = Catalog::open(&config.core.catalog_dir).context("failed to open catalog directory")?;
    let catalog_size = pipeline.catalog_size();

    let engine = engine::spawn_engine(pipeline, catalog)?;
    let state = Arc::new(web::AppState {
        engine,
        catalog_size,
    });
    let app = web::router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %listener.local_addr()?, catalog_size, "biocastd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("biocastd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
    }
}
