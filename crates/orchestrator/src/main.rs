//! Prover Orchestrator
//!
//! REST API in front of the compute worker

use anyhow::{Context, Result};
use compute_worker::HashCommitEngine;
use prover_orchestrator::{
    create_router, AppState, ArtifactLocation, ArtifactSource, Config, Controller,
    FsArtifactSource, HttpArtifactSource,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "prover_orchestrator=debug,compute_worker=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    info!("Starting Prover Orchestrator");
    info!("Listening on {}", config.address());

    let source: Arc<dyn ArtifactSource> = match &config.artifacts {
        ArtifactLocation::Http(base_url) => {
            info!("Artifact base URL: {}", base_url);
            Arc::new(HttpArtifactSource::new(
                base_url.clone(),
                config.cache_bust.clone(),
            ))
        }
        ArtifactLocation::Dir(dir) => {
            info!("Artifact directory: {}", dir.display());
            Arc::new(FsArtifactSource::new(dir.clone()))
        }
    };

    // Spawn the compute worker
    let worker =
        compute_worker::spawn(HashCommitEngine::new()).context("Failed to spawn compute worker")?;
    let controller = Controller::new(worker, source);

    // A failed init leaves the session failed; the API still reports why
    match controller.initialize(config.num_threads).await {
        Ok(threads) => info!("Compute engine initialized with {} threads", threads),
        Err(e) => warn!("Compute engine failed to initialize: {}", e),
    }

    let app = create_router(AppState {
        controller: controller.clone(),
    });

    // Bind and serve
    let listener = tokio::net::TcpListener::bind(config.address())
        .await
        .context("Failed to bind to address")?;

    info!("Prover Orchestrator running on http://{}", config.address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    controller.terminate().await;
    info!("Prover Orchestrator stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
