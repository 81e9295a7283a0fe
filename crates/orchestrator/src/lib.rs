//! Prover Orchestrator
//!
//! Drives an isolated compute worker through initialization, lazy program
//! loading, proof generation and verification for the `sha2` and `keccak`
//! guest programs, and exposes the session over a REST API.

pub mod artifacts;
pub mod config;
pub mod controller;
pub mod error;
pub mod handlers;
pub mod state;
pub mod transport;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use artifacts::{ArtifactSource, FetchError, FsArtifactSource, HttpArtifactSource};
pub use config::{ArtifactLocation, Config};
pub use controller::{Controller, TraceExport};
pub use error::ControllerError;
pub use handlers::AppState;
pub use state::{LoadState, ProgramSnapshot, SessionSnapshot, SessionStatus};

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/status", get(handlers::status_handler))
        .route("/api/prove/sha2", post(handlers::prove_sha2_handler))
        .route("/api/prove/keccak", post(handlers::prove_keccak_handler))
        .route("/api/verify/{program}", post(handlers::verify_handler))
        .route("/api/logs/{program}", get(handlers::logs_handler))
        .route(
            "/api/trace",
            get(handlers::trace_handler).delete(handlers::clear_trace_handler),
        )
        .with_state(shared_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
