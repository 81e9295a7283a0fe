//! API handlers for the prover orchestrator

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use prover_common::{ProgramId, ProofArtifact, ProofMetrics};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::{Controller, ControllerError, SessionSnapshot};

/// Shared application state
pub struct AppState {
    pub controller: Controller,
}

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message
        });

        (self.status, Json(body)).into_response()
    }
}

impl From<ControllerError> for ApiError {
    fn from(err: ControllerError) -> Self {
        let status = match err.root() {
            ControllerError::Validation(prover_common::Error::UnknownProgram(_)) => {
                StatusCode::NOT_FOUND
            }
            ControllerError::Validation(_) | ControllerError::NoProof(_) => StatusCode::BAD_REQUEST,
            ControllerError::Initializing | ControllerError::AlreadyInitialized => {
                StatusCode::CONFLICT
            }
            ControllerError::Trace(_) => StatusCode::NOT_FOUND,
            ControllerError::Fetch { .. } | ControllerError::Engine { fatal: false, .. } => {
                StatusCode::BAD_GATEWAY
            }
            ControllerError::Engine { fatal: true, .. }
            | ControllerError::SessionFailed(_)
            | ControllerError::Transport(_)
            | ControllerError::Protocol(_)
            | ControllerError::LoadFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };

        if status.is_server_error() {
            error!("Request failed: {}", err);
        } else {
            warn!("Request rejected: {}", err);
        }

        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

fn parse_program(name: &str) -> Result<ProgramId, ApiError> {
    name.parse().map_err(|e: prover_common::Error| ApiError {
        status: StatusCode::NOT_FOUND,
        message: e.to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct Sha2ProveRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct KeccakProveRequest {
    pub message: String,
    pub num_iters: u32,
}

#[derive(Debug, Serialize)]
pub struct ProveResponse {
    pub program: ProgramId,
    pub generation: u64,
    pub metrics: ProofMetrics,
    /// Hex-encoded program I/O
    pub program_io: String,
}

impl From<ProofArtifact> for ProveResponse {
    fn from(artifact: ProofArtifact) -> Self {
        Self {
            program: artifact.program,
            generation: artifact.generation,
            program_io: hex::encode(&artifact.program_io),
            metrics: artifact.metrics,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub program: ProgramId,
    pub generation: u64,
    pub valid: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub program: ProgramId,
    pub logs: Vec<String>,
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "prover-orchestrator"
    }))
}

/// Session status, per-program load state and latest results
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.controller.snapshot())
}

/// Prove a SHA-256 execution over the message bytes
pub async fn prove_sha2_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Sha2ProveRequest>,
) -> Result<Json<ProveResponse>, ApiError> {
    info!("Prove sha2 request ({} bytes)", payload.message.len());

    let artifact = state
        .controller
        .prove_sha2(payload.message.as_bytes())
        .await?;

    Ok(Json(artifact.into()))
}

/// Prove a Keccak chain seeded from the message digest
pub async fn prove_keccak_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<KeccakProveRequest>,
) -> Result<Json<ProveResponse>, ApiError> {
    info!("Prove keccak request ({} iterations)", payload.num_iters);

    let artifact = state
        .controller
        .prove_keccak(&payload.message, payload.num_iters)
        .await?;

    Ok(Json(artifact.into()))
}

/// Verify the most recent proof of a program
pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Path(program): Path<String>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let program = parse_program(&program)?;
    let result = state.controller.verify(program).await?;

    Ok(Json(VerifyResponse {
        program,
        generation: result.generation,
        valid: result.valid,
        elapsed: result.elapsed,
    }))
}

/// Progress log of a program
pub async fn logs_handler(
    State(state): State<Arc<AppState>>,
    Path(program): Path<String>,
) -> Result<Json<LogsResponse>, ApiError> {
    let program = parse_program(&program)?;

    Ok(Json(LogsResponse {
        program,
        logs: state.controller.logs(program),
    }))
}

/// Download the execution trace of the most recent proof
pub async fn trace_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let export = state.controller.fetch_trace().await?;

    let disposition = format!("attachment; filename=\"{}\"", export.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        export.payload,
    )
        .into_response())
}

/// Discard the recorded execution trace
pub async fn clear_trace_handler(
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, ApiError> {
    state.controller.clear_trace().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (
                ControllerError::Validation(prover_common::Error::InputTooLarge {
                    len: 2049,
                    max: 2048,
                }),
                StatusCode::BAD_REQUEST,
            ),
            (ControllerError::NoProof(ProgramId::Sha2), StatusCode::BAD_REQUEST),
            (ControllerError::Initializing, StatusCode::CONFLICT),
            (
                ControllerError::Engine {
                    message: "out of memory".to_string(),
                    fatal: true,
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ControllerError::Transport("gone".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }

    #[test]
    fn test_load_failure_maps_by_cause() {
        let err = ControllerError::LoadFailed {
            program: ProgramId::Keccak,
            cause: Arc::new(ControllerError::Fetch {
                artifact: "keccak.elf".to_string(),
                reason: "server returned 500".to_string(),
            }),
        };
        let api = ApiError::from(err);
        assert_eq!(api.status, StatusCode::BAD_GATEWAY);
        assert!(api.message.contains("keccak.elf"));
    }

    #[test]
    fn test_unknown_program() {
        let err = parse_program("blake3").unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
