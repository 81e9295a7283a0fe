//! Controller error taxonomy

use prover_common::ProgramId;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    /// Input out of bounds; never dispatched
    #[error(transparent)]
    Validation(#[from] prover_common::Error),

    #[error("No proof to verify for {0}. Generate a proof first.")]
    NoProof(ProgramId),

    #[error("Engine is still initializing")]
    Initializing,

    #[error("Session already initialized")]
    AlreadyInitialized,

    #[error("Session failed: {0}")]
    SessionFailed(String),

    #[error("Failed to load {artifact}: {reason}")]
    Fetch { artifact: String, reason: String },

    #[error("Engine error: {message}")]
    Engine { message: String, fatal: bool },

    #[error("Compute worker unreachable: {0}")]
    Transport(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Outcome of a shared program load, as seen by every waiter
    #[error("Failed to load {program}: {cause}")]
    LoadFailed {
        program: ProgramId,
        #[source]
        cause: Arc<ControllerError>,
    },

    #[error("Trace unavailable: {0}")]
    Trace(String),
}

impl ControllerError {
    /// Raised before anything was sent to the worker
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ControllerError::Validation(_) | ControllerError::NoProof(_)
        )
    }

    /// Whether re-invoking the operation can succeed in this session
    pub fn is_retryable(&self) -> bool {
        match self {
            ControllerError::Fetch { .. } | ControllerError::Trace(_) => true,
            ControllerError::Engine { fatal, .. } => !fatal,
            ControllerError::LoadFailed { cause, .. } => cause.is_retryable(),
            ControllerError::Validation(_)
            | ControllerError::NoProof(_)
            | ControllerError::Initializing
            | ControllerError::AlreadyInitialized
            | ControllerError::SessionFailed(_)
            | ControllerError::Transport(_)
            | ControllerError::Protocol(_) => false,
        }
    }

    /// The error behind a shared load failure, or `self`
    pub fn root(&self) -> &ControllerError {
        match self {
            ControllerError::LoadFailed { cause, .. } => cause.root(),
            other => other,
        }
    }
}
