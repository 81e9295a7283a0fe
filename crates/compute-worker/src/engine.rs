//! The proving engine seam

use prover_common::{ProgramArtifacts, ProgramId, ProveInput};
use thiserror::Error;

use crate::TraceRecorder;

/// Error reported by an engine operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
    /// The engine cannot serve further requests
    pub fatal: bool,
}

impl EngineError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

/// What an engine hands back from a successful prove
#[derive(Debug, Clone)]
pub struct ProveOutput {
    pub proof: Vec<u8>,
    pub program_io: Vec<u8>,
    pub num_cycles: Option<u64>,
    pub peak_memory: Option<u64>,
}

/// A proving/verification backend.
///
/// Engines are driven from the worker thread only, one call at a time, inside
/// the worker's thread pool.
pub trait Engine: Send + 'static {
    /// Take ownership of a program's preprocessing and guest binary
    fn load_program(
        &mut self,
        program: ProgramId,
        artifacts: ProgramArtifacts,
    ) -> Result<(), EngineError>;

    /// Prove one execution of a loaded program, recording phases into `trace`
    fn prove(
        &mut self,
        input: &ProveInput,
        trace: &mut TraceRecorder,
    ) -> Result<ProveOutput, EngineError>;

    /// Check a proof against its program-I/O without consuming either
    fn verify(
        &mut self,
        program: ProgramId,
        proof: &[u8],
        program_io: &[u8],
    ) -> Result<bool, EngineError>;
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn load_program(
        &mut self,
        program: ProgramId,
        artifacts: ProgramArtifacts,
    ) -> Result<(), EngineError> {
        (**self).load_program(program, artifacts)
    }

    fn prove(
        &mut self,
        input: &ProveInput,
        trace: &mut TraceRecorder,
    ) -> Result<ProveOutput, EngineError> {
        (**self).prove(input, trace)
    }

    fn verify(
        &mut self,
        program: ProgramId,
        proof: &[u8],
        program_io: &[u8],
    ) -> Result<bool, EngineError> {
        (**self).verify(program, proof, program_io)
    }
}
