//! Shared types for the client-side prover.
//!
//! Everything both sides of the worker boundary need to agree on lives here:
//! the closed set of guest programs and where their artifacts live, the
//! validated prove inputs, the request/response protocol and the proof data
//! the orchestrator caches.

pub mod error;
pub mod inputs;
pub mod program;
pub mod proof;
pub mod protocol;

pub use error::{Error, Result};
pub use inputs::{ProveInput, KECCAK_MAX_ITERS, KECCAK_MIN_ITERS, SHA2_MAX_BYTES};
pub use program::{ArtifactKind, ProgramArtifacts, ProgramFiles, ProgramId, PROGRAMS};
pub use proof::{ProofArtifact, ProofMetrics, VerificationResult};
pub use protocol::{WorkerRequest, WorkerResponse};
