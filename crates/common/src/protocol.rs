//! Message protocol between the orchestrator and the compute worker.
//!
//! At most one request is outstanding at a time, so a response is matched to
//! its request by order, plus the `program` field where there is one.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ProgramArtifacts, ProgramId, ProveInput};

/// Messages sent to the worker
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerRequest {
    Init {
        num_threads: usize,
    },
    LoadProgram {
        program: ProgramId,
        #[serde(flatten)]
        artifacts: ProgramArtifacts,
    },
    Prove(ProveInput),
    Verify {
        program: ProgramId,
        proof: Bytes,
        program_io: Bytes,
    },
    GetTrace,
    ClearTrace,
}

impl WorkerRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerRequest::Init { .. } => "init",
            WorkerRequest::LoadProgram { .. } => "load-program",
            WorkerRequest::Prove(_) => "prove",
            WorkerRequest::Verify { .. } => "verify",
            WorkerRequest::GetTrace => "get-trace",
            WorkerRequest::ClearTrace => "clear-trace",
        }
    }
}

/// Messages received from the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerResponse {
    InitDone {
        num_threads: usize,
    },
    ProgramLoaded {
        program: ProgramId,
    },
    ProveDone {
        program: ProgramId,
        proof: Bytes,
        proof_size: usize,
        compressed_proof_size: usize,
        program_io: Bytes,
        num_cycles: Option<u64>,
        peak_memory: Option<u64>,
        elapsed: Duration,
    },
    VerifyDone {
        program: ProgramId,
        valid: bool,
        elapsed: Duration,
    },
    Trace {
        payload: String,
    },
    TraceCleared,
    Error {
        message: String,
        /// Set when the engine can no longer serve requests
        fatal: bool,
    },
}

impl WorkerResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerResponse::InitDone { .. } => "init-done",
            WorkerResponse::ProgramLoaded { .. } => "program-loaded",
            WorkerResponse::ProveDone { .. } => "prove-done",
            WorkerResponse::VerifyDone { .. } => "verify-done",
            WorkerResponse::Trace { .. } => "trace",
            WorkerResponse::TraceCleared => "trace-cleared",
            WorkerResponse::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tags() {
        let json = serde_json::to_value(WorkerRequest::Init { num_threads: 4 }).unwrap();
        assert_eq!(json["type"], "init");
        assert_eq!(json["num_threads"], 4);

        let json = serde_json::to_value(WorkerRequest::Prove(ProveInput::Keccak {
            input: [7u8; 32],
            num_iters: 3,
        }))
        .unwrap();
        assert_eq!(json["type"], "prove");
        assert_eq!(json["program"], "keccak");
        assert_eq!(json["num_iters"], 3);

        let json = serde_json::to_value(WorkerRequest::GetTrace).unwrap();
        assert_eq!(json["type"], "get-trace");
    }

    #[test]
    fn test_load_program_flattens_artifacts() {
        let request = WorkerRequest::LoadProgram {
            program: ProgramId::Sha2,
            artifacts: ProgramArtifacts {
                prover_preprocessing: vec![1],
                verifier_preprocessing: vec![2],
                elf_bytes: vec![3],
            },
        };
        assert_eq!(request.kind(), "load-program");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "load-program");
        assert_eq!(json["program"], "sha2");
        assert_eq!(json["elf_bytes"], serde_json::json!([3]));
    }

    #[test]
    fn test_response_tags() {
        let response = WorkerResponse::Error {
            message: "boom".to_string(),
            fatal: true,
        };
        assert_eq!(response.kind(), "error");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["fatal"], true);

        let json = serde_json::to_value(WorkerResponse::ProgramLoaded {
            program: ProgramId::Keccak,
        })
        .unwrap();
        assert_eq!(json["type"], "program-loaded");
        assert_eq!(json["program"], "keccak");
    }
}
