//! Session and per-program state owned by the controller

use bytes::Bytes;
use prover_common::{ProgramId, ProofArtifact, ProofMetrics, VerificationResult, PROGRAMS};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::ControllerError;

/// Global session status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Ready,
    Busy,
    /// Terminal for the session
    Failed(String),
}

/// Program preprocessing lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Unloaded,
    Loading,
    Ready,
}

/// Completion signal of one load attempt; `None` while in flight
pub(crate) type LoadOutcome = Option<Result<(), Arc<ControllerError>>>;

pub(crate) enum LoadSlot {
    Unloaded,
    Loading(watch::Receiver<LoadOutcome>),
    Ready,
}

impl LoadSlot {
    pub(crate) fn state(&self) -> LoadState {
        match self {
            LoadSlot::Unloaded => LoadState::Unloaded,
            LoadSlot::Loading(_) => LoadState::Loading,
            LoadSlot::Ready => LoadState::Ready,
        }
    }
}

pub(crate) struct ProgramState {
    pub(crate) load: LoadSlot,
    pub(crate) proof: Option<ProofArtifact>,
    /// Generation of the most recent proof; 0 before the first
    pub(crate) generation: u64,
    verification: Option<VerificationResult>,
    pub(crate) log: Vec<String>,
}

impl Default for ProgramState {
    fn default() -> Self {
        Self {
            load: LoadSlot::Unloaded,
            proof: None,
            generation: 0,
            verification: None,
            log: Vec::new(),
        }
    }
}

impl ProgramState {
    pub(crate) fn push_log(&mut self, program: ProgramId, line: impl Into<String>) {
        let line = line.into();
        info!(program = %program, "{}", line);
        self.log.push(line);
    }

    /// Replace the current proof, invalidating any verification of the old one
    pub(crate) fn store_proof(
        &mut self,
        program: ProgramId,
        proof: Bytes,
        program_io: Bytes,
        metrics: ProofMetrics,
    ) -> ProofArtifact {
        self.generation += 1;
        let artifact = ProofArtifact {
            program,
            generation: self.generation,
            proof,
            program_io,
            metrics,
        };
        self.proof = Some(artifact.clone());
        self.verification = None;
        artifact
    }

    /// Keep `result` only if it belongs to the current proof
    pub(crate) fn record_verification(&mut self, result: VerificationResult) -> bool {
        if result.generation != self.generation {
            return false;
        }
        self.verification = Some(result);
        true
    }

    /// Verification of the current proof, never of a superseded one
    pub(crate) fn current_verification(&self) -> Option<VerificationResult> {
        self.verification
            .filter(|v| self.proof.is_some() && v.generation == self.generation)
    }
}

pub(crate) struct Session {
    pub(crate) status: SessionStatus,
    pub(crate) status_text: String,
    pub(crate) num_threads: Option<usize>,
    programs: HashMap<ProgramId, ProgramState>,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            status: SessionStatus::Initializing,
            status_text: "Initializing...".to_string(),
            num_threads: None,
            programs: PROGRAMS
                .iter()
                .map(|&p| (p, ProgramState::default()))
                .collect(),
        }
    }

    pub(crate) fn program(&self, program: ProgramId) -> Option<&ProgramState> {
        self.programs.get(&program)
    }

    pub(crate) fn program_mut(&mut self, program: ProgramId) -> &mut ProgramState {
        self.programs.entry(program).or_default()
    }

    pub(crate) fn is_failed(&self) -> bool {
        matches!(self.status, SessionStatus::Failed(_))
    }

    /// Fresh engine: nothing loaded, nothing proved. Logs are kept.
    pub(crate) fn reset_programs(&mut self) {
        for state in self.programs.values_mut() {
            let log = std::mem::take(&mut state.log);
            *state = ProgramState {
                log,
                ..ProgramState::default()
            };
        }
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status.clone(),
            status_text: self.status_text.clone(),
            num_threads: self.num_threads,
            programs: PROGRAMS
                .iter()
                .filter_map(|&p| self.program(p).map(|s| ProgramSnapshot::of(p, s)))
                .collect(),
        }
    }
}

/// Point-in-time view of the session for the request surface
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub status_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<usize>,
    pub programs: Vec<ProgramSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgramSnapshot {
    pub program: ProgramId,
    pub load_state: LoadState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<ProofSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
}

impl ProgramSnapshot {
    fn of(program: ProgramId, state: &ProgramState) -> Self {
        Self {
            program,
            load_state: state.load.state(),
            proof: state.proof.as_ref().map(|p| ProofSummary {
                generation: p.generation,
                metrics: p.metrics.clone(),
            }),
            verification: state.current_verification(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProofSummary {
    pub generation: u64,
    pub metrics: ProofMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn metrics() -> ProofMetrics {
        ProofMetrics {
            elapsed: Duration::from_millis(10),
            proof_size: 4,
            compressed_proof_size: 4,
            num_cycles: None,
            peak_memory: None,
        }
    }

    #[test]
    fn test_new_proof_invalidates_verification() {
        let mut state = ProgramState::default();
        let first = state.store_proof(
            ProgramId::Sha2,
            Bytes::from_static(b"p1"),
            Bytes::from_static(b"io"),
            metrics(),
        );
        assert!(state.record_verification(VerificationResult {
            generation: first.generation,
            valid: true,
            elapsed: Duration::from_millis(1),
        }));
        assert!(state.current_verification().is_some());

        let second = state.store_proof(
            ProgramId::Sha2,
            Bytes::from_static(b"p2"),
            Bytes::from_static(b"io"),
            metrics(),
        );
        assert_eq!(second.generation, first.generation + 1);
        assert!(state.current_verification().is_none());

        // A late result for the superseded proof is dropped
        assert!(!state.record_verification(VerificationResult {
            generation: first.generation,
            valid: true,
            elapsed: Duration::from_millis(1),
        }));
        assert!(state.current_verification().is_none());
    }

    #[test]
    fn test_reset_keeps_logs() {
        let mut session = Session::new();
        let state = session.program_mut(ProgramId::Keccak);
        state.load = LoadSlot::Ready;
        state.push_log(ProgramId::Keccak, "Ready");

        session.reset_programs();
        let state = session.program(ProgramId::Keccak).unwrap();
        assert_eq!(state.load.state(), LoadState::Unloaded);
        assert_eq!(state.log, vec!["Ready".to_string()]);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(SessionStatus::Failed("worker crashed".into())).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["reason"], "worker crashed");
        let json = serde_json::to_value(SessionStatus::Ready).unwrap();
        assert_eq!(json["state"], "ready");
    }
}
