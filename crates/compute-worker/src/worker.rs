//! Worker thread and its channel endpoints

use bytes::Bytes;
use flate2::{write::GzEncoder, Compression};
use prover_common::{ProgramArtifacts, ProgramId, ProveInput, WorkerRequest, WorkerResponse};
use std::io::Write;
use std::thread::JoinHandle;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{Engine, EngineError, TraceRecorder};

/// The worker thread is no longer running
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("compute worker is not running")]
pub struct WorkerGone;

/// Orchestrator-side endpoints of a running worker
pub struct WorkerHandle {
    requests: Option<mpsc::UnboundedSender<WorkerRequest>>,
    responses: mpsc::UnboundedReceiver<WorkerResponse>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Queue a request. Ownership of any buffers inside moves to the worker.
    pub fn send(&self, request: WorkerRequest) -> Result<(), WorkerGone> {
        let sender = self.requests.as_ref().ok_or(WorkerGone)?;
        sender.send(request).map_err(|_| WorkerGone)
    }

    /// Next response, or `WorkerGone` once the worker has exited
    pub async fn recv(&mut self) -> Result<WorkerResponse, WorkerGone> {
        self.responses.recv().await.ok_or(WorkerGone)
    }

    /// Stop accepting requests and wait for the thread to finish
    pub fn terminate(&mut self) {
        self.requests.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Compute worker exited with a panic");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Closing the request channel ends the loop; the thread is left to
        // finish its current operation on its own.
        self.requests.take();
    }
}

/// Start a worker thread that owns `engine`
pub fn spawn<E: Engine>(engine: E) -> std::io::Result<WorkerHandle> {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();

    let thread = std::thread::Builder::new()
        .name("compute-worker".to_string())
        .spawn(move || Worker::new(engine, response_tx).run(request_rx))?;

    Ok(WorkerHandle {
        requests: Some(request_tx),
        responses: response_rx,
        thread: Some(thread),
    })
}

struct Worker<E> {
    engine: E,
    pool: Option<rayon::ThreadPool>,
    trace: TraceRecorder,
    responses: mpsc::UnboundedSender<WorkerResponse>,
}

impl<E: Engine> Worker<E> {
    fn new(engine: E, responses: mpsc::UnboundedSender<WorkerResponse>) -> Self {
        Self {
            engine,
            pool: None,
            trace: TraceRecorder::new(),
            responses,
        }
    }

    fn run(mut self, mut requests: mpsc::UnboundedReceiver<WorkerRequest>) {
        info!("Compute worker started, waiting for requests...");

        while let Some(request) = requests.blocking_recv() {
            debug!("Worker received {}", request.kind());
            let response = self.handle(request);
            if self.responses.send(response).is_err() {
                // Orchestrator dropped its receiver
                break;
            }
        }

        info!("Compute worker stopped");
    }

    fn handle(&mut self, request: WorkerRequest) -> WorkerResponse {
        let result = match request {
            WorkerRequest::Init { num_threads } => self.init(num_threads),
            WorkerRequest::GetTrace => self.get_trace(),
            WorkerRequest::ClearTrace => {
                self.trace.reset();
                Ok(WorkerResponse::TraceCleared)
            }
            WorkerRequest::LoadProgram { program, artifacts } => {
                self.with_pool(|w| w.load_program(program, artifacts))
            }
            WorkerRequest::Prove(input) => self.with_pool(|w| w.prove(&input)),
            WorkerRequest::Verify {
                program,
                proof,
                program_io,
            } => self.with_pool(|w| w.verify(program, &proof, &program_io)),
        };

        result.unwrap_or_else(|e| {
            if e.fatal {
                error!("Engine failure: {}", e.message);
            } else {
                warn!("Request failed: {}", e.message);
            }
            WorkerResponse::Error {
                message: e.message,
                fatal: e.fatal,
            }
        })
    }

    fn init(&mut self, num_threads: usize) -> Result<WorkerResponse, EngineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("compute-pool-{}", i))
            .build()
            .map_err(|e| EngineError::fatal(format!("Failed to build thread pool: {}", e)))?;
        let num_threads = pool.current_num_threads();
        self.pool = Some(pool);
        info!("Engine initialized with {} threads", num_threads);
        Ok(WorkerResponse::InitDone { num_threads })
    }

    /// Run an engine operation inside the pool; fails until `init` has run
    fn with_pool(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<WorkerResponse, EngineError> + Send,
    ) -> Result<WorkerResponse, EngineError> {
        let pool = self
            .pool
            .take()
            .ok_or_else(|| EngineError::recoverable("Engine is not initialized"))?;
        let result = pool.install(|| f(self));
        self.pool = Some(pool);
        result
    }

    fn load_program(
        &mut self,
        program: ProgramId,
        artifacts: ProgramArtifacts,
    ) -> Result<WorkerResponse, EngineError> {
        info!(
            "Loading {} ({:.2} MB of artifacts)",
            program,
            artifacts.total_len() as f64 / 1024.0 / 1024.0
        );
        self.engine.load_program(program, artifacts)?;
        Ok(WorkerResponse::ProgramLoaded { program })
    }

    fn prove(&mut self, input: &ProveInput) -> Result<WorkerResponse, EngineError> {
        let program = input.program();
        input
            .validate()
            .map_err(|e| EngineError::recoverable(e.to_string()))?;

        self.trace.reset();
        let start = Instant::now();
        let engine = &mut self.engine;
        let trace = &mut self.trace;
        let output = engine.prove(input, trace)?;
        let compressed_proof_size = trace.span("compress", || compressed_len(&output.proof))?;
        let elapsed = start.elapsed();

        info!(
            "Proved {} in {:.2}s ({} byte proof)",
            program,
            elapsed.as_secs_f64(),
            output.proof.len()
        );

        Ok(WorkerResponse::ProveDone {
            program,
            proof_size: output.proof.len(),
            compressed_proof_size,
            proof: Bytes::from(output.proof),
            program_io: Bytes::from(output.program_io),
            num_cycles: output.num_cycles,
            peak_memory: output.peak_memory,
            elapsed,
        })
    }

    fn verify(
        &mut self,
        program: ProgramId,
        proof: &[u8],
        program_io: &[u8],
    ) -> Result<WorkerResponse, EngineError> {
        let start = Instant::now();
        let valid = self.engine.verify(program, proof, program_io)?;
        Ok(WorkerResponse::VerifyDone {
            program,
            valid,
            elapsed: start.elapsed(),
        })
    }

    fn get_trace(&self) -> Result<WorkerResponse, EngineError> {
        if self.trace.is_empty() {
            return Err(EngineError::recoverable(
                "No trace recorded. Generate a proof first.",
            ));
        }
        let payload = self
            .trace
            .to_json()
            .map_err(|e| EngineError::recoverable(format!("Failed to encode trace: {}", e)))?;
        Ok(WorkerResponse::Trace { payload })
    }
}

fn compressed_len(proof: &[u8]) -> Result<usize, EngineError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(proof)
        .and_then(|_| encoder.finish())
        .map(|compressed| compressed.len())
        .map_err(|e| EngineError::recoverable(format!("Failed to compress proof: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HashCommitEngine;

    fn artifacts() -> ProgramArtifacts {
        ProgramArtifacts {
            prover_preprocessing: vec![1u8; 512],
            verifier_preprocessing: vec![2u8; 512],
            elf_bytes: vec![3u8; 64],
        }
    }

    async fn round_trip(handle: &mut WorkerHandle, request: WorkerRequest) -> WorkerResponse {
        handle.send(request).unwrap();
        handle.recv().await.unwrap()
    }

    #[tokio::test]
    async fn test_requests_before_init_are_rejected() {
        let mut handle = spawn(HashCommitEngine::new()).unwrap();
        let response = round_trip(
            &mut handle,
            WorkerRequest::LoadProgram {
                program: ProgramId::Sha2,
                artifacts: artifacts(),
            },
        )
        .await;
        match response {
            WorkerResponse::Error { message, fatal } => {
                assert!(!fatal);
                assert_eq!(message, "Engine is not initialized");
            }
            other => panic!("unexpected response: {:?}", other),
        }
        handle.terminate();
    }

    #[tokio::test]
    async fn test_full_round_trip() {
        let mut handle = spawn(HashCommitEngine::new()).unwrap();

        let response = round_trip(&mut handle, WorkerRequest::Init { num_threads: 2 }).await;
        assert!(matches!(response, WorkerResponse::InitDone { num_threads: 2 }));

        let response = round_trip(
            &mut handle,
            WorkerRequest::LoadProgram {
                program: ProgramId::Keccak,
                artifacts: artifacts(),
            },
        )
        .await;
        assert!(matches!(
            response,
            WorkerResponse::ProgramLoaded {
                program: ProgramId::Keccak
            }
        ));

        let input = ProveInput::keccak("hello", 10).unwrap();
        let (proof, program_io) =
            match round_trip(&mut handle, WorkerRequest::Prove(input)).await {
                WorkerResponse::ProveDone {
                    proof,
                    program_io,
                    proof_size,
                    compressed_proof_size,
                    num_cycles,
                    ..
                } => {
                    assert_eq!(proof_size, proof.len());
                    assert!(compressed_proof_size > 0);
                    assert!(num_cycles.is_some());
                    (proof, program_io)
                }
                other => panic!("unexpected response: {:?}", other),
            };

        let response = round_trip(
            &mut handle,
            WorkerRequest::Verify {
                program: ProgramId::Keccak,
                proof: proof.clone(),
                program_io: program_io.clone(),
            },
        )
        .await;
        assert!(matches!(response, WorkerResponse::VerifyDone { valid: true, .. }));

        let mut tampered = proof.to_vec();
        tampered[10] ^= 0xff;
        let response = round_trip(
            &mut handle,
            WorkerRequest::Verify {
                program: ProgramId::Keccak,
                proof: Bytes::from(tampered),
                program_io,
            },
        )
        .await;
        assert!(matches!(response, WorkerResponse::VerifyDone { valid: false, .. }));

        match round_trip(&mut handle, WorkerRequest::GetTrace).await {
            WorkerResponse::Trace { payload } => {
                let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
                let names: Vec<&str> = json["traceEvents"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|e| e["name"].as_str().unwrap())
                    .collect();
                assert_eq!(names, vec!["execute", "commit", "compress"]);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        let response = round_trip(&mut handle, WorkerRequest::ClearTrace).await;
        assert!(matches!(response, WorkerResponse::TraceCleared));
        let response = round_trip(&mut handle, WorkerRequest::GetTrace).await;
        assert!(matches!(response, WorkerResponse::Error { fatal: false, .. }));

        handle.terminate();
        assert_eq!(handle.send(WorkerRequest::GetTrace), Err(WorkerGone));
    }
}
