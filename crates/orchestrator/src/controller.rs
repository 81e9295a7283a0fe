//! Orchestration controller
//!
//! Mediates between the request surface and the compute worker. The worker is
//! treated as a serial server: a single-permit gate is held for the whole of
//! every round trip, so at most one of {load, prove, verify} is ever in flight.
//! Callers that arrive while the gate is held wait their turn in arrival order.
//!
//! Every operation that talks to the worker runs on its own task and callers
//! await its outcome. A caller that goes away mid-operation therefore never
//! leaves a request unanswered in the channel: the task still reads the
//! response and records the result.
//!
//! Program loads are coalesced. The first caller for an unloaded program
//! spawns the load and every caller, first included, waits on that attempt's
//! watch channel, so all of them see the same outcome.

use prover_common::{
    ProgramId, ProofArtifact, ProofMetrics, ProveInput, VerificationResult, WorkerRequest,
    WorkerResponse,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, Semaphore, SemaphorePermit};
use tracing::{debug, error, info, warn};

use crate::artifacts::{self, ArtifactSource};
use crate::state::{LoadSlot, LoadState, Session, SessionSnapshot, SessionStatus};
use crate::transport::Transport;
use crate::ControllerError;

/// A downloadable execution trace
#[derive(Debug, Clone)]
pub struct TraceExport {
    pub file_name: String,
    pub payload: String,
}

/// Session-scoped controller. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

struct Inner {
    session: Mutex<Session>,
    /// Admission gate: one permit, held across each worker round trip
    gate: Semaphore,
    transport: tokio::sync::Mutex<Transport>,
    source: Arc<dyn ArtifactSource>,
    dispatched: AtomicU64,
    /// Set by `terminate`; the worker is shut down once the transport is free
    terminated: AtomicBool,
}

/// Held while an operation owns the worker; marks the session busy
struct Admission<'a> {
    session: &'a Mutex<Session>,
    _permit: SemaphorePermit<'a>,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        let mut session = lock(self.session);
        if session.status == SessionStatus::Busy {
            session.status = SessionStatus::Ready;
        }
    }
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Controller {
    pub fn new(worker: compute_worker::WorkerHandle, source: Arc<dyn ArtifactSource>) -> Self {
        Self {
            inner: Arc::new(Inner {
                session: Mutex::new(Session::new()),
                gate: Semaphore::new(1),
                transport: tokio::sync::Mutex::new(Transport::new(worker)),
                source,
                dispatched: AtomicU64::new(0),
                terminated: AtomicBool::new(false),
            }),
        }
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn status(&self) -> SessionStatus {
        self.session().status.clone()
    }

    pub fn status_text(&self) -> String {
        self.session().status_text.clone()
    }

    pub fn load_state(&self, program: ProgramId) -> LoadState {
        self.session()
            .program(program)
            .map(|s| s.load.state())
            .unwrap_or(LoadState::Unloaded)
    }

    /// Most recent proof for `program`
    pub fn proof(&self, program: ProgramId) -> Option<ProofArtifact> {
        self.session()
            .program(program)
            .and_then(|s| s.proof.clone())
    }

    /// Verification result of the current proof, if it has been verified
    pub fn verification(&self, program: ProgramId) -> Option<VerificationResult> {
        self.session()
            .program(program)
            .and_then(|s| s.current_verification())
    }

    pub fn logs(&self, program: ProgramId) -> Vec<String> {
        self.session()
            .program(program)
            .map(|s| s.log.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session().snapshot()
    }

    /// Requests sent to the worker so far, of any kind
    pub fn dispatch_count(&self) -> u64 {
        self.inner.dispatched.load(Ordering::SeqCst)
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Initialize the engine with `num_threads` workers. Moves the session
    /// from `Initializing` to `Ready`, or to `Failed` if the engine can't start.
    pub async fn initialize(&self, num_threads: usize) -> Result<usize, ControllerError> {
        self.check_initializing()?;
        self.session().status_text = format!("Initializing ({} threads)...", num_threads);
        info!("Initializing compute engine ({} threads)", num_threads);

        self.detached(move |c| async move { c.run_initialize(num_threads).await })
            .await
    }

    async fn run_initialize(&self, num_threads: usize) -> Result<usize, ControllerError> {
        let _permit = self.acquire_gate().await?;
        // Another caller may have finished initializing while we queued
        self.check_initializing()?;

        match self.dispatch(WorkerRequest::Init { num_threads }).await? {
            WorkerResponse::InitDone { num_threads } => {
                let mut session = self.session();
                session.status = SessionStatus::Ready;
                session.status_text = "Ready".to_string();
                session.num_threads = Some(num_threads);
                session.reset_programs();
                info!("Engine ready with {} threads", num_threads);
                Ok(num_threads)
            }
            WorkerResponse::Error { message, .. } => {
                Err(self.fail(format!("Engine initialization failed: {}", message)))
            }
            other => Err(self.protocol_violation("init-done", &other)),
        }
    }

    /// Terminate the worker. The session cannot be used afterwards.
    ///
    /// Returns without waiting for an operation already running in the
    /// worker; that operation shuts the worker down when its response
    /// arrives.
    pub async fn terminate(&self) {
        self.inner.terminated.store(true, Ordering::SeqCst);
        self.fail("Compute worker terminated".to_string());
        match self.inner.transport.try_lock() {
            Ok(mut transport) => transport.shutdown().await,
            Err(_) => info!("Compute worker busy; it stops after the current operation"),
        }
    }

    // ---------------------------------------------------------------------
    // Program loading
    // ---------------------------------------------------------------------

    /// Make sure `program`'s preprocessing is loaded in the worker.
    ///
    /// Idempotent: returns at once when loaded, joins the in-flight attempt
    /// when loading, and otherwise starts one.
    pub async fn ensure_loaded(&self, program: ProgramId) -> Result<(), ControllerError> {
        self.check_accepting()?;

        let mut completion = {
            let mut session = self.session();
            let state = session.program_mut(program);
            match &state.load {
                LoadSlot::Ready => return Ok(()),
                LoadSlot::Loading(completion) => {
                    debug!("Joining in-flight load of {}", program);
                    completion.clone()
                }
                LoadSlot::Unloaded => {
                    let (done, completion) = watch::channel(None);
                    state.load = LoadSlot::Loading(completion.clone());
                    state.push_log(program, "Loading preprocessing...");

                    // The load runs to completion even if every caller goes away
                    let controller = self.clone();
                    tokio::spawn(async move {
                        let outcome = controller.load_program(program).await;
                        controller.finish_load(program, outcome, done);
                    });
                    completion
                }
            }
        };

        let outcome = completion
            .wait_for(Option::is_some)
            .await
            .map(|outcome| (*outcome).clone())
            .ok()
            .flatten();

        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(cause)) => Err(ControllerError::LoadFailed { program, cause }),
            None => Err(ControllerError::LoadFailed {
                program,
                cause: Arc::new(ControllerError::Transport(
                    "load ended without reporting an outcome".to_string(),
                )),
            }),
        }
    }

    async fn load_program(&self, program: ProgramId) -> Result<(), ControllerError> {
        let _busy = self
            .admit(format!("Loading {} preprocessing...", program))
            .await?;

        let artifacts = artifacts::fetch_program(self.inner.source.as_ref(), program).await?;

        {
            let mut session = self.session();
            let state = session.program_mut(program);
            state.push_log(
                program,
                format!(
                    "Prover preprocessing: {:.2} MB",
                    mib(artifacts.prover_preprocessing.len())
                ),
            );
            state.push_log(
                program,
                format!(
                    "Verifier preprocessing: {:.2} MB",
                    mib(artifacts.verifier_preprocessing.len())
                ),
            );
            state.push_log(
                program,
                format!("Guest ELF: {:.2} KB", artifacts.elf_bytes.len() as f64 / 1024.0),
            );
            state.push_log(program, "Initializing prover & verifier...");
        }

        // The artifact buffers move into the request here
        match self
            .dispatch(WorkerRequest::LoadProgram { program, artifacts })
            .await?
        {
            WorkerResponse::ProgramLoaded { program: loaded } if loaded == program => Ok(()),
            WorkerResponse::Error { message, fatal } => Err(self.engine_error(message, fatal)),
            other => Err(self.protocol_violation(&format!("program-loaded for {}", program), &other)),
        }
    }

    fn finish_load(
        &self,
        program: ProgramId,
        outcome: Result<(), ControllerError>,
        done: watch::Sender<crate::state::LoadOutcome>,
    ) {
        let outcome = outcome.map_err(Arc::new);
        {
            let mut session = self.session();
            let failed = session.is_failed();
            match &outcome {
                Ok(()) => {
                    session.program_mut(program).load = LoadSlot::Ready;
                    session.program_mut(program).push_log(program, "Ready");
                    if !failed {
                        session.status_text = "Ready".to_string();
                    }
                }
                Err(e) => {
                    warn!("Load of {} failed: {}", program, e);
                    session.program_mut(program).load = LoadSlot::Unloaded;
                    session
                        .program_mut(program)
                        .push_log(program, format!("Error: {}", e));
                    if !failed {
                        session.status_text = format!("Error: {}", e);
                    }
                }
            }
        }
        done.send_replace(Some(outcome));
    }

    // ---------------------------------------------------------------------
    // Prove / verify
    // ---------------------------------------------------------------------

    /// Prove a sha2 execution over `message`
    pub async fn prove_sha2(&self, message: &[u8]) -> Result<ProofArtifact, ControllerError> {
        self.prove(ProveInput::Sha2 {
            input: message.to_vec(),
        })
        .await
    }

    /// Prove a keccak chain of `num_iters` rounds seeded from `message`
    pub async fn prove_keccak(
        &self,
        message: &str,
        num_iters: u32,
    ) -> Result<ProofArtifact, ControllerError> {
        match ProveInput::keccak(message, num_iters) {
            Ok(input) => {
                let description = format!(
                    "Proving Keccak chain(\"{}\", {} iters)",
                    message, num_iters
                );
                self.prove_described(input, description).await
            }
            Err(e) => {
                self.log(ProgramId::Keccak, e.to_string());
                Err(e.into())
            }
        }
    }

    /// Prove `input`, loading its program first if needed.
    ///
    /// Out-of-bounds input is rejected without contacting the worker.
    pub async fn prove(&self, input: ProveInput) -> Result<ProofArtifact, ControllerError> {
        let description = input.describe();
        self.prove_described(input, description).await
    }

    async fn prove_described(
        &self,
        input: ProveInput,
        description: String,
    ) -> Result<ProofArtifact, ControllerError> {
        let program = input.program();
        if let Err(e) = input.validate() {
            self.log(program, e.to_string());
            return Err(e.into());
        }
        self.check_accepting()?;

        self.detached(move |c| async move {
            let result = c.run_prove(input, description).await;
            if let Err(e) = &result {
                c.report(program, e);
            }
            result
        })
        .await
    }

    async fn run_prove(
        &self,
        input: ProveInput,
        description: String,
    ) -> Result<ProofArtifact, ControllerError> {
        let program = input.program();
        self.ensure_loaded(program).await?;

        let _busy = self.admit("Proving...").await?;
        self.log(program, description);

        match self.dispatch(WorkerRequest::Prove(input)).await? {
            WorkerResponse::ProveDone {
                program: proved,
                proof,
                proof_size,
                compressed_proof_size,
                program_io,
                num_cycles,
                peak_memory,
                elapsed,
            } if proved == program => {
                let metrics = ProofMetrics {
                    elapsed,
                    proof_size,
                    compressed_proof_size,
                    num_cycles,
                    peak_memory,
                };
                let mut session = self.session();
                session.status_text = "Proof generated!".to_string();
                let state = session.program_mut(program);
                let artifact = state.store_proof(program, proof, program_io, metrics);
                for line in artifact.metrics.log_lines() {
                    state.push_log(program, line);
                }
                Ok(artifact)
            }
            WorkerResponse::Error { message, fatal } => Err(self.engine_error(message, fatal)),
            other => Err(self.protocol_violation(&format!("prove-done for {}", program), &other)),
        }
    }

    /// Verify the stored proof for `program`. The proof stays stored and
    /// can be verified again.
    pub async fn verify(&self, program: ProgramId) -> Result<VerificationResult, ControllerError> {
        self.check_accepting()?;
        if self.proof(program).is_none() {
            self.log(program, "No proof to verify. Generate a proof first.");
            return Err(ControllerError::NoProof(program));
        }

        self.detached(move |c| async move {
            let result = c.run_verify(program).await;
            if let Err(e) = &result {
                c.report(program, e);
            }
            result
        })
        .await
    }

    async fn run_verify(&self, program: ProgramId) -> Result<VerificationResult, ControllerError> {
        let _busy = self.admit("Verifying...").await?;
        // Read under admission so the proof can't change before dispatch
        let artifact = self
            .proof(program)
            .ok_or(ControllerError::NoProof(program))?;
        self.log(program, "Starting verification...");

        let request = WorkerRequest::Verify {
            program,
            proof: artifact.proof.clone(),
            program_io: artifact.program_io.clone(),
        };
        match self.dispatch(request).await? {
            WorkerResponse::VerifyDone {
                program: verified,
                valid,
                elapsed,
            } if verified == program => {
                let result = VerificationResult {
                    generation: artifact.generation,
                    valid,
                    elapsed,
                };
                let mut session = self.session();
                session.status_text = if valid {
                    "Verification passed!".to_string()
                } else {
                    "Verification failed!".to_string()
                };
                let state = session.program_mut(program);
                state.record_verification(result);
                state.push_log(
                    program,
                    format!("Verification completed in {:.2}s", elapsed.as_secs_f64()),
                );
                state.push_log(
                    program,
                    format!("Result: {}", if valid { "VALID" } else { "INVALID" }),
                );
                Ok(result)
            }
            WorkerResponse::Error { message, fatal } => Err(self.engine_error(message, fatal)),
            other => Err(self.protocol_violation(&format!("verify-done for {}", program), &other)),
        }
    }

    // ---------------------------------------------------------------------
    // Trace
    // ---------------------------------------------------------------------

    /// Fetch the execution trace of the most recent proof.
    ///
    /// Engine-side failures leave the session untouched.
    pub async fn fetch_trace(&self) -> Result<TraceExport, ControllerError> {
        self.check_accepting()?;
        self.detached(|c| async move { c.run_fetch_trace().await })
            .await
    }

    async fn run_fetch_trace(&self) -> Result<TraceExport, ControllerError> {
        let _permit = self.acquire_gate().await?;

        match self.dispatch(WorkerRequest::GetTrace).await? {
            WorkerResponse::Trace { payload } => {
                let file_name = format!("trace-{}.json", unix_millis());
                info!("Trace ready: {} ({} bytes)", file_name, payload.len());
                Ok(TraceExport { file_name, payload })
            }
            WorkerResponse::Error { message, .. } => {
                warn!("Trace unavailable: {}", message);
                Err(ControllerError::Trace(message))
            }
            other => Err(self.protocol_violation("trace", &other)),
        }
    }

    /// Discard the worker's recorded trace
    pub async fn clear_trace(&self) -> Result<(), ControllerError> {
        self.check_accepting()?;
        self.detached(|c| async move { c.run_clear_trace().await })
            .await
    }

    async fn run_clear_trace(&self) -> Result<(), ControllerError> {
        let _permit = self.acquire_gate().await?;

        match self.dispatch(WorkerRequest::ClearTrace).await? {
            WorkerResponse::TraceCleared => Ok(()),
            WorkerResponse::Error { message, .. } => Err(ControllerError::Trace(message)),
            other => Err(self.protocol_violation("trace-cleared", &other)),
        }
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    /// Run `op` on its own task and wait for it. Dropping the caller leaves
    /// the task running to completion.
    async fn detached<T, F, Fut>(&self, op: F) -> Result<T, ControllerError>
    where
        F: FnOnce(Controller) -> Fut,
        Fut: Future<Output = Result<T, ControllerError>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(op(self.clone())).await.map_err(|e| {
            error!("Controller task ended abnormally: {}", e);
            ControllerError::Transport(format!("operation task ended abnormally: {}", e))
        })?
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        lock(&self.inner.session)
    }

    fn log(&self, program: ProgramId, line: impl Into<String>) {
        self.session().program_mut(program).push_log(program, line);
    }

    fn check_initializing(&self) -> Result<(), ControllerError> {
        match &self.session().status {
            SessionStatus::Initializing => Ok(()),
            SessionStatus::Failed(reason) => Err(ControllerError::SessionFailed(reason.clone())),
            SessionStatus::Ready | SessionStatus::Busy => Err(ControllerError::AlreadyInitialized),
        }
    }

    fn check_accepting(&self) -> Result<(), ControllerError> {
        match &self.session().status {
            SessionStatus::Ready | SessionStatus::Busy => Ok(()),
            SessionStatus::Initializing => Err(ControllerError::Initializing),
            SessionStatus::Failed(reason) => Err(ControllerError::SessionFailed(reason.clone())),
        }
    }

    fn failure_reason(&self) -> String {
        match &self.session().status {
            SessionStatus::Failed(reason) => reason.clone(),
            _ => "admission gate closed".to_string(),
        }
    }

    /// Wait for the gate without marking the session busy
    async fn acquire_gate(&self) -> Result<SemaphorePermit<'_>, ControllerError> {
        self.inner
            .gate
            .acquire()
            .await
            .map_err(|_| ControllerError::SessionFailed(self.failure_reason()))
    }

    /// Wait for the gate and mark the session busy until the admission drops
    async fn admit(&self, activity: impl Into<String>) -> Result<Admission<'_>, ControllerError> {
        let permit = self.acquire_gate().await?;
        let mut session = self.session();
        if let SessionStatus::Failed(reason) = &session.status {
            return Err(ControllerError::SessionFailed(reason.clone()));
        }
        session.status = SessionStatus::Busy;
        session.status_text = activity.into();
        Ok(Admission {
            session: &self.inner.session,
            _permit: permit,
        })
    }

    /// One worker round trip. Must be called with the gate held.
    async fn dispatch(&self, request: WorkerRequest) -> Result<WorkerResponse, ControllerError> {
        let kind = request.kind();
        let mut transport = self.inner.transport.lock().await;
        self.inner.dispatched.fetch_add(1, Ordering::SeqCst);
        debug!("Dispatching {}", kind);

        let result = transport.round_trip(request).await;
        if self.inner.terminated.load(Ordering::SeqCst) {
            transport.shutdown().await;
        }

        match result {
            Ok(response) => {
                debug!("Received {} for {}", response.kind(), kind);
                Ok(response)
            }
            Err(e) => {
                let reason = e.to_string();
                self.fail(format!("Compute worker unreachable: {}", reason));
                Err(ControllerError::Transport(reason))
            }
        }
    }

    /// Move to `Failed`. The first reason wins; queued callers are released.
    fn fail(&self, reason: String) -> ControllerError {
        let mut session = self.session();
        if let SessionStatus::Failed(existing) = &session.status {
            return ControllerError::SessionFailed(existing.clone());
        }
        error!("Session failed: {}", reason);
        session.status = SessionStatus::Failed(reason.clone());
        session.status_text = format!("Error: {}", reason);
        self.inner.gate.close();
        ControllerError::SessionFailed(reason)
    }

    fn engine_error(&self, message: String, fatal: bool) -> ControllerError {
        if fatal {
            self.fail(message.clone());
        }
        ControllerError::Engine { message, fatal }
    }

    fn protocol_violation(&self, expected: &str, got: &WorkerResponse) -> ControllerError {
        let reason = format!("expected {}, got {}", expected, got.kind());
        self.fail(format!("Protocol violation: {}", reason));
        ControllerError::Protocol(reason)
    }

    /// Surface a failed operation in the program log and status text
    fn report(&self, program: ProgramId, err: &ControllerError) {
        // Load failures were already reported by the load itself
        if matches!(err, ControllerError::LoadFailed { .. }) {
            return;
        }
        let mut session = self.session();
        if !session.is_failed() {
            session.status_text = format!("Error: {}", err);
        }
        session
            .program_mut(program)
            .push_log(program, format!("Error: {}", err));
    }
}

fn mib(len: usize) -> f64 {
    len as f64 / 1024.0 / 1024.0
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
