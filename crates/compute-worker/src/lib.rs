//! Compute Worker
//!
//! The isolated computation context behind the orchestrator. A single
//! long-lived OS thread owns the proving engine, every loaded program's
//! preprocessing state, and a thread pool sized by the `init` request.
//!
//! **Components:**
//! - `engine`: the `Engine` seam the worker drives
//! - `hash_engine`: deterministic development engine used by the binary and tests
//! - `trace`: Chrome-format execution trace of the most recent proof
//! - `worker`: the request loop and the channel endpoints handed to the orchestrator
//!
//! Requests are answered strictly in arrival order. The worker never runs two
//! engine operations at once; one operation may still fan out across the pool.

pub mod engine;
pub mod hash_engine;
pub mod trace;
pub mod worker;

pub use engine::{Engine, EngineError, ProveOutput};
pub use hash_engine::HashCommitEngine;
pub use trace::TraceRecorder;
pub use worker::{spawn, WorkerGone, WorkerHandle};
