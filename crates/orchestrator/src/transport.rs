//! Ordered request/response channel to the compute worker

use compute_worker::WorkerHandle;
use prover_common::{WorkerRequest, WorkerResponse};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("compute worker disconnected")]
    Disconnected,

    #[error("compute worker was terminated")]
    Terminated,
}

pub struct Transport {
    worker: Option<WorkerHandle>,
}

impl Transport {
    pub fn new(worker: WorkerHandle) -> Self {
        Self {
            worker: Some(worker),
        }
    }

    /// Send one request and wait for the next response.
    ///
    /// Callers must not have another request in flight: with a single
    /// outstanding request the next response is the answer to this one.
    pub async fn round_trip(
        &mut self,
        request: WorkerRequest,
    ) -> Result<WorkerResponse, TransportError> {
        let worker = self.worker.as_mut().ok_or(TransportError::Terminated)?;
        worker
            .send(request)
            .map_err(|_| TransportError::Disconnected)?;
        worker.recv().await.map_err(|_| TransportError::Disconnected)
    }

    /// Close the channel and wait for the worker thread to exit
    pub async fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            info!("Shutting down compute worker");
            if let Err(e) = tokio::task::spawn_blocking(move || worker.terminate()).await {
                warn!("Failed to join compute worker: {}", e);
            }
        }
    }
}
