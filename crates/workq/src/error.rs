//! Error types

use crate::worker::WorkerState;

/// Worker lifecycle failures
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker {worker} cannot start from state {state:?}")]
    InvalidState { worker: String, state: WorkerState },
}

/// A worker pool could not bring every worker online.
///
/// Workers before `index` are running; the pool still has to be torn down.
#[derive(Debug, thiserror::Error)]
#[error("Worker {index} of {workers} failed to start: {source}")]
pub struct PoolSetupError {
    pub index: usize,
    pub workers: usize,
    #[source]
    pub source: WorkerError,
}

/// Umbrella error for the crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Memory pool error: {0}")]
    Pool(#[from] workq_mempool::PoolError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Setup error: {0}")]
    Setup(#[from] PoolSetupError),
}

/// Result alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
