//! Error types for the fastest-execution crate

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("strategy selection error: {0}")]
    StrategySelection(String),

    #[error("test timed out after {0:.1}s")]
    Timeout(f64),

    #[error("worker pool error: {0}")]
    WorkerPool(String),

    #[error("worker {worker_id} crashed: {reason}")]
    WorkerCrashed { worker_id: usize, reason: String },

    /// The only execution error that aborts a run outright. Exit code 2.
    #[error("no worker process could be spawned: {0}")]
    PoolFatal(String),

    #[error("IPC encode error: {0}")]
    IpcEncode(#[from] rmp_serde::encode::Error),

    #[error("IPC decode error: {0}")]
    IpcDecode(#[from] rmp_serde::decode::Error),

    #[error("frame exceeds max length ({0} bytes)")]
    FrameTooLarge(usize),

    #[error("core error: {0}")]
    Core(#[from] fastest_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
