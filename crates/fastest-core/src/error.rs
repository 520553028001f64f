use thiserror::Error;

/// The crate's error taxonomy. Only [`Error::PoolFatal`] aborts a run; the
/// rest materialize as diagnostics or per-test `error` outcomes upstream.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("failed to parse {path}: {reason}")]
    Discovery { path: String, reason: String },

    #[error("fixture resolution failed for {test_id}: {reason}")]
    FixtureResolution { test_id: String, reason: String },

    #[error("worker IPC error: {0}")]
    WorkerIpc(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no worker process could be spawned: {0}")]
    PoolFatal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
