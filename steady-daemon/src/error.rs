use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the launcher, the worker runtime and its files.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Identity(#[from] steady_core::IdentityError),

    #[error(transparent)]
    Exec(#[from] steady_core::ExecError),

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("another instance holds {path}{}", holder_suffix(.holder))]
    AlreadyRunning { path: PathBuf, holder: Option<u32> },

    #[error("gave up waiting {waited_secs}s for {path}")]
    LockTimeout { path: PathBuf, waited_secs: u64 },

    #[error("log file not found: {path}")]
    LogNotFound { path: PathBuf },

    #[error("handoff already in progress")]
    HandoffInProgress,

    #[error("worker runtime error: {0}")]
    Runtime(String),
}

fn holder_suffix(holder: &Option<u32>) -> String {
    (*holder)
        .map(|pid| format!(" (pid {pid})"))
        .unwrap_or_default()
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
