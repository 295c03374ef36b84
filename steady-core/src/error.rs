//! Error types for steady-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{PeerSet, Signal};

/// Failure to derive part of the instance identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The executable directory could not be resolved at startup.
    #[error("executable directory of `{program}` is unresolved")]
    ExecDirUnresolved { program: String },
}

/// Errors raised at the command-execution boundary.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The external tool could not be started at all.
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The external tool ran and reported failure.
    #[error("`{command}` exited with {status}: {output}")]
    Failed {
        command: String,
        status: String,
        output: String,
    },

    /// The output file for a detached process could not be opened.
    #[error("failed to open output file {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A command template referenced a value that is not available.
    #[error("cannot render command: {0}")]
    Template(#[from] IdentityError),
}

/// Errors from the lifecycle controller.
///
/// The first three variants are policy decisions taken from the peer set
/// cardinality alone; the rest wrap failures of the external tools.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("process not running")]
    NotRunning,

    #[error("process already transitioning (peers {peers})")]
    AlreadyTransitioning { peers: PeerSet },

    #[error("process already reloading (peers {peers})")]
    AlreadyReloading { peers: PeerSet },

    #[error("failed to query running processes: {0}")]
    PeerQuery(#[source] ExecError),

    #[error("failed to deliver SIG{signal} to {pids}: {source}")]
    Signal {
        signal: Signal,
        pids: String,
        #[source]
        source: ExecError,
    },
}

/// Errors from the update pipeline. Each variant names the stage that aborted.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The pull ran but reported no change; carries the trimmed tool output.
    #[error("{0}")]
    NothingToUpdate(String),

    #[error("fetch failed: {0}")]
    Fetch(#[source] ExecError),

    #[error("build failed: {0}")]
    Compile(#[source] ExecError),

    #[error("reload failed: {0}")]
    Reload(#[from] LifecycleError),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Errors while loading [`crate::Settings`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidOverride {
        key: &'static str,
        value: String,
        reason: String,
    },
}
