//! Error types for fnrun-process.

use crate::status::ProcessStatus;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for fnrun-process operations.
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Errors that can occur while supervising a child process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The executable could not be launched.
    #[error("spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: PathBuf,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// A piped stdio handle was not available after spawning.
    #[error("{0} pipe not captured")]
    Pipe(&'static str),

    /// No free port was found within the retry budget.
    #[error("no free port found after {attempts} attempts")]
    PortExhausted {
        /// Number of bind probes made
        attempts: u32,
    },

    /// The caller cancelled the readiness wait.
    #[error("readiness wait cancelled")]
    Cancelled,

    /// The readiness deadline passed before the child accepted connections.
    #[error("child not ready after {0:?}")]
    DeadlineExceeded(Duration),

    /// The configured readiness poll cap was reached.
    #[error("child not ready after {0} connection attempts")]
    PollLimitExceeded(u32),

    /// The child terminated before it accepted connections.
    #[error("process exited during boot: {0}")]
    ExitedDuringBoot(ProcessStatus),

    /// Killing the child failed.
    #[error("kill: {0}")]
    Kill(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
