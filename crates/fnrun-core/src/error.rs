//! Error types for fnrun-core.

use thiserror::Error;

/// Result type alias for fnrun-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while booting or invoking a function instance.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error from fnrun-process (spawn, port allocation, boot/readiness)
    #[error("process: {0}")]
    Process(#[from] fnrun_process::ProcessError),

    /// Filesystem step of materialization failed
    #[error("{op}: {source}")]
    Setup {
        /// Operation that failed
        op: &'static str,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Wrapper template could not be rendered
    #[error("render template: {0}")]
    Template(String),

    /// A value could not be serialized to JSON
    #[error("serialize {what}: {source}")]
    Serialize {
        /// What was being serialized
        what: &'static str,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// Invalid runner configuration
    #[error("invalid config: {0}")]
    Config(String),

    /// The function process already terminated
    #[error("process exited")]
    ProcessExited,

    /// The HTTP request could not be constructed
    #[error("invoke call: {0}")]
    Request(String),

    /// Network-level failure talking to the function process
    #[error("function http request: {0}")]
    Transport(#[source] hyper::Error),

    /// The function server answered with a non-2xx status
    #[error("HTTP error {status}: {body}")]
    Http {
        /// Response status code
        status: u16,
        /// Raw response body
        body: String,
    },

    /// The response body was not valid JSON
    #[error("unmarshal response: {0}")]
    Decode(#[source] serde_json::Error),

    /// The handler threw; message and stack as reported by the runtime
    #[error("runtime error: {message}\n{stack}")]
    Runtime {
        /// Error message
        message: String,
        /// Stack trace, possibly empty
        stack: String,
    },

    /// The handler failed with an error payload that is not `{message, stack}`
    #[error("runtime error: {0}")]
    RuntimeRaw(String),

    /// The caller cancelled the invocation
    #[error("invocation cancelled")]
    Cancelled,
}

impl CoreError {
    /// True for failures reported by the function's own code rather than by
    /// the transport or the supervisor.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Runtime { .. } | Self::RuntimeRaw(_))
    }
}
