//! # fnrun-process
//!
//! Child process supervision layer for fnrun function instances.
//! Everything here is independent of what the child actually runs.
//!
//! ## Quick Start
//!
//! ```no_run
//! use fnrun_process::{wait_ready, ChildProcess, PortAllocator, ReadinessOptions, SpawnSpec, TracingSink};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> fnrun_process::Result<()> {
//! let ports = PortAllocator::default();
//! let port = ports.allocate()?;
//!
//! let spec = SpawnSpec::new("python3")
//!     .arg("-m")
//!     .arg("http.server")
//!     .arg(port.to_string());
//! let child = ChildProcess::spawn(&spec, Arc::new(TracingSink::new("http.server")))?;
//!
//! wait_ready(
//!     ([127, 0, 0, 1], port).into(),
//!     &child.exit_watch(),
//!     &CancellationToken::new(),
//!     &ReadinessOptions {
//!         timeout: Some(Duration::from_secs(10)),
//!         ..Default::default()
//!     },
//! )
//! .await?;
//!
//! child.kill(Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Port Allocation**: Advisory random-probe port discovery without repeats
//! - **Supervision**: Isolated process group, piped output, exit tracking
//! - **Exit Status**: Running / succeeded / failed, written once, read anywhere
//! - **Readiness**: TCP polling raced against child exit and cancellation
//! - **Log Draining**: Per-stream line forwarding to a caller-supplied sink

mod drain;
mod error;
mod port;
mod readiness;
mod status;
mod supervisor;

pub use drain::{spawn_drain, LogSink, LogStream, NullSink, TracingSink};
pub use error::{ProcessError, Result};
pub use port::{PortAllocator, DEFAULT_MAX_ATTEMPTS, DEFAULT_PORT_BASE, DEFAULT_PORT_WINDOW};
pub use readiness::{wait_ready, ReadinessOptions, DEFAULT_POLL_INTERVAL};
pub use status::{ExitWatch, ProcessStatus};
pub use supervisor::{ChildProcess, SpawnSpec};
