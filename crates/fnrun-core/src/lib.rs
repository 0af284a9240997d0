//! # fnrun-core
//!
//! Lifecycle of short-lived function processes.
//!
//! A function is a piece of JavaScript defining an optional `init(config)`
//! and an optional `handle(event)`. This crate writes it to disk, starts a
//! Deno process serving it on a loopback port, waits until the server is
//! up, and then forwards JSON events to it one at a time until closed.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    fnrun-core (host)                     │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ FunctionRunner  │────▶│  PortAllocator           │   │
//! │  │   - start()     │     │  (from fnrun-process)    │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │           │                                              │
//! │           ▼                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ FunctionInstance│────▶│  ChildProcess            │   │
//! │  │  - invoke()     │     │  exit watch + log drains │   │
//! │  │  - close()      │     └──────────────────────────┘   │
//! │  └─────────────────┘                │ stdout/stderr     │
//! │           │                         ▼                   │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ FunctionClient  │────▶│  LogSink                 │   │
//! │  │  - call()       │     └──────────────────────────┘   │
//! │  └─────────────────┘                                    │
//! │           │ HTTP POST /                                  │
//! └───────────┼──────────────────────────────────────────────┘
//!             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  deno run --allow-net --allow-env function_server.ts     │
//! │  <work_dir>/.cache/function-<hash>/                      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use fnrun_core::{FunctionRunner, RunnerConfig};
//! use fnrun_process::TracingSink;
//! use serde_json::json;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> fnrun_core::Result<()> {
//! let runner = FunctionRunner::new(
//!     RunnerConfig::builder()
//!         .work_dir("/var/lib/fnrun")
//!         .engine_path("/usr/local/bin/deno")
//!         .build()?,
//! )?;
//!
//! let code = r#"
//!     let token;
//!     function init(cfg) { token = cfg.token; }
//!     function handle(event) { return { token, name: event.name }; }
//! "#;
//!
//! let instance = runner
//!     .start(
//!         Arc::new(TracingSink::new("greeter")),
//!         &json!({"token": "1234"}),
//!         code,
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//!
//! let result = instance.invoke(&json!({"name": "Pete"})).await?;
//! assert_eq!(result, json!({"token": "1234", "name": "Pete"}));
//!
//! instance.close().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod hash;
mod instance;
mod lease;
mod materialize;
mod runner;
mod template;

#[cfg(test)]
mod test_support;

pub use client::{classify, FunctionClient, RemoteError};
pub use config::{RunnerConfig, RunnerConfigBuilder, CACHE_DIR};
pub use error::{CoreError, Result};
pub use hash::FunctionHash;
pub use instance::FunctionInstance;
pub use lease::DirRegistry;
pub use materialize::{function_dir, materialize};
pub use runner::FunctionRunner;
pub use template::{RuntimeTemplate, FUNCTION_FILE, SERVER_FILE};
