//! Command-line and environment configuration.
//!
//! Every flag can also be set through an environment variable:
//!
//! | Variable | Flag | Default |
//! |----------|------|---------|
//! | `FNRUN_WORK_DIR` | `--work-dir` | `.` |
//! | `FNRUN_ENGINE` | `--engine` | `deno` |
//! | `FNRUN_PORT_BASE` | `--port-base` | `8000` |
//! | `FNRUN_BOOT_TIMEOUT_SECS` | `--boot-timeout-secs` | `30` (0 = no deadline) |
//! | `FNRUN_MAX_BOOT_POLLS` | `--max-boot-polls` | unset |
//! | `FNRUN_LOG` | `--log` | `info` |

use clap::Parser;
use fnrun_core::{CoreError, RunnerConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Run a JavaScript function and feed it one JSON event per stdin line.
#[derive(Debug, Parser)]
#[command(name = "fnrun", version)]
pub struct Cli {
    /// Function source file defining `handle(event)` and optionally `init(config)`
    pub source: PathBuf,

    /// JSON value passed to `init`
    #[arg(long, default_value = "{}")]
    pub init: String,

    /// Root for function directories and the engine cache
    #[arg(long, env = "FNRUN_WORK_DIR", default_value = ".")]
    pub work_dir: PathBuf,

    /// Execution engine binary
    #[arg(long, env = "FNRUN_ENGINE", default_value = "deno")]
    pub engine: PathBuf,

    /// First port of the allocation window
    #[arg(long, env = "FNRUN_PORT_BASE", default_value_t = 8000)]
    pub port_base: u16,

    /// Seconds to wait for the function to come up (0 = no deadline)
    #[arg(long, env = "FNRUN_BOOT_TIMEOUT_SECS", default_value_t = 30)]
    pub boot_timeout_secs: u64,

    /// Give up booting after this many readiness probes
    #[arg(long, env = "FNRUN_MAX_BOOT_POLLS")]
    pub max_boot_polls: Option<u32>,

    /// Log filter (error, warn, info, debug, trace or an EnvFilter directive)
    #[arg(long, env = "FNRUN_LOG", default_value = "info")]
    pub log: String,
}

impl Cli {
    /// Runner configuration for these arguments.
    pub fn runner_config(&self) -> Result<RunnerConfig, CoreError> {
        let mut builder = RunnerConfig::builder()
            .work_dir(&self.work_dir)
            .engine_path(&self.engine)
            .port_base(self.port_base);
        builder = match self.boot_timeout_secs {
            0 => builder.no_boot_timeout(),
            secs => builder.boot_timeout(Duration::from_secs(secs)),
        };
        if let Some(polls) = self.max_boot_polls {
            builder = builder.max_boot_polls(polls);
        }
        builder.build()
    }

    /// Parsed `--init` value.
    pub fn init_data(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.init)
    }
}
