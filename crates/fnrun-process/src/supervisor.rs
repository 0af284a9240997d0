//! Child process launch, exit tracking, and kill.

use crate::drain::{spawn_drain, LogSink, LogStream};
use crate::error::{ProcessError, Result};
use crate::status::{ExitWatch, ProcessStatus};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// What to launch and with which environment.
///
/// # Example
///
/// ```
/// use fnrun_process::SpawnSpec;
///
/// let spec = SpawnSpec::new("/usr/local/bin/deno")
///     .arg("run")
///     .arg("--allow-net")
///     .env("NO_COLOR", "1")
///     .clear_env(true);
/// assert_eq!(spec.args().len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    program: PathBuf,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
    clear_env: bool,
}

impl SpawnSpec {
    /// Start a spec for `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            clear_env: false,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set one environment variable for the child.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Start the child with an empty environment plus the variables set here.
    pub fn clear_env(mut self, clear: bool) -> Self {
        self.clear_env = clear;
        self
    }

    /// Arguments after the program.
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if self.clear_env {
            cmd.env_clear();
        }
        cmd.envs(self.env.iter().map(|(k, v)| (k, v)));
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group: terminal signals aimed at us never reach the child.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

/// A running child whose exit is tracked by a background waiter task.
///
/// Dropping the handle kills the child.
#[derive(Debug)]
pub struct ChildProcess {
    pid: Option<u32>,
    exit: ExitWatch,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    drains: Mutex<Vec<JoinHandle<()>>>,
}

impl ChildProcess {
    /// Launch the child described by `spec` and start draining its output
    /// into `sink`.
    ///
    /// Three tasks are started: the exit waiter and one drain per output
    /// stream. Must be called from within a Tokio runtime.
    pub fn spawn(spec: &SpawnSpec, sink: Arc<dyn LogSink>) -> Result<Self> {
        tracing::debug!(
            program = %spec.program.display(),
            args = ?spec.args,
            "Spawning child process"
        );

        let mut child = spec
            .command()
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: spec.program.clone(),
                source,
            })?;
        let pid = child.id();

        // Both handles are piped in `command()`; a missing one means the
        // child is useless, and `kill_on_drop` reaps it on the way out.
        let stdout = child.stdout.take().ok_or(ProcessError::Pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(ProcessError::Pipe("stderr"))?;

        let drains = vec![
            spawn_drain(stdout, LogStream::Stdout, Arc::clone(&sink)),
            spawn_drain(stderr, LogStream::Stderr, sink),
        ];

        let (notifier, exit) = ExitWatch::channel();
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let exited = tokio::select! {
                result = child.wait() => Some(result),
                // Either an explicit kill or the handle was dropped.
                _ = &mut kill_rx => None,
            };
            let result = match exited {
                Some(result) => result,
                None => {
                    if let Err(e) = child.start_kill() {
                        tracing::debug!(?pid, error = %e, "Kill signal not delivered");
                    }
                    child.wait().await
                }
            };
            let status = match result {
                Ok(status) => ProcessStatus::from(status),
                Err(e) => ProcessStatus::Failed(format!("wait failed: {e}")),
            };
            tracing::debug!(?pid, %status, "Child process exited");
            notifier.notify(status);
        });

        tracing::info!(?pid, program = %spec.program.display(), "Child process started");

        Ok(Self {
            pid,
            exit,
            kill_tx: Mutex::new(Some(kill_tx)),
            drains: Mutex::new(drains),
        })
    }

    /// OS process id, if the child had not already been reaped at spawn.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// A reader for the child's exit status.
    pub fn exit_watch(&self) -> ExitWatch {
        self.exit.clone()
    }

    /// Current status snapshot.
    pub fn status(&self) -> ProcessStatus {
        self.exit.current()
    }

    /// True once the child has been observed to exit.
    pub fn has_exited(&self) -> bool {
        self.exit.has_exited()
    }

    /// Force-kill the child and wait up to `timeout` for it to be reaped
    /// and for its output drains to finish.
    ///
    /// Killing an already exited child is a no-op that returns its status.
    pub async fn kill(&self, timeout: Duration) -> Result<ProcessStatus> {
        let start = Instant::now();

        let kill_tx = self
            .kill_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(tx) = kill_tx {
            tracing::debug!(pid = ?self.pid, "Killing child process");
            // The waiter may have already finished; that is fine.
            let _ = tx.send(());
        }

        let status = tokio::time::timeout(timeout, self.exit.wait())
            .await
            .map_err(|_| {
                tracing::warn!(pid = ?self.pid, ?timeout, "Child did not exit after kill");
                ProcessError::Kill(format!("pid {:?} still running after {timeout:?}", self.pid))
            })?;

        let drains: Vec<_> = self
            .drains
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for handle in drains {
            let remaining = timeout.saturating_sub(start.elapsed());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                tracing::warn!(pid = ?self.pid, "Log drain still running after kill");
            }
        }

        tracing::debug!(
            pid = ?self.pid,
            %status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Child process killed"
        );
        Ok(status)
    }
}
