//! Tri-state exit status shared between the exit-waiter and its readers.

use std::fmt;
use std::process::ExitStatus;
use tokio::sync::watch;

/// Lifecycle status of a supervised child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Child has not exited yet.
    Running,
    /// Child exited with a zero status.
    Succeeded,
    /// Child exited with a non-zero status, was killed by a signal, or
    /// could not be waited on.
    Failed(String),
}

impl ProcessStatus {
    /// True while the child has not been observed to exit.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "exited successfully"),
            Self::Failed(reason) => write!(f, "exited with error: {reason}"),
        }
    }
}

impl From<ExitStatus> for ProcessStatus {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            return Self::Succeeded;
        }
        if let Some(code) = status.code() {
            return Self::Failed(format!("exit code {code}"));
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Failed(format!("killed by signal {signal}"));
            }
        }
        Self::Failed(status.to_string())
    }
}

/// Write side of the exit status. Consumed by the single write.
#[derive(Debug)]
pub(crate) struct ExitNotifier(watch::Sender<ProcessStatus>);

impl ExitNotifier {
    /// Record the final status. Never blocks, even with no readers left.
    pub(crate) fn notify(self, status: ProcessStatus) {
        self.0.send_replace(status);
    }
}

/// Read side of a child's exit status. Cheap to clone; any number of
/// readers may observe the same transition.
#[derive(Debug, Clone)]
pub struct ExitWatch(watch::Receiver<ProcessStatus>);

impl ExitWatch {
    /// Create a connected notifier/watch pair starting in `Running`.
    pub(crate) fn channel() -> (ExitNotifier, ExitWatch) {
        let (tx, rx) = watch::channel(ProcessStatus::Running);
        (ExitNotifier(tx), ExitWatch(rx))
    }

    /// Snapshot of the current status without waiting.
    pub fn current(&self) -> ProcessStatus {
        self.0.borrow().clone()
    }

    /// True once the exit-waiter has recorded a terminal status.
    pub fn has_exited(&self) -> bool {
        !self.0.borrow().is_running()
    }

    /// Wait until the child leaves the `Running` state.
    pub async fn wait(&self) -> ProcessStatus {
        let mut rx = self.0.clone();
        let status = match rx.wait_for(|status| !status.is_running()).await {
            Ok(status) => status.clone(),
            // Notifier dropped without a write: the waiter task died with the runtime.
            Err(_) => ProcessStatus::Failed("exit waiter gone".into()),
        };
        status
    }
}
