//! Line-by-line forwarding of child output to a caller-supplied sink.

use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

/// Which child stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Receives child output one line at a time.
///
/// Called synchronously from the drain task, so implementations should
/// not block for long. Lines keep their trailing newline.
pub trait LogSink: Send + Sync {
    /// Handle one line of output.
    fn log(&self, stream: LogStream, line: &str);
}

impl<F> LogSink for F
where
    F: Fn(LogStream, &str) + Send + Sync,
{
    fn log(&self, stream: LogStream, line: &str) {
        self(stream, line)
    }
}

/// Forwards child output to `tracing` at info level.
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    label: String,
}

impl TracingSink {
    /// Create a sink tagging every event with `label`.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl LogSink for TracingSink {
    fn log(&self, stream: LogStream, line: &str) {
        tracing::info!(
            target: "fnrun::child",
            label = %self.label,
            %stream,
            "{}",
            line.trim_end()
        );
    }
}

/// Discards every line.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _stream: LogStream, _line: &str) {}
}

/// Spawn a task that forwards `reader` to `sink` until EOF or a read error.
///
/// The task ends on its own once the child closes the stream, which happens
/// when the child exits or is killed.
pub fn spawn_drain<R>(reader: R, stream: LogStream, sink: Arc<dyn LogSink>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(drain(reader, stream, sink))
}

async fn drain<R>(reader: R, stream: LogStream, sink: Arc<dyn LogSink>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut lines = 0u64;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                lines += 1;
                sink.log(stream, &String::from_utf8_lossy(&buf));
            }
            Err(e) => {
                tracing::debug!(%stream, error = %e, "Log drain read failed");
                break;
            }
        }
    }

    tracing::trace!(%stream, lines, "Log drain finished");
}
