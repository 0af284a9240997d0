//! Readiness gate: poll a child's TCP port until it accepts connections.

use crate::error::{ProcessError, Result};
use crate::status::ExitWatch;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Default interval between connection attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lower bound on how long a single connect attempt may take.
const MIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Bounds for [`wait_ready`].
#[derive(Debug, Clone)]
pub struct ReadinessOptions {
    /// Sleep between failed connection attempts.
    pub poll_interval: Duration,
    /// Give up once this much time has passed. `None` waits until the
    /// child exits or the caller cancels.
    pub timeout: Option<Duration>,
    /// Give up after this many failed connection attempts.
    pub max_attempts: Option<u32>,
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            max_attempts: None,
        }
    }
}

/// Wait until `addr` accepts a TCP connection.
///
/// Each round checks, in order: caller cancellation, the deadline, whether
/// the child already exited, and finally a connect attempt. A failed
/// attempt sleeps `poll_interval` before the next round. With a `timeout`,
/// both the connect attempt and the sleep are cut short at the deadline.
/// The probe connection is closed immediately.
///
/// Returns the number of connection attempts made.
pub async fn wait_ready(
    addr: SocketAddr,
    exit: &ExitWatch,
    cancel: &CancellationToken,
    options: &ReadinessOptions,
) -> Result<u32> {
    let start = Instant::now();
    let connect_timeout = options.poll_interval.max(MIN_CONNECT_TIMEOUT);
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            tracing::debug!(%addr, attempts, "Readiness wait cancelled");
            return Err(ProcessError::Cancelled);
        }
        if let Some(timeout) = options.timeout {
            if start.elapsed() >= timeout {
                tracing::warn!(%addr, attempts, ?timeout, "Readiness deadline exceeded");
                return Err(ProcessError::DeadlineExceeded(timeout));
            }
        }
        let status = exit.current();
        if !status.is_running() {
            tracing::warn!(%addr, attempts, %status, "Child exited before becoming ready");
            return Err(ProcessError::ExitedDuringBoot(status));
        }
        if let Some(max) = options.max_attempts {
            if attempts >= max {
                tracing::warn!(%addr, attempts, "Readiness poll cap reached");
                return Err(ProcessError::PollLimitExceeded(max));
            }
        }

        // Neither the connect attempt nor the pause after it may outlast the deadline.
        let clamp = |wait: Duration| match options.timeout {
            Some(timeout) => wait.min(timeout.saturating_sub(start.elapsed())),
            None => wait,
        };

        attempts += 1;
        let connected = tokio::select! {
            _ = cancel.cancelled() => false,
            result = tokio::time::timeout(clamp(connect_timeout), TcpStream::connect(addr)) => {
                matches!(result, Ok(Ok(_)))
            }
        };
        if connected {
            tracing::debug!(
                %addr,
                attempts,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Child accepting connections"
            );
            return Ok(attempts);
        }

        tracing::trace!(%addr, attempt = attempts, "Child not ready, retrying");
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = exit.wait() => {}
            _ = tokio::time::sleep(clamp(options.poll_interval)) => {}
        }
    }
}
