//! Advisory free-port discovery for child listeners.

use crate::error::{ProcessError, Result};
use rand::Rng;
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::sync::Mutex;

/// Default first port of the probe window.
pub const DEFAULT_PORT_BASE: u16 = 8000;

/// Number of ports above the base that may be handed out.
pub const DEFAULT_PORT_WINDOW: u16 = 10_000;

/// Bind probes made before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1000;

/// Hands out ports that were bindable at the time of the probe.
///
/// Ports handed out by one allocator are never handed out again by it, so
/// instances created through the same allocator do not collide with each
/// other. Nothing stops another process from grabbing a port between the
/// probe and the child binding it; the child's own bind is the real test.
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    window: u16,
    max_attempts: u32,
    handed_out: Mutex<HashSet<u16>>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_BASE)
    }
}

impl PortAllocator {
    /// Create an allocator probing `[base, base + 10000)`.
    pub fn new(base: u16) -> Self {
        Self::with_window(base, DEFAULT_PORT_WINDOW, DEFAULT_MAX_ATTEMPTS)
    }

    /// Create an allocator with an explicit window size and retry budget.
    ///
    /// The window is clamped so it never runs past port 65535.
    pub fn with_window(base: u16, window: u16, max_attempts: u32) -> Self {
        let window = window.min(u16::MAX - base).max(1);
        Self {
            base,
            window,
            max_attempts,
            handed_out: Mutex::new(HashSet::new()),
        }
    }

    /// Number of ports handed out so far.
    pub fn handed_out(&self) -> usize {
        self.handed_out
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Pick a random port in the window that binds on `0.0.0.0`.
    ///
    /// The probe listener is dropped before returning.
    pub fn allocate(&self) -> Result<u16> {
        let mut rng = rand::thread_rng();

        for attempt in 1..=self.max_attempts {
            let port = self.base + rng.gen_range(0..self.window);

            let mut handed_out = self
                .handed_out
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if handed_out.contains(&port) {
                continue;
            }

            match TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)) {
                Ok(listener) => {
                    drop(listener);
                    handed_out.insert(port);
                    tracing::debug!(port, attempt, "Allocated port");
                    return Ok(port);
                }
                Err(e) => {
                    tracing::trace!(port, attempt, error = %e, "Port busy, retrying");
                }
            }
        }

        tracing::warn!(
            base = self.base,
            attempts = self.max_attempts,
            "Port allocation exhausted"
        );
        Err(ProcessError::PortExhausted {
            attempts: self.max_attempts,
        })
    }
}
