//! Termination signal handling for long-running commands.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::SigId;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Set when SIGINT or SIGTERM arrives (or [`ShutdownSignal::request`] is called).
#[derive(Debug)]
pub struct ShutdownSignal {
    requested: Arc<AtomicBool>,
    registrations: Vec<SigId>,
}

impl ShutdownSignal {
    /// A signal that only fires through [`ShutdownSignal::request`].
    pub fn manual() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            registrations: Vec::new(),
        }
    }

    /// Register SIGINT and SIGTERM listeners.
    ///
    /// # Errors
    ///
    /// Returns an error when the OS refuses the handler registration.
    pub fn register() -> io::Result<Self> {
        let mut signal = Self::manual();
        for sig in [SIGINT, SIGTERM] {
            let id = signal_hook::flag::register(sig, Arc::clone(&signal.requested))?;
            signal.registrations.push(id);
        }
        tracing::debug!(target: "notekeep.lifecycle", "termination signal listeners registered");
        Ok(signal)
    }

    /// Shared flag for code that polls for shutdown without owning the signal.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.requested)
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Block until shutdown is requested or `timeout` passes. Returns whether
    /// shutdown was requested. `None` waits indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.is_requested() {
                tracing::info!(target: "notekeep.lifecycle", "shutdown requested");
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
    }
}

impl Drop for ShutdownSignal {
    fn drop(&mut self) {
        for id in self.registrations.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}
