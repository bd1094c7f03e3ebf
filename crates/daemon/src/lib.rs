//! Daemon glue: configuration, CLI surface, path resolution, and the
//! bootstrap seams the core hangs off.
//!
//! The transport, filesystem watcher, and IPC surface are supplied by
//! the deployment behind the traits in [`plugins`]; this crate owns
//! everything needed to stand the core up around them.

#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod mesh;
pub mod paths;
pub mod plugins;

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use thiserror::Error;

/// Cadence of the RTT probe / remesh cycle.
pub const REMESH_INTERVAL: Duration = Duration::from_secs(15);

/// Cadence of the presence broadcast.
pub const PRESENCE_INTERVAL: Duration = Duration::from_secs(5);

/// Cadence of the peer-status log line.
pub const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Result type for daemon bootstrap operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Errors surfaced during daemon bootstrap.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration file or flag validation failed.
    #[error("configuration error: {0}")]
    Config(String),
    /// Reading configuration or state files failed.
    #[error("I/O error: {0}")]
    Io(
        #[from]
        #[source]
        std::io::Error,
    ),
    /// The persistence facade could not be initialized.
    #[error(transparent)]
    Storage(#[from] storage::StorageError),
    /// The version store could not be initialized.
    #[error(transparent)]
    Versioning(#[from] versioning::VersionError),
}

/// Diagnostic outcome of daemon initialization.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InitStatus {
    /// Everything came up.
    Ok,
    /// A required plugin failed to initialize.
    PluginLoadFailure,
    /// The transport layer failed to come up.
    NetworkFailure,
    /// The filesystem watcher failed to come up.
    WatcherFailure,
}

impl InitStatus {
    /// Process exit code for this outcome.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::PluginLoadFailure | Self::NetworkFailure | Self::WatcherFailure => 1,
        }
    }
}

/// Shutdown latch shared by every daemon thread.
///
/// Threads park in [`wait_timeout`](Self::wait_timeout) between loop
/// iterations; [`trigger`](Self::trigger) wakes them all so each joins
/// within its own interval.
#[derive(Default)]
pub struct ShutdownLatch {
    stopped: Mutex<bool>,
    signal: Condvar,
}

impl ShutdownLatch {
    /// Creates an untriggered latch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.stopped.lock().expect("latch poisoned")
    }

    /// Requests shutdown and wakes every waiter.
    pub fn trigger(&self) {
        *self.stopped.lock().expect("latch poisoned") = true;
        self.signal.notify_all();
    }

    /// Parks for up to `timeout`; returns `true` when shutdown was
    /// requested (possibly before the timeout elapsed).
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.stopped.lock().expect("latch poisoned");
        if *guard {
            return true;
        }
        let (guard, _) = self
            .signal
            .wait_timeout(guard, timeout)
            .expect("latch poisoned");
        *guard
    }
}

/// Installs the global tracing subscriber, honoring `RUST_LOG`.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Generates a six-character alphanumeric session code.
#[must_use]
pub fn generate_session_code() -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect()
}
