//! File version store.
//!
//! Keeps the N most recent versions of each watched file under a hidden
//! directory inside the watch root:
//!
//! ```text
//! .sentinel_versions/
//!   file_ab12cd34ef56ab78/          per-file dir, keyed by a path hash
//!     v_1700000000000_ab12cd34.txt  content blob
//!     manifest.json                 sidecar listing every version
//! ```
//!
//! Blobs are immutable once written; every mutation rewrites the sidecar
//! manifest, and manifest rows whose blob disappeared are dropped on
//! load. Per-file version counts and the global byte budget are enforced
//! by pruning oldest-first.

#![deny(unsafe_code)]

mod glob;
mod store;

pub use glob::glob_match;
pub use store::{ChangeType, FileVersion, VersionStore, VersioningConfig};

use thiserror::Error;

/// Result type for version-store operations.
pub type VersionResult<T> = Result<T, VersionError>;

/// Errors produced by the version store.
#[derive(Debug, Error)]
pub enum VersionError {
    /// Reading or writing blobs, manifests, or watched files failed.
    #[error("I/O error: {0}")]
    Io(
        #[from]
        #[source]
        std::io::Error,
    ),
    /// A sidecar manifest could not be parsed.
    #[error("manifest error: {0}")]
    Manifest(
        #[from]
        #[source]
        serde_json::Error,
    ),
    /// The requested version id does not exist for the path.
    #[error("version {version_id} not found for {path}")]
    NotFound {
        /// Path the lookup ran against.
        path: String,
        /// Version id that was requested.
        version_id: u64,
    },
}
