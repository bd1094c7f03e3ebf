//! Peer-to-peer synchronization core.
//!
//! Three cooperating pieces live here:
//!
//! - [`EventRouter`]: fans watcher and network events out to handlers,
//!   suppresses the echo of remotely applied patches, and queues local
//!   changes while sync is paused.
//! - [`SyncPipeline`]: the seven-stage per-transfer protocol state
//!   machine (handshake, meta, hash-scan, delta, block-stream,
//!   finalize) with per-peer sessions, chunk reassembly, and retry.
//! - [`ConflictCoordinator`]: detects divergent files after a hash
//!   scan, persists conflict records, and drives the merge resolver.
//!
//! The transport is abstracted behind [`Transport`]; the daemon wires a
//! real socket layer in, tests wire in an in-memory fake.

#![deny(unsafe_code)]

mod conflict;
mod pipeline;
mod router;

pub use conflict::{ConflictCoordinator, SyncFileEntry};
pub use pipeline::{
    PipelineConfig, PipelineEvent, SyncPipeline, TransferContext, TransferState, MAX_RETRIES,
    TRANSFER_TIMEOUT,
};
pub use router::{Event, EventRouter, FileEventDisposition};

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by the sync core.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(
        #[from]
        #[source]
        std::io::Error,
    ),
    /// A frame or payload violated the wire protocol.
    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),
    /// The delta engine failed.
    #[error(transparent)]
    Engine(#[from] engine::EngineError),
    /// The persistence facade failed.
    #[error(transparent)]
    Storage(#[from] storage::StorageError),
    /// The version store failed.
    #[error(transparent)]
    Versioning(#[from] versioning::VersionError),
    /// The peer has no authenticated session.
    #[error("peer {0} is not authenticated")]
    NotAuthenticated(String),
    /// A record the operation needs does not exist.
    #[error("{0} not found")]
    NotFound(String),
}

/// Connection-oriented message transport to peers.
///
/// Implementations deliver `frame` to the named peer preserving per-peer
/// ordering; the pipeline never reorders what the transport delivers.
pub trait Transport: Send + Sync {
    /// Sends one frame to a peer.
    fn send(&self, peer_id: &str, frame: &[u8]) -> std::io::Result<()>;
}
