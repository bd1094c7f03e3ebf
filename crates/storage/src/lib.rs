//! Persistence facade.
//!
//! A typed CRUD layer over one SQLite connection: WAL journaling, a
//! prepared-statement cache keyed by SQL text, a mutex-guarded handle,
//! and forward-only numbered migrations tracked in `schema_version`.
//! Every query lives behind a method; the raw connection never escapes.

#![deny(unsafe_code)]

mod conflicts;
mod db;
mod files;
mod history;
mod migrations;
mod peers;
mod queue;
mod registry;
mod types;

pub use db::Database;
pub use migrations::Migration;
pub use types::{
    ConflictRecord, ConflictStatus, ConflictType, FileMetadata, FileVersionRow, PeerInfo,
    PeerStatus, SyncOperation, SyncQueueItem, SyncQueueStatus,
};

use thiserror::Error;

/// Result type for persistence operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors produced by the persistence facade.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying store rejected a statement or transaction.
    #[error("database error: {0}")]
    Db(
        #[from]
        #[source]
        rusqlite::Error,
    ),
    /// A migration could not be applied.
    #[error("migration {version} failed: {reason}")]
    Migration {
        /// Migration number that failed.
        version: i64,
        /// Failure description.
        reason: String,
    },
    /// A stored value could not be mapped to its typed representation.
    #[error("unexpected stored value: {0}")]
    BadValue(String),
}
