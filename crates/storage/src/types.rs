use crate::{StorageError, StorageResult};

/// Metadata row for a watched file, keyed by canonical absolute path.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileMetadata {
    /// Canonical absolute path.
    pub path: String,
    /// Hex SHA-256 of the current contents.
    pub content_hash: String,
    /// Modification time, milliseconds since the Unix epoch.
    pub modified_time_ms: u64,
    /// Size in bytes.
    pub size: u64,
    /// Opaque vector-clock string.
    pub vector_clock: String,
    /// All known peers have acknowledged this content.
    pub synced: bool,
    /// Monotonic per-file version, bumped whenever the hash changes.
    pub version: u32,
}

/// Connection state of a known peer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PeerStatus {
    /// Handshake in flight.
    Connecting,
    /// Authenticated and reachable.
    Active,
    /// Not currently reachable.
    Offline,
}

impl PeerStatus {
    pub(crate) const fn to_db(self) -> i64 {
        match self {
            Self::Connecting => 5,
            Self::Active => 6,
            Self::Offline => 7,
        }
    }

    pub(crate) fn from_db(value: i64) -> StorageResult<Self> {
        match value {
            5 => Ok(Self::Connecting),
            6 => Ok(Self::Active),
            7 => Ok(Self::Offline),
            other => Err(StorageError::BadValue(format!("peer status {other}"))),
        }
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Offline => "offline",
        }
    }
}

/// A known peer endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    /// Stable peer identifier.
    pub id: String,
    /// Last known IP address.
    pub ip: String,
    /// Transfer port.
    pub port: u16,
    /// Last contact, seconds since the Unix epoch.
    pub last_seen_unix: u64,
    /// Connection state.
    pub status: PeerStatus,
    /// Measured round-trip time; `-1` when unknown.
    pub latency_ms: i64,
}

/// Kind of divergence behind a conflict record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConflictType {
    /// Same path, different contents.
    Content,
    /// Contents agree, metadata differs.
    Metadata,
    /// One side deleted what the other modified.
    Deletion,
    /// One side renamed what the other modified.
    Rename,
}

impl ConflictType {
    pub(crate) const fn to_db(self) -> i64 {
        match self {
            Self::Content => 1,
            Self::Metadata => 2,
            Self::Deletion => 3,
            Self::Rename => 4,
        }
    }

    pub(crate) fn from_db(value: i64) -> StorageResult<Self> {
        match value {
            1 => Ok(Self::Content),
            2 => Ok(Self::Metadata),
            3 => Ok(Self::Deletion),
            4 => Ok(Self::Rename),
            other => Err(StorageError::BadValue(format!("conflict type {other}"))),
        }
    }
}

/// Lifecycle of a conflict record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConflictStatus {
    /// Awaiting resolution.
    Pending,
    /// Resolved and applied.
    Resolved,
    /// Dismissed without applying anything.
    Ignored,
}

impl ConflictStatus {
    pub(crate) const fn to_db(self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::Resolved => 1,
            Self::Ignored => 2,
        }
    }

    pub(crate) fn from_db(value: i64) -> StorageResult<Self> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Resolved),
            2 => Ok(Self::Ignored),
            other => Err(StorageError::BadValue(format!("conflict status {other}"))),
        }
    }
}

/// A persisted conflict between local and remote state of one path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConflictRecord {
    /// Conflict id (caller-generated, unique).
    pub id: String,
    /// Path both sides modified.
    pub file_path: String,
    /// Local content hash.
    pub local_hash: String,
    /// Remote content hash.
    pub remote_hash: String,
    /// Common-ancestor hash, empty when none was found.
    pub base_hash: String,
    /// Local version counter.
    pub local_version: u64,
    /// Remote version counter.
    pub remote_version: u64,
    /// Base version counter.
    pub base_version: u64,
    /// Divergence kind.
    pub conflict_type: ConflictType,
    /// Lifecycle state.
    pub status: ConflictStatus,
    /// Local device id.
    pub local_device: String,
    /// Remote device id.
    pub remote_device: String,
    /// Local mtime, milliseconds.
    pub local_mtime_ms: u64,
    /// Remote mtime, milliseconds.
    pub remote_mtime_ms: u64,
}

/// One row of per-file content history, linked by parent hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileVersionRow {
    /// Row id.
    pub id: i64,
    /// File path.
    pub file_path: String,
    /// Content hash of this version.
    pub hash: String,
    /// Hash this version was derived from; empty for roots.
    pub parent_hash: String,
    /// Originating peer; empty for local changes.
    pub peer_id: String,
    /// Capture time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Change kind name (`create`, `modify`, ...).
    pub change_type: String,
}

/// Operation kinds accepted by the sync queue.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncOperation {
    /// Propagate a newly created file.
    Create,
    /// Propagate modified contents.
    Modify,
    /// Propagate a deletion.
    Delete,
    /// Propagate a rename (modeled as delete + create downstream).
    Rename,
}

impl SyncOperation {
    pub(crate) const fn to_db(self) -> i64 {
        match self {
            Self::Create => 1,
            Self::Modify => 2,
            Self::Delete => 3,
            Self::Rename => 4,
        }
    }

    pub(crate) fn from_db(value: i64) -> StorageResult<Self> {
        match value {
            1 => Ok(Self::Create),
            2 => Ok(Self::Modify),
            3 => Ok(Self::Delete),
            4 => Ok(Self::Rename),
            other => Err(StorageError::BadValue(format!("sync operation {other}"))),
        }
    }
}

/// Lifecycle of a queued sync operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncQueueStatus {
    /// Waiting to be picked up.
    Pending,
    /// Handed to a worker.
    InProgress,
    /// Completed.
    Done,
    /// Gave up after repeated failures.
    Failed,
}

impl SyncQueueStatus {
    pub(crate) const fn to_db(self) -> i64 {
        match self {
            Self::Pending => 1,
            Self::InProgress => 2,
            Self::Done => 3,
            Self::Failed => 4,
        }
    }

    pub(crate) fn from_db(value: i64) -> StorageResult<Self> {
        match value {
            1 => Ok(Self::Pending),
            2 => Ok(Self::InProgress),
            3 => Ok(Self::Done),
            4 => Ok(Self::Failed),
            other => Err(StorageError::BadValue(format!("queue status {other}"))),
        }
    }
}

/// One entry of the offline sync queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncQueueItem {
    /// Row id.
    pub id: i64,
    /// Path the operation applies to.
    pub file_path: String,
    /// Operation kind.
    pub operation: SyncOperation,
    /// Target peer; empty means broadcast.
    pub peer_id: String,
    /// Enqueue time, milliseconds since the Unix epoch.
    pub enqueued_at_ms: u64,
    /// Delivery attempts so far.
    pub attempts: u32,
    /// Lifecycle state.
    pub status: SyncQueueStatus,
}
