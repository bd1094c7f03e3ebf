//! Seven-stage sync pipeline.
//!
//! Per transfer, the state machine is:
//!
//! ```text
//! SENDING_META -> HASHING -> AWAITING_SIG -> STREAMING_BLOCKS -> AWAITING_ACK -> COMPLETE
//!       \____________\___________\________________\___________________\_______-> FAILED
//! ```
//!
//! Sessions, transfers, and chunk buffers live in separate mutex-guarded
//! tables; when more than one is needed the acquisition order is fixed
//! (sessions, then transfers, then chunks) and no lock is ever held
//! across a transport send.

mod chunks;
mod delta_sync;
mod finalize;
mod handshake;
mod legacy;

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, Sender};
use protocol::{Capabilities, FrameHeader, MessageType};
use storage::Database;
use versioning::VersionStore;

use crate::{SyncError, SyncResult, Transport};

pub(crate) use chunks::PendingChunks;

/// Idle transfers older than this are swept to FAILED.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

/// Integrity-failure retries before a transfer gives up.
pub const MAX_RETRIES: u32 = 3;

/// Replay-protection window per peer.
const SEQUENCE_HISTORY: usize = 1000;

/// Sessions quiet for longer than this are evicted.
const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(1800);

/// Stage of one file transfer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferState {
    /// Metadata announcement is on the wire.
    SendingMeta,
    /// Waiting for the peer to acknowledge the metadata.
    Hashing,
    /// Waiting for the peer's signature baseline.
    AwaitingSig,
    /// Delta or raw blocks are streaming.
    StreamingBlocks,
    /// Waiting for the integrity acknowledgement.
    AwaitingAck,
    /// Verified and done.
    Complete,
    /// Gave up.
    Failed,
}

/// Book-keeping for one in-flight transfer.
#[derive(Clone, Debug)]
pub struct TransferContext {
    /// Transfer id, unique within this pipeline.
    pub transfer_id: String,
    /// Peer on the other end.
    pub peer_id: String,
    /// Path relative to the watch root.
    pub relative_path: String,
    /// Absolute local path.
    pub local_path: PathBuf,
    /// Size of the file being synchronized.
    pub file_size: u64,
    /// Bytes pushed so far.
    pub bytes_transferred: u64,
    /// Current stage.
    pub state: TransferState,
    /// Whether the delta path was taken.
    pub use_delta: bool,
    /// Number of delta instructions streamed.
    pub delta_instructions: u32,
    /// Bytes the delta saved against a full transfer.
    pub saved_bytes: u64,
    /// Integrity retries performed.
    pub retry_count: u32,
    /// Transfer start.
    pub started: Instant,
    /// Last observed progress.
    pub last_activity: Instant,
    /// SHA-256 of the announced contents.
    pub file_hash: [u8; 32],
    /// Last error, if any.
    pub last_error: Option<String>,
}

/// Authenticated, capability-negotiated state shared with one peer.
#[derive(Clone, Debug)]
pub(crate) struct PeerSession {
    pub(crate) negotiated: Capabilities,
    pub(crate) agreed_block_size: u32,
    pub(crate) agreed_chunk_size: u32,
    pub(crate) authenticated: bool,
    pub(crate) last_activity: Instant,
    pub(crate) next_sequence: u32,
    pub(crate) received_sequences: VecDeque<u32>,
    /// Challenge this side issued and still expects a proof for.
    pub(crate) issued_challenge: Option<[u8; 32]>,
}

impl PeerSession {
    fn new() -> Self {
        Self {
            negotiated: Capabilities::none(),
            agreed_block_size: protocol::DEFAULT_MAX_BLOCK_SIZE,
            agreed_chunk_size: protocol::DEFAULT_CHUNK_SIZE,
            authenticated: false,
            last_activity: Instant::now(),
            next_sequence: 0,
            received_sequences: VecDeque::new(),
            issued_challenge: None,
        }
    }
}

/// Notifications the pipeline publishes instead of holding back-pointers
/// into the daemon.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PipelineEvent {
    /// A transfer reached COMPLETE or FAILED.
    TransferFinished {
        /// Finished transfer id.
        transfer_id: String,
        /// `true` for COMPLETE.
        success: bool,
        /// Failure description for FAILED transfers.
        error: String,
    },
    /// A session became authenticated.
    PeerAuthenticated {
        /// Authenticated peer.
        peer_id: String,
        /// Negotiated capability set.
        capabilities: Capabilities,
    },
}

/// Static configuration for a pipeline instance.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// This endpoint's peer id.
    pub local_peer_id: String,
    /// Root of the synchronized tree.
    pub watch_dir: PathBuf,
    /// Capabilities this endpoint offers.
    pub capabilities: Capabilities,
    /// Shared session key (derived from the session code).
    pub session_key: Vec<u8>,
    /// Largest block size this endpoint accepts.
    pub max_block_size: u32,
    /// Largest chunk size this endpoint accepts.
    pub max_chunk_size: u32,
}

impl PipelineConfig {
    /// Config with protocol defaults for the given identity.
    #[must_use]
    pub fn new(local_peer_id: &str, watch_dir: &Path, session_key: &[u8]) -> Self {
        Self {
            local_peer_id: local_peer_id.to_owned(),
            watch_dir: watch_dir.to_owned(),
            capabilities: Capabilities::DELTA_SYNC.union(Capabilities::STREAMING),
            session_key: session_key.to_vec(),
            max_block_size: protocol::DEFAULT_MAX_BLOCK_SIZE,
            max_chunk_size: protocol::DEFAULT_CHUNK_SIZE,
        }
    }
}

struct TransferTable {
    by_id: HashMap<String, TransferContext>,
    // "relative_path|peer_id" -> transfer_id; enforces at most one
    // active transfer per (peer, path).
    by_key: HashMap<String, String>,
}

/// The pipeline orchestrator.
pub struct SyncPipeline {
    config: PipelineConfig,
    transport: Arc<dyn Transport>,
    db: Arc<Database>,
    versions: Arc<VersionStore>,
    sessions: Mutex<HashMap<String, PeerSession>>,
    transfers: Mutex<TransferTable>,
    chunk_buffers: Mutex<HashMap<String, PendingChunks>>,
    patched_callback: Mutex<Option<Box<dyn Fn(&str) + Send + Sync>>>,
    events_tx: Sender<PipelineEvent>,
    events_rx: Receiver<PipelineEvent>,
    transfer_counter: AtomicU64,
}

impl SyncPipeline {
    /// Creates a pipeline over the given collaborators.
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        transport: Arc<dyn Transport>,
        db: Arc<Database>,
        versions: Arc<VersionStore>,
    ) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            config,
            transport,
            db,
            versions,
            sessions: Mutex::new(HashMap::new()),
            transfers: Mutex::new(TransferTable {
                by_id: HashMap::new(),
                by_key: HashMap::new(),
            }),
            chunk_buffers: Mutex::new(HashMap::new()),
            patched_callback: Mutex::new(None),
            events_tx,
            events_rx,
            transfer_counter: AtomicU64::new(1),
        }
    }

    /// Receiver for pipeline notifications.
    #[must_use]
    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.events_rx.clone()
    }

    /// Registers the hook invoked right before a remotely produced file
    /// is written, so the watcher echo can be suppressed.
    pub fn set_patched_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self
            .patched_callback
            .lock()
            .expect("patched callback poisoned") = Some(Box::new(callback));
    }

    /// Whether a peer has completed the handshake.
    #[must_use]
    pub fn is_peer_authenticated(&self, peer_id: &str) -> bool {
        self.sessions
            .lock()
            .expect("session table poisoned")
            .get(peer_id)
            .is_some_and(|session| session.authenticated)
    }

    /// Negotiated capabilities for a peer, if authenticated.
    #[must_use]
    pub fn peer_capabilities(&self, peer_id: &str) -> Option<Capabilities> {
        self.sessions
            .lock()
            .expect("session table poisoned")
            .get(peer_id)
            .filter(|session| session.authenticated)
            .map(|session| session.negotiated)
    }

    /// Drops a peer's session and fails its in-flight transfers.
    pub fn disconnect_peer(&self, peer_id: &str) {
        self.sessions
            .lock()
            .expect("session table poisoned")
            .remove(peer_id);

        let doomed: Vec<String> = {
            let table = self.transfers.lock().expect("transfer table poisoned");
            table
                .by_id
                .values()
                .filter(|ctx| ctx.peer_id == peer_id && !is_terminal(ctx.state))
                .map(|ctx| ctx.transfer_id.clone())
                .collect()
        };
        for transfer_id in doomed {
            self.fail_transfer(&transfer_id, "peer disconnected");
        }
    }

    /// Routes one incoming frame to its stage handler.
    ///
    /// Replayed sequences and frames from unauthenticated peers are
    /// dropped; a dropped frame never tears the session down.
    pub fn handle_frame(&self, peer_id: &str, raw: &[u8]) -> SyncResult<()> {
        let (header, payload) = FrameHeader::decode(raw)?;

        if !header.message_type.is_handshake() {
            if !self.is_peer_authenticated(peer_id) {
                tracing::warn!(
                    peer = peer_id,
                    message_type = ?header.message_type,
                    "frame from unauthenticated peer dropped"
                );
                return Ok(());
            }
            if !self.admit_sequence(peer_id, header.sequence) {
                tracing::warn!(peer = peer_id, sequence = header.sequence, "replayed sequence dropped");
                return Ok(());
            }
        }

        match header.message_type {
            MessageType::HandshakeInit => self.handle_handshake_init(peer_id, payload),
            MessageType::HandshakeResponse => self.handle_handshake_response(peer_id, payload),
            MessageType::HandshakeComplete => self.handle_handshake_complete(peer_id, payload),
            MessageType::FileMeta => self.handle_file_meta(peer_id, payload),
            MessageType::FileMetaAck => self.handle_file_meta_ack(peer_id, payload),
            MessageType::SignatureRequest | MessageType::SignatureResponse => {
                self.handle_signature_payload(peer_id, payload)
            }
            MessageType::DeltaResponse => self.handle_delta_response(peer_id, payload),
            MessageType::BlockData => self.handle_block_data(peer_id, payload),
            MessageType::BlockAck => self.handle_block_ack(peer_id, payload),
            MessageType::TransferComplete => self.handle_transfer_complete(peer_id, payload),
            MessageType::TransferAck => self.handle_transfer_ack(peer_id, payload),
            MessageType::IntegrityFail => self.handle_integrity_fail(peer_id, payload),
            MessageType::TransferAbort => self.handle_transfer_abort(peer_id, payload),
        }
    }

    /// All transfers that are neither COMPLETE nor FAILED.
    #[must_use]
    pub fn active_transfers(&self) -> Vec<TransferContext> {
        let table = self.transfers.lock().expect("transfer table poisoned");
        table
            .by_id
            .values()
            .filter(|ctx| !is_terminal(ctx.state))
            .cloned()
            .collect()
    }

    /// Looks up a transfer by id.
    #[must_use]
    pub fn transfer(&self, transfer_id: &str) -> Option<TransferContext> {
        let table = self.transfers.lock().expect("transfer table poisoned");
        table.by_id.get(transfer_id).cloned()
    }

    /// Aborts a transfer locally and notifies the peer.
    pub fn abort_transfer(&self, transfer_id: &str, reason: &str) -> SyncResult<()> {
        let Some(ctx) = self.transfer(transfer_id) else {
            return Err(SyncError::NotFound(format!("transfer {transfer_id}")));
        };
        let payload = protocol::payload::TransferAbort {
            relative_path: ctx.relative_path.clone(),
            reason: reason.to_owned(),
        }
        .encode();
        self.send(&ctx.peer_id, MessageType::TransferAbort, &payload)?;
        self.fail_transfer(transfer_id, reason);
        Ok(())
    }

    /// Sweeps idle transfers, stale chunk buffers, and dead sessions.
    pub fn sweep_stale(&self) {
        {
            let mut sessions = self.sessions.lock().expect("session table poisoned");
            sessions.retain(|peer_id, session| {
                let keep = session.last_activity.elapsed() <= SESSION_IDLE_TIMEOUT;
                if !keep {
                    tracing::info!(peer = %peer_id, "idle session evicted");
                }
                keep
            });
        }
        let doomed: Vec<String> = {
            let table = self.transfers.lock().expect("transfer table poisoned");
            table
                .by_id
                .values()
                .filter(|ctx| {
                    !is_terminal(ctx.state) && ctx.last_activity.elapsed() > TRANSFER_TIMEOUT
                })
                .map(|ctx| ctx.transfer_id.clone())
                .collect()
        };
        for transfer_id in doomed {
            tracing::warn!(transfer_id, "transfer timed out");
            self.fail_transfer(&transfer_id, "transfer timed out");
        }
        self.sweep_stale_chunks(TRANSFER_TIMEOUT);
    }

    // ------------------------------------------------------------------
    // Internals shared by the stage handlers.
    // ------------------------------------------------------------------

    /// Sends a sequenced frame. Never called with a lock held.
    pub(crate) fn send(
        &self,
        peer_id: &str,
        message_type: MessageType,
        payload: &[u8],
    ) -> SyncResult<()> {
        let sequence = if message_type.is_handshake() {
            0
        } else {
            self.next_sequence(peer_id)
        };
        let frame = protocol::build_frame(message_type, sequence, payload);
        self.transport.send(peer_id, &frame)?;
        Ok(())
    }

    fn next_sequence(&self, peer_id: &str) -> u32 {
        let mut sessions = self.sessions.lock().expect("session table poisoned");
        let session = sessions.entry(peer_id.to_owned()).or_insert_with(PeerSession::new);
        let sequence = session.next_sequence;
        session.next_sequence = session.next_sequence.wrapping_add(1);
        sequence
    }

    /// Admits a fresh sequence number, rejecting anything in the replay
    /// window.
    fn admit_sequence(&self, peer_id: &str, sequence: u32) -> bool {
        let mut sessions = self.sessions.lock().expect("session table poisoned");
        let Some(session) = sessions.get_mut(peer_id) else {
            return false;
        };
        if session.received_sequences.contains(&sequence) {
            return false;
        }
        session.received_sequences.push_back(sequence);
        while session.received_sequences.len() > SEQUENCE_HISTORY {
            session.received_sequences.pop_front();
        }
        session.last_activity = Instant::now();
        true
    }

    pub(crate) fn with_session<R>(
        &self,
        peer_id: &str,
        apply: impl FnOnce(&mut PeerSession) -> R,
    ) -> Option<R> {
        let mut sessions = self.sessions.lock().expect("session table poisoned");
        sessions.get_mut(peer_id).map(apply)
    }

    pub(crate) fn insert_session(&self, peer_id: &str, session: PeerSession) {
        self.sessions
            .lock()
            .expect("session table poisoned")
            .insert(peer_id.to_owned(), session);
    }

    pub(crate) fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    pub(crate) fn versions(&self) -> &VersionStore {
        &self.versions
    }

    pub(crate) fn emit(&self, event: PipelineEvent) {
        let _ = self.events_tx.send(event);
    }

    pub(crate) fn mark_patched(&self, filename: &str) {
        if let Some(callback) = self
            .patched_callback
            .lock()
            .expect("patched callback poisoned")
            .as_ref()
        {
            callback(filename);
        }
    }

    pub(crate) fn generate_transfer_id(&self, peer_id: &str) -> String {
        let counter = self.transfer_counter.fetch_add(1, Ordering::SeqCst);
        format!("tx-{}-{}-{counter}", self.config.local_peer_id, peer_id)
    }

    pub(crate) fn transfer_key(relative_path: &str, peer_id: &str) -> String {
        format!("{relative_path}|{peer_id}")
    }

    /// Registers a transfer unless one is already active for the same
    /// `(peer, path)`; returns the winning transfer id either way.
    pub(crate) fn register_transfer(&self, ctx: TransferContext) -> (String, bool) {
        let key = Self::transfer_key(&ctx.relative_path, &ctx.peer_id);
        let mut table = self.transfers.lock().expect("transfer table poisoned");
        if let Some(existing) = table.by_key.get(&key) {
            if table
                .by_id
                .get(existing)
                .is_some_and(|existing_ctx| !is_terminal(existing_ctx.state))
            {
                return (existing.clone(), false);
            }
        }
        let transfer_id = ctx.transfer_id.clone();
        table.by_key.insert(key, transfer_id.clone());
        table.by_id.insert(transfer_id.clone(), ctx);
        (transfer_id, true)
    }

    pub(crate) fn with_transfer<R>(
        &self,
        transfer_id: &str,
        apply: impl FnOnce(&mut TransferContext) -> R,
    ) -> Option<R> {
        let mut table = self.transfers.lock().expect("transfer table poisoned");
        table.by_id.get_mut(transfer_id).map(apply)
    }

    pub(crate) fn transfer_id_for(&self, relative_path: &str, peer_id: &str) -> Option<String> {
        let key = Self::transfer_key(relative_path, peer_id);
        let table = self.transfers.lock().expect("transfer table poisoned");
        table.by_key.get(&key).cloned()
    }

    pub(crate) fn update_state(&self, transfer_id: &str, state: TransferState) {
        let mut table = self.transfers.lock().expect("transfer table poisoned");
        if let Some(ctx) = table.by_id.get_mut(transfer_id) {
            let old = ctx.state;
            ctx.state = state;
            ctx.last_activity = Instant::now();
            if old != state {
                tracing::debug!(transfer_id, ?old, ?state, "transfer state change");
            }
        }
    }

    /// Marks a transfer FAILED and publishes the completion event once.
    pub(crate) fn fail_transfer(&self, transfer_id: &str, error: &str) {
        let notify = {
            let mut table = self.transfers.lock().expect("transfer table poisoned");
            match table.by_id.get_mut(transfer_id) {
                Some(ctx) if !is_terminal(ctx.state) => {
                    ctx.state = TransferState::Failed;
                    ctx.last_error = Some(error.to_owned());
                    let key = Self::transfer_key(&ctx.relative_path, &ctx.peer_id);
                    table.by_key.remove(&key);
                    true
                }
                _ => false,
            }
        };
        if notify {
            tracing::error!(transfer_id, error, "transfer failed");
            self.emit(PipelineEvent::TransferFinished {
                transfer_id: transfer_id.to_owned(),
                success: false,
                error: error.to_owned(),
            });
        }
    }

    /// Marks a transfer COMPLETE and publishes the completion event.
    pub(crate) fn complete_transfer(&self, transfer_id: &str) {
        let notify = {
            let mut table = self.transfers.lock().expect("transfer table poisoned");
            match table.by_id.get_mut(transfer_id) {
                Some(ctx) if !is_terminal(ctx.state) => {
                    ctx.state = TransferState::Complete;
                    let key = Self::transfer_key(&ctx.relative_path, &ctx.peer_id);
                    table.by_key.remove(&key);
                    true
                }
                _ => false,
            }
        };
        if notify {
            tracing::info!(transfer_id, "transfer complete");
            self.emit(PipelineEvent::TransferFinished {
                transfer_id: transfer_id.to_owned(),
                success: true,
                error: String::new(),
            });
        }
    }

    pub(crate) fn absolute_path(&self, relative_path: &str) -> PathBuf {
        self.config.watch_dir.join(relative_path)
    }

    pub(crate) fn relative_path(&self, absolute: &Path) -> String {
        absolute
            .strip_prefix(&self.config.watch_dir)
            .unwrap_or(absolute)
            .display()
            .to_string()
    }
}

pub(crate) fn is_terminal(state: TransferState) -> bool {
    matches!(state, TransferState::Complete | TransferState::Failed)
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}
