//! Event routing.
//!
//! Watcher and transport callbacks fire events into the router on their
//! own threads; handlers must stay non-blocking or offload. The router
//! owns three pieces of sync hygiene:
//!
//! - an ignore list of freshly patched filenames (2 s TTL) so the
//!   watcher echo of a remote patch never loops back into a broadcast,
//! - a pending-changes queue that accumulates while sync is paused and
//!   drains deduplicated (last write wins) on resume,
//! - the magic-byte split between the binary pipeline protocol and the
//!   legacy text protocol on `DATA_RECEIVED`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use protocol::legacy::LegacyMessage;

/// How long a patched filename stays suppressed.
const IGNORE_TTL: Duration = Duration::from_secs(2);

/// Events the router understands.
#[derive(Clone, Debug)]
pub enum Event {
    /// Discovery saw a peer announcement.
    PeerDiscovered {
        /// Announced peer id.
        peer_id: String,
        /// Peer address.
        ip: String,
        /// Peer transfer port.
        port: u16,
    },
    /// Transport established a connection.
    PeerConnected(String),
    /// Transport lost a connection.
    PeerDisconnected(String),
    /// Watcher saw a new file.
    FileCreated(PathBuf),
    /// Watcher saw a modification.
    FileModified(PathBuf),
    /// Watcher saw a deletion.
    FileDeleted(PathBuf),
    /// Raw bytes arrived from a peer.
    DataReceived {
        /// Sending peer.
        peer_id: String,
        /// Raw payload.
        data: Vec<u8>,
    },
    /// An intrusion detector flagged the host.
    AnomalyDetected(String),
    /// A directory joined the watch set.
    WatchAdded(PathBuf),
}

impl Event {
    /// Stable subscription name for the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PeerDiscovered { .. } => "PEER_DISCOVERED",
            Self::PeerConnected(_) => "PEER_CONNECTED",
            Self::PeerDisconnected(_) => "PEER_DISCONNECTED",
            Self::FileCreated(_) => "FILE_CREATED",
            Self::FileModified(_) => "FILE_MODIFIED",
            Self::FileDeleted(_) => "FILE_DELETED",
            Self::DataReceived { .. } => "DATA_RECEIVED",
            Self::AnomalyDetected(_) => "ANOMALY_DETECTED",
            Self::WatchAdded(_) => "WATCH_ADDED",
        }
    }
}

/// What the router decided to do with a file event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileEventDisposition {
    /// Handlers ran.
    Dispatched,
    /// The file was recently patched by a remote; the echo was swallowed.
    Suppressed,
    /// Sync is paused; the path was queued for later.
    Queued,
}

type Handler = Box<dyn Fn(&Event) + Send + Sync>;
type BinaryHandler = Box<dyn Fn(&str, &[u8]) + Send + Sync>;
type LegacyHandler = Box<dyn Fn(&str, LegacyMessage) + Send + Sync>;

/// Dispatches events to subscribed handlers on the firing thread.
#[derive(Default)]
pub struct EventRouter {
    handlers: Mutex<HashMap<&'static str, Vec<Handler>>>,
    binary_handler: Mutex<Option<BinaryHandler>>,
    legacy_handler: Mutex<Option<LegacyHandler>>,
    sync_enabled: AtomicBool,
    ignore_list: Mutex<HashMap<String, Instant>>,
    pending_changes: Mutex<Vec<PathBuf>>,
}

impl EventRouter {
    /// Creates a router with sync enabled.
    #[must_use]
    pub fn new() -> Self {
        let router = Self::default();
        router.sync_enabled.store(true, Ordering::SeqCst);
        router
    }

    /// Registers a handler for a named event.
    pub fn subscribe<F>(&self, event_name: &'static str, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .expect("handler table poisoned")
            .entry(event_name)
            .or_default()
            .push(Box::new(handler));
    }

    /// Routes binary pipeline frames (`DATA_RECEIVED` with magic).
    pub fn set_binary_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        *self.binary_handler.lock().expect("binary handler poisoned") = Some(Box::new(handler));
    }

    /// Routes parsed legacy text messages.
    pub fn set_legacy_handler<F>(&self, handler: F)
    where
        F: Fn(&str, LegacyMessage) + Send + Sync + 'static,
    {
        *self.legacy_handler.lock().expect("legacy handler poisoned") = Some(Box::new(handler));
    }

    /// Whether local changes are currently broadcast.
    #[must_use]
    pub fn sync_enabled(&self) -> bool {
        self.sync_enabled.load(Ordering::SeqCst)
    }

    /// Pauses or resumes sync. Resuming returns the queued paths,
    /// deduplicated with the last occurrence winning.
    pub fn set_sync_enabled(&self, enabled: bool) -> Vec<PathBuf> {
        self.sync_enabled.store(enabled, Ordering::SeqCst);
        if enabled {
            self.drain_pending()
        } else {
            Vec::new()
        }
    }

    /// Marks a filename as just patched so its watcher echo is ignored.
    pub fn mark_patched(&self, filename: &str) {
        self.ignore_list
            .lock()
            .expect("ignore list poisoned")
            .insert(filename.to_owned(), Instant::now());
    }

    /// Fires an event.
    ///
    /// File events go through suppression and pause queuing first; the
    /// returned disposition says whether handlers actually ran.
    /// `DATA_RECEIVED` is additionally routed to the binary or legacy
    /// protocol handler based on the magic peek. `ANOMALY_DETECTED`
    /// forcibly disables sync before handlers run.
    pub fn dispatch(&self, event: &Event) -> FileEventDisposition {
        match event {
            Event::FileCreated(path) | Event::FileModified(path) => {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if self.consume_ignore(name) {
                        tracing::debug!(file = name, "suppressed watcher echo of remote patch");
                        return FileEventDisposition::Suppressed;
                    }
                }
                if !self.sync_enabled() {
                    let mut pending = self.pending_changes.lock().expect("pending list poisoned");
                    pending.push(path.clone());
                    tracing::info!(
                        file = %path.display(),
                        queued = pending.len(),
                        "sync paused, queued change"
                    );
                    return FileEventDisposition::Queued;
                }
            }
            Event::AnomalyDetected(kind) => {
                tracing::error!(anomaly = %kind, "anomaly detected, pausing sync");
                self.sync_enabled.store(false, Ordering::SeqCst);
            }
            Event::DataReceived { peer_id, data } => {
                self.route_data(peer_id, data);
            }
            _ => {}
        }

        let handlers = self.handlers.lock().expect("handler table poisoned");
        if let Some(subscribers) = handlers.get(event.name()) {
            for handler in subscribers {
                handler(event);
            }
        }
        FileEventDisposition::Dispatched
    }

    fn route_data(&self, peer_id: &str, data: &[u8]) {
        if protocol::has_magic(data) {
            if let Some(handler) = self
                .binary_handler
                .lock()
                .expect("binary handler poisoned")
                .as_ref()
            {
                handler(peer_id, data);
            }
            return;
        }

        match LegacyMessage::decode(data) {
            Ok(message) => {
                if let Some(handler) = self
                    .legacy_handler
                    .lock()
                    .expect("legacy handler poisoned")
                    .as_ref()
                {
                    handler(peer_id, message);
                }
            }
            Err(err) => {
                tracing::warn!(peer = peer_id, %err, "unroutable payload dropped");
            }
        }
    }

    /// True (and consumes the entry) when the filename was patched less
    /// than the TTL ago. Expired entries are removed without effect.
    fn consume_ignore(&self, filename: &str) -> bool {
        let mut ignored = self.ignore_list.lock().expect("ignore list poisoned");
        match ignored.get(filename) {
            Some(stamp) if stamp.elapsed() < IGNORE_TTL => {
                ignored.remove(filename);
                true
            }
            Some(_) => {
                ignored.remove(filename);
                false
            }
            None => false,
        }
    }

    fn drain_pending(&self) -> Vec<PathBuf> {
        let drained =
            std::mem::take(&mut *self.pending_changes.lock().expect("pending list poisoned"));
        // Last write wins: keep only the final occurrence of each path.
        let mut deduped: Vec<PathBuf> = Vec::with_capacity(drained.len());
        for path in drained.into_iter().rev() {
            if !deduped.contains(&path) {
                deduped.push(path);
            }
        }
        deduped.reverse();
        deduped
    }
}
