//! Deployment-supplied collaborator seams.
//!
//! The original design loaded storage, network, and filesystem plugins
//! dynamically; here they are plain traits wired at bootstrap with
//! static dispatch. The boundaries are unchanged: the core never opens
//! sockets or registers watches itself.

use std::path::Path;

use sync::Event;

/// Connection-oriented peer transport with discovery and RTT probing.
///
/// [`sync::Transport`] covers the send half the pipeline needs; this
/// trait adds the daemon-side lifecycle operations.
pub trait PeerTransport: sync::Transport {
    /// Opens a connection to a peer endpoint.
    fn connect(&self, peer_id: &str, ip: &str, port: u16) -> std::io::Result<()>;

    /// Closes a peer connection.
    fn disconnect(&self, peer_id: &str) -> std::io::Result<()>;

    /// Broadcasts a presence datagram on the discovery port.
    fn broadcast_presence(&self, datagram: &str) -> std::io::Result<()>;

    /// Measures round-trip time to a peer; `None` when unreachable.
    fn probe_rtt(&self, peer_id: &str) -> Option<u32>;
}

/// Filesystem watcher: pushes path-level change events into the router.
pub trait Watcher: Send + Sync {
    /// Starts watching a directory tree; events flow through `emit`.
    fn watch(
        &self,
        root: &Path,
        emit: Box<dyn Fn(Event) + Send + Sync>,
    ) -> std::io::Result<()>;

    /// Stops watching everything.
    fn stop(&self);
}
