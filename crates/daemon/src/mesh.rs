//! Periodic mesh maintenance.
//!
//! Runs on the remesh cadence: probe RTT to every known peer, feed the
//! samples into the scheduler and storage, then apply the scheduler's
//! connect/disconnect decision through the transport.

use remesh::{PeerSnapshot, RemeshScheduler};
use storage::{Database, PeerStatus};

use crate::plugins::PeerTransport;
use crate::DaemonResult;

/// Outcome of one remesh cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RemeshCycleReport {
    /// Peers probed this cycle.
    pub probed: usize,
    /// Connections opened.
    pub connected: usize,
    /// Connections closed.
    pub disconnected: usize,
    /// Estimated RTT improvement in milliseconds (zero when none).
    pub estimated_improvement_ms: f64,
}

/// Probes every known peer and reshapes the active mesh.
pub fn run_remesh_cycle(
    db: &Database,
    scheduler: &RemeshScheduler,
    transport: &dyn PeerTransport,
) -> DaemonResult<RemeshCycleReport> {
    let peers = db.all_peers()?;
    let mut report = RemeshCycleReport::default();
    let mut snapshot = Vec::with_capacity(peers.len());

    for peer in &peers {
        report.probed += 1;
        match transport.probe_rtt(&peer.id) {
            Some(rtt) => {
                let rtt = i64::from(rtt);
                scheduler.record_probe(&peer.id, rtt, true);
                db.update_peer_latency(&peer.id, rtt)?;
                tracing::debug!(peer = %peer.id, rtt_ms = rtt, "rtt probe");
            }
            None => {
                scheduler.record_probe(&peer.id, -1, false);
                db.update_peer_latency(&peer.id, -1)?;
                tracing::debug!(peer = %peer.id, "rtt probe failed");
            }
        }
        snapshot.push(PeerSnapshot {
            peer_id: peer.id.clone(),
            is_connected: peer.status == PeerStatus::Active,
        });
    }

    let decision = scheduler.decide(&snapshot);
    report.estimated_improvement_ms = scheduler.estimated_improvement_ms(&snapshot, &decision);

    for peer_id in &decision.disconnect {
        if let Err(err) = transport.disconnect(peer_id) {
            tracing::warn!(peer = %peer_id, %err, "disconnect failed");
            continue;
        }
        db.update_peer_status(peer_id, PeerStatus::Offline)?;
        report.disconnected += 1;
        tracing::info!(peer = %peer_id, "disconnected suboptimal peer");
    }

    for peer_id in &decision.connect {
        let Some(peer) = peers.iter().find(|candidate| &candidate.id == peer_id) else {
            continue;
        };
        if let Err(err) = transport.connect(&peer.id, &peer.ip, peer.port) {
            tracing::warn!(peer = %peer.id, %err, "connect failed");
            continue;
        }
        db.update_peer_status(&peer.id, PeerStatus::Connecting)?;
        report.connected += 1;
        tracing::info!(peer = %peer.id, ip = %peer.ip, port = peer.port, "connected preferred peer");
    }

    if report.connected > 0 || report.disconnected > 0 {
        tracing::info!(
            connected = report.connected,
            disconnected = report.disconnected,
            improvement_ms = report.estimated_improvement_ms,
            "remesh cycle applied"
        );
    }
    Ok(report)
}

/// Broadcasts this endpoint's presence datagram.
pub fn broadcast_presence(
    transport: &dyn PeerTransport,
    peer_id: &str,
    tcp_port: u16,
    local_ip: &str,
) -> std::io::Result<()> {
    let announcement = protocol::discovery::DiscoveryAnnouncement {
        peer_id: peer_id.to_owned(),
        tcp_port,
        sender_ip: local_ip.to_owned(),
    };
    transport.broadcast_presence(&announcement.encode())
}
