//! Peer registry.

use rusqlite::{params, OptionalExtension, Row};

use crate::{Database, PeerInfo, PeerStatus, StorageResult};

fn peer_from_row(row: &Row<'_>) -> rusqlite::Result<(PeerInfo, i64)> {
    let status_raw: i64 = row.get(4)?;
    Ok((
        PeerInfo {
            id: row.get(0)?,
            ip: row.get(1)?,
            port: row.get::<_, i64>(2)? as u16,
            last_seen_unix: row.get::<_, i64>(3)? as u64,
            status: PeerStatus::Offline,
            latency_ms: row.get(5)?,
        },
        status_raw,
    ))
}

fn finish(parts: (PeerInfo, i64)) -> StorageResult<PeerInfo> {
    let (mut peer, status_raw) = parts;
    peer.status = PeerStatus::from_db(status_raw)?;
    Ok(peer)
}

const PEER_COLUMNS: &str = "peer_id, ip, port, last_seen, status_id, latency_ms";

impl Database {
    /// Inserts or updates a peer.
    ///
    /// Peers are unique on id and on endpoint: a new id arriving with an
    /// already-known `(ip, port)` evicts the older row, so stale
    /// identities never shadow a live endpoint.
    pub fn upsert_peer(&self, peer: &PeerInfo) -> StorageResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM peers WHERE ip = ?1 AND port = ?2 AND peer_id <> ?3",
            params![peer.ip, i64::from(peer.port), peer.id],
        )?;
        tx.execute(
            "INSERT INTO peers (peer_id, ip, port, last_seen, status_id, latency_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(peer_id) DO UPDATE SET
                 ip = excluded.ip,
                 port = excluded.port,
                 last_seen = excluded.last_seen,
                 status_id = excluded.status_id,
                 latency_ms = excluded.latency_ms",
            params![
                peer.id,
                peer.ip,
                i64::from(peer.port),
                peer.last_seen_unix as i64,
                peer.status.to_db(),
                peer.latency_ms,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Looks up a peer by id.
    pub fn peer_by_id(&self, peer_id: &str) -> StorageResult<Option<PeerInfo>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {PEER_COLUMNS} FROM peers WHERE peer_id = ?1"
        ))?;
        stmt.query_row(params![peer_id], peer_from_row)
            .optional()?
            .map(finish)
            .transpose()
    }

    /// Every known peer, most recently seen first.
    pub fn all_peers(&self) -> StorageResult<Vec<PeerInfo>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {PEER_COLUMNS} FROM peers ORDER BY last_seen DESC"
        ))?;
        let rows = stmt.query_map([], peer_from_row)?;
        rows.map(|parts| finish(parts?)).collect()
    }

    /// Peers with a known latency, fastest first, capped at `limit`.
    pub fn peers_by_latency(&self, limit: usize) -> StorageResult<Vec<PeerInfo>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {PEER_COLUMNS} FROM peers
             WHERE latency_ms >= 0 ORDER BY latency_ms ASC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], peer_from_row)?;
        rows.map(|parts| finish(parts?)).collect()
    }

    /// Updates a peer's measured latency. `-1` records an unknown RTT.
    pub fn update_peer_latency(&self, peer_id: &str, latency_ms: i64) -> StorageResult<bool> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached("UPDATE peers SET latency_ms = ?2 WHERE peer_id = ?1")?;
        Ok(stmt.execute(params![peer_id, latency_ms])? > 0)
    }

    /// Updates a peer's connection status.
    pub fn update_peer_status(&self, peer_id: &str, status: PeerStatus) -> StorageResult<bool> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached("UPDATE peers SET status_id = ?2 WHERE peer_id = ?1")?;
        Ok(stmt.execute(params![peer_id, status.to_db()])? > 0)
    }

    /// Removes a peer. Returns `true` if it existed.
    pub fn remove_peer(&self, peer_id: &str) -> StorageResult<bool> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached("DELETE FROM peers WHERE peer_id = ?1")?;
        Ok(stmt.execute(params![peer_id])? > 0)
    }
}
