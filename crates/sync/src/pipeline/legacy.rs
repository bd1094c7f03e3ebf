//! Legacy text-protocol handlers and update broadcast.
//!
//! The binary protocol is authoritative; these handlers keep old peers
//! syncing. The router parses the pipe-delimited prefix and hands the
//! typed message here.

use std::fs;

use protocol::legacy::LegacyMessage;
use protocol::{codec, Capabilities};

use super::{now_ms, SyncPipeline};
use crate::SyncResult;

impl SyncPipeline {
    /// Fans a local change out to every authenticated session.
    ///
    /// Peers that negotiated delta sync get the full binary pipeline;
    /// everyone else gets a legacy UPDATE_AVAILABLE announcement.
    pub fn broadcast_update(&self, local_path: &std::path::Path) -> SyncResult<()> {
        let peers: Vec<(String, Capabilities)> = {
            let sessions = self.sessions.lock().expect("session table poisoned");
            sessions
                .iter()
                .filter(|(_, session)| session.authenticated)
                .map(|(peer_id, session)| (peer_id.clone(), session.negotiated))
                .collect()
        };

        if peers.is_empty() {
            tracing::debug!(path = %local_path.display(), "no authenticated peers to notify");
            return Ok(());
        }

        let relative_path = self.relative_path(local_path);
        for (peer_id, caps) in peers {
            if caps.contains(Capabilities::DELTA_SYNC) {
                if let Err(err) = self.sync_file_to_peer(&peer_id, local_path) {
                    tracing::error!(peer = %peer_id, %err, "failed to start sync");
                }
            } else {
                let announce = LegacyMessage::UpdateAvailable {
                    relative_path: relative_path.clone(),
                    hash: checksums::strong::to_hex(&checksums::strong::digest_file(local_path)?),
                    size: fs::metadata(local_path)?.len(),
                };
                if let Err(err) = self.transport_send_raw(&peer_id, &announce.encode()) {
                    tracing::error!(peer = %peer_id, %err, "failed to send legacy update");
                }
            }
        }
        Ok(())
    }

    /// Handles one parsed legacy message.
    pub fn handle_legacy(&self, peer_id: &str, message: LegacyMessage) -> SyncResult<()> {
        match message {
            LegacyMessage::UpdateAvailable {
                relative_path,
                hash,
                ..
            } => {
                let local_path = self.absolute_path(&relative_path);
                if local_path.exists() {
                    let local_hash =
                        checksums::strong::to_hex(&checksums::strong::digest_file(&local_path)?);
                    if !hash.is_empty() && local_hash == hash {
                        tracing::debug!(path = %relative_path, "already current, ignoring update");
                        return Ok(());
                    }
                    let (_, blocks) = engine::signature(&local_path, -1)?;
                    let request = LegacyMessage::RequestDelta {
                        relative_path,
                        signatures: codec::encode_signatures(&blocks),
                    };
                    self.transport_send_raw(peer_id, &request.encode())
                } else {
                    let request = LegacyMessage::RequestFile { relative_path };
                    self.transport_send_raw(peer_id, &request.encode())
                }
            }
            LegacyMessage::RequestDelta {
                relative_path,
                signatures,
            } => {
                let local_path = self.absolute_path(&relative_path);
                if !local_path.exists() {
                    tracing::warn!(path = %relative_path, "delta requested for missing file");
                    return Ok(());
                }
                let peer_signatures = codec::decode_signatures(&signatures)?;
                let delta = engine::delta(&local_path, &peer_signatures, -1)?;
                let reply = LegacyMessage::DeltaData {
                    relative_path,
                    delta: codec::encode_delta(&delta),
                };
                self.transport_send_raw(peer_id, &reply.encode())
            }
            LegacyMessage::DeltaData {
                relative_path,
                delta,
            } => {
                let decoded = codec::decode_delta(&delta)?;
                let local_path = self.absolute_path(&relative_path);
                if let Some(parent) = local_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                if !local_path.exists() {
                    fs::write(&local_path, b"")?;
                }
                let rebuilt = engine::apply(&local_path, &decoded)?;
                self.install_received_file(peer_id, &relative_path, &local_path, &rebuilt)
            }
            LegacyMessage::RequestFile { relative_path } => {
                let local_path = self.absolute_path(&relative_path);
                if !local_path.exists() {
                    tracing::warn!(path = %relative_path, "whole file requested but missing");
                    return Ok(());
                }
                let reply = LegacyMessage::FileData {
                    relative_path,
                    contents: fs::read(&local_path)?,
                };
                self.transport_send_raw(peer_id, &reply.encode())
            }
            LegacyMessage::FileData {
                relative_path,
                contents,
            } => {
                let local_path = self.absolute_path(&relative_path);
                if let Some(parent) = local_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                self.install_received_file(peer_id, &relative_path, &local_path, &contents)
            }
            LegacyMessage::DeleteFile { relative_path } => {
                let local_path = self.absolute_path(&relative_path);
                let path_text = local_path.display().to_string();
                let previous_hash = self
                    .db()
                    .file_by_path(&path_text)?
                    .map(|meta| meta.content_hash)
                    .unwrap_or_default();
                if local_path.exists() {
                    // Snapshot before honoring the remote deletion.
                    self.versions().create_version(
                        &local_path,
                        versioning::ChangeType::Remote,
                        peer_id,
                        "pre-delete snapshot",
                    )?;
                    if let Some(name) = local_path.file_name().and_then(|n| n.to_str()) {
                        self.mark_patched(name);
                    }
                    fs::remove_file(&local_path)?;
                }
                self.db().remove_file(&path_text)?;
                self.db()
                    .record_file_version(&path_text, "", &previous_hash, peer_id, now_ms(), "delete")?;
                tracing::info!(peer = peer_id, path = %relative_path, "honored remote deletion");
                Ok(())
            }
        }
    }

    /// Raw (non-framed) send used by the legacy text protocol.
    fn transport_send_raw(&self, peer_id: &str, payload: &[u8]) -> SyncResult<()> {
        self.transport.send(peer_id, payload)?;
        Ok(())
    }
}
