//! Stages 3-6: meta transfer, hash scan, delta, and block stream.
//!
//! The sender announces a file with FILE_META. The receiver acks,
//! computes its local block signatures (an empty set when it has no
//! copy), and offers them in a SIGNATURE_REQUEST. The sender answers
//! with chunked DELTA_RESPONSE frames when delta sync was negotiated,
//! or falls back to chunked raw BLOCK_DATA, then finalizes.

use std::fs;
use std::time::Instant;

use protocol::chunk::{self, Chunk};
use protocol::payload::{FileMeta, FileMetaAck, SignaturePayload};
use protocol::{codec, Capabilities, MessageType};

use super::{now_ms, SyncPipeline, TransferContext, TransferState};
use crate::{SyncError, SyncResult};

impl SyncPipeline {
    /// Starts synchronizing a local file to a peer (all stages).
    ///
    /// At most one transfer runs per `(peer, path)`: when one is already
    /// active its id is returned instead of starting another.
    pub fn sync_file_to_peer(&self, peer_id: &str, local_path: &std::path::Path) -> SyncResult<String> {
        if !self.is_peer_authenticated(peer_id) {
            return Err(SyncError::NotAuthenticated(peer_id.to_owned()));
        }

        let metadata = fs::metadata(local_path)?;
        let file_hash = checksums::strong::digest_file(local_path)?;
        let relative_path = self.relative_path(local_path);

        let ctx = TransferContext {
            transfer_id: self.generate_transfer_id(peer_id),
            peer_id: peer_id.to_owned(),
            relative_path: relative_path.clone(),
            local_path: local_path.to_owned(),
            file_size: metadata.len(),
            bytes_transferred: 0,
            state: TransferState::SendingMeta,
            use_delta: false,
            delta_instructions: 0,
            saved_bytes: 0,
            retry_count: 0,
            started: Instant::now(),
            last_activity: Instant::now(),
            file_hash,
            last_error: None,
        };

        let (transfer_id, created) = self.register_transfer(ctx);
        if !created {
            tracing::debug!(
                peer = peer_id,
                path = %relative_path,
                transfer_id,
                "transfer already active, reusing"
            );
            return Ok(transfer_id);
        }

        self.send_file_meta(&transfer_id)?;
        Ok(transfer_id)
    }

    /// Sends (or re-sends, on retry) the FILE_META announcement.
    pub(crate) fn send_file_meta(&self, transfer_id: &str) -> SyncResult<()> {
        let Some((peer_id, meta)) = self.with_transfer(transfer_id, |ctx| {
            ctx.state = TransferState::SendingMeta;
            ctx.last_activity = Instant::now();
            (
                ctx.peer_id.clone(),
                FileMeta {
                    relative_path: ctx.relative_path.clone(),
                    size: ctx.file_size,
                    mtime_ms: now_ms(),
                    content_hash: ctx.file_hash,
                },
            )
        }) else {
            return Err(SyncError::NotFound(format!("transfer {transfer_id}")));
        };

        self.send(&peer_id, MessageType::FileMeta, &meta.encode())?;
        self.update_state(transfer_id, TransferState::Hashing);
        Ok(())
    }

    pub(crate) fn handle_file_meta(&self, peer_id: &str, payload: &[u8]) -> SyncResult<()> {
        let meta = FileMeta::decode(payload)?;
        tracing::info!(
            peer = peer_id,
            path = %meta.relative_path,
            size = meta.size,
            "incoming file announcement"
        );

        let ack = FileMetaAck {
            relative_path: meta.relative_path.clone(),
            accepted: true,
        };
        self.send(peer_id, MessageType::FileMetaAck, &ack.encode())?;

        // Hash scan: offer our local signatures as the delta baseline.
        let local_path = self.absolute_path(&meta.relative_path);
        let signatures = if local_path.exists() {
            let (_, blocks) = engine::signature(&local_path, -1)?;
            codec::encode_signatures(&blocks)
        } else {
            codec::encode_signatures(&[])
        };

        let offer = SignaturePayload {
            relative_path: meta.relative_path,
            signatures,
        };
        self.send(peer_id, MessageType::SignatureRequest, &offer.encode())
    }

    pub(crate) fn handle_file_meta_ack(&self, peer_id: &str, payload: &[u8]) -> SyncResult<()> {
        let ack = FileMetaAck::decode(payload)?;
        let Some(transfer_id) = self.transfer_id_for(&ack.relative_path, peer_id) else {
            return Ok(());
        };
        if ack.accepted {
            self.update_state(&transfer_id, TransferState::AwaitingSig);
        } else {
            self.fail_transfer(&transfer_id, "peer rejected file metadata");
        }
        Ok(())
    }

    /// Sender side of the hash scan: the peer offered its signatures,
    /// stream back a delta (or whole file without the delta capability).
    pub(crate) fn handle_signature_payload(&self, peer_id: &str, payload: &[u8]) -> SyncResult<()> {
        let offer = SignaturePayload::decode(payload)?;
        let Some(transfer_id) = self.transfer_id_for(&offer.relative_path, peer_id) else {
            tracing::debug!(peer = peer_id, path = %offer.relative_path, "signatures without transfer");
            return Ok(());
        };

        let use_delta = self
            .peer_capabilities(peer_id)
            .is_some_and(|caps| caps.contains(Capabilities::DELTA_SYNC));
        let chunk_size = self
            .with_session(peer_id, |session| session.agreed_chunk_size)
            .unwrap_or(protocol::DEFAULT_CHUNK_SIZE) as usize;

        let Some(local_path) = self.with_transfer(&transfer_id, |ctx| ctx.local_path.clone())
        else {
            return Ok(());
        };
        if !local_path.exists() {
            self.fail_transfer(&transfer_id, "local file vanished before streaming");
            return Ok(());
        }

        let (message_type, payload_bytes, instructions, saved) = if use_delta {
            let peer_signatures = codec::decode_signatures(&offer.signatures)?;
            let delta = engine::delta(&local_path, &peer_signatures, -1)?;
            let literal = delta.literal_bytes();
            let file_size = fs::metadata(&local_path)?.len();
            (
                MessageType::DeltaResponse,
                codec::encode_delta(&delta),
                delta.instructions.len() as u32,
                file_size.saturating_sub(literal),
            )
        } else {
            let contents = fs::read(&local_path)?;
            (MessageType::BlockData, contents, 0, 0)
        };

        self.with_transfer(&transfer_id, |ctx| {
            ctx.state = TransferState::StreamingBlocks;
            ctx.use_delta = use_delta;
            ctx.delta_instructions = instructions;
            ctx.saved_bytes = saved;
            ctx.last_activity = Instant::now();
        });

        let total_bytes = payload_bytes.len() as u64;
        let chunks = chunk::split(&offer.relative_path, &payload_bytes, chunk_size);
        tracing::info!(
            peer = peer_id,
            path = %offer.relative_path,
            bytes = total_bytes,
            chunks = chunks.len(),
            delta = use_delta,
            "streaming payload"
        );
        for piece in &chunks {
            self.send(peer_id, message_type, &piece.encode())?;
        }

        self.with_transfer(&transfer_id, |ctx| {
            ctx.bytes_transferred = total_bytes;
        });
        self.send_transfer_complete(&transfer_id)
    }

    /// Receiver side of the delta path.
    pub(crate) fn handle_delta_response(&self, peer_id: &str, payload: &[u8]) -> SyncResult<()> {
        let piece = Chunk::decode(payload)?;
        let relative_path = piece.relative_path.clone();
        let Some(full_delta) = self.accept_chunk(peer_id, &piece) else {
            return Ok(());
        };

        let delta = codec::decode_delta(&full_delta)?;
        let local_path = self.absolute_path(&relative_path);

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !local_path.exists() {
            fs::write(&local_path, b"")?;
        }

        let rebuilt = engine::apply(&local_path, &delta)?;
        self.install_received_file(peer_id, &relative_path, &local_path, &rebuilt)?;
        tracing::info!(
            peer = peer_id,
            path = %relative_path,
            instructions = delta.instructions.len(),
            bytes = rebuilt.len(),
            "applied delta"
        );
        Ok(())
    }

    /// Receiver side of the whole-file fallback.
    pub(crate) fn handle_block_data(&self, peer_id: &str, payload: &[u8]) -> SyncResult<()> {
        let piece = Chunk::decode(payload)?;
        let relative_path = piece.relative_path.clone();
        let Some(contents) = self.accept_chunk(peer_id, &piece) else {
            return Ok(());
        };

        let local_path = self.absolute_path(&relative_path);
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.install_received_file(peer_id, &relative_path, &local_path, &contents)?;

        let ack = FileMetaAck {
            relative_path,
            accepted: true,
        };
        self.send(peer_id, MessageType::BlockAck, &ack.encode())
    }

    pub(crate) fn handle_block_ack(&self, peer_id: &str, payload: &[u8]) -> SyncResult<()> {
        let ack = FileMetaAck::decode(payload)?;
        if let Some(transfer_id) = self.transfer_id_for(&ack.relative_path, peer_id) {
            self.with_transfer(&transfer_id, |ctx| {
                ctx.last_activity = Instant::now();
            });
        }
        Ok(())
    }

    /// Common write path for remotely produced contents: snapshot the
    /// incoming version, suppress the watcher echo, write the file, and
    /// record the change in storage.
    pub(crate) fn install_received_file(
        &self,
        peer_id: &str,
        relative_path: &str,
        local_path: &std::path::Path,
        contents: &[u8],
    ) -> SyncResult<()> {
        let new_hash = checksums::strong::digest_hex(contents);
        let parent_hash = self
            .db()
            .file_by_path(&local_path.display().to_string())?
            .map(|meta| meta.content_hash)
            .unwrap_or_default();

        self.versions().create_version_from_data(
            local_path,
            contents,
            &new_hash,
            now_ms(),
            peer_id,
            versioning::ChangeType::Remote,
        )?;

        let filename = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(relative_path);
        self.mark_patched(filename);

        fs::write(local_path, contents)?;

        self.db().upsert_file(&storage::FileMetadata {
            path: local_path.display().to_string(),
            content_hash: new_hash.clone(),
            modified_time_ms: now_ms(),
            size: contents.len() as u64,
            vector_clock: String::new(),
            synced: true,
            version: 1,
        })?;
        self.db().record_file_version(
            &local_path.display().to_string(),
            &new_hash,
            &parent_hash,
            peer_id,
            now_ms(),
            "remote",
        )?;
        Ok(())
    }
}
