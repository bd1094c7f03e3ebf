//! Stage 7: finalize.
//!
//! The sender closes with TRANSFER_COMPLETE carrying the hash the
//! receiver must reproduce. A mismatch answers INTEGRITY_FAIL, which
//! re-enters the meta stage up to the retry cap; after that the
//! transfer fails and the completion event fires.

use std::time::Instant;

use protocol::payload::{TransferAbort, TransferAck, TransferComplete};
use protocol::MessageType;

use super::{SyncPipeline, TransferState, MAX_RETRIES};
use crate::{SyncError, SyncResult};

impl SyncPipeline {
    /// Sends TRANSFER_COMPLETE for a transfer in the streaming stage.
    pub(crate) fn send_transfer_complete(&self, transfer_id: &str) -> SyncResult<()> {
        let Some((peer_id, complete)) = self.with_transfer(transfer_id, |ctx| {
            (
                ctx.peer_id.clone(),
                TransferComplete {
                    relative_path: ctx.relative_path.clone(),
                    final_hash: ctx.file_hash,
                    bytes_transferred: ctx.bytes_transferred,
                    duration_ms: ctx.started.elapsed().as_millis() as u32,
                },
            )
        }) else {
            return Err(SyncError::NotFound(format!("transfer {transfer_id}")));
        };

        self.send(&peer_id, MessageType::TransferComplete, &complete.encode())?;
        self.update_state(transfer_id, TransferState::AwaitingAck);
        tracing::info!(
            transfer_id,
            bytes = complete.bytes_transferred,
            duration_ms = complete.duration_ms,
            "sent transfer complete"
        );
        Ok(())
    }

    /// Receiver: verify the reconstructed file against the final hash.
    pub(crate) fn handle_transfer_complete(&self, peer_id: &str, payload: &[u8]) -> SyncResult<()> {
        let complete = TransferComplete::decode(payload)?;
        let local_path = self.absolute_path(&complete.relative_path);

        let computed_hash = if local_path.exists() {
            checksums::strong::digest_file(&local_path)?
        } else {
            [0u8; 32]
        };
        let verified = computed_hash == complete.final_hash;

        let ack = TransferAck {
            relative_path: complete.relative_path.clone(),
            verified,
            computed_hash,
        };
        let reply = if verified {
            MessageType::TransferAck
        } else {
            MessageType::IntegrityFail
        };
        self.send(peer_id, reply, &ack.encode())?;

        if verified {
            tracing::info!(peer = peer_id, path = %complete.relative_path, "integrity verified");
            self.db()
                .mark_file_synced(&local_path.display().to_string(), true)?;
        } else {
            tracing::error!(
                peer = peer_id,
                path = %complete.relative_path,
                expected = %checksums::strong::to_hex(&complete.final_hash[..8]),
                computed = %checksums::strong::to_hex(&computed_hash[..8]),
                "integrity check failed"
            );
        }
        Ok(())
    }

    /// Sender: the receiver verified the transfer.
    pub(crate) fn handle_transfer_ack(&self, peer_id: &str, payload: &[u8]) -> SyncResult<()> {
        let ack = TransferAck::decode(payload)?;
        let Some(transfer_id) = self.transfer_id_for(&ack.relative_path, peer_id) else {
            return Ok(());
        };

        if ack.verified {
            self.db()
                .mark_file_synced(&self.absolute_path(&ack.relative_path).display().to_string(), true)?;
            self.complete_transfer(&transfer_id);
        } else {
            // A TRANSFER_ACK with verified=0 is malformed; treat it as a
            // failure report.
            self.fail_transfer(&transfer_id, "peer reported unverified transfer");
        }
        Ok(())
    }

    /// Sender: the receiver's hash did not match; retry or give up.
    pub(crate) fn handle_integrity_fail(&self, peer_id: &str, payload: &[u8]) -> SyncResult<()> {
        let ack = TransferAck::decode(payload)?;
        let Some(transfer_id) = self.transfer_id_for(&ack.relative_path, peer_id) else {
            return Ok(());
        };

        let retries = self
            .with_transfer(&transfer_id, |ctx| {
                ctx.retry_count += 1;
                ctx.last_activity = Instant::now();
                ctx.retry_count
            })
            .unwrap_or(MAX_RETRIES + 1);

        if retries <= MAX_RETRIES {
            tracing::warn!(
                transfer_id,
                retries,
                "integrity failure, re-entering meta stage"
            );
            self.send_file_meta(&transfer_id)?;
        } else {
            self.fail_transfer(&transfer_id, "integrity check failed after retries");
        }
        Ok(())
    }

    pub(crate) fn handle_transfer_abort(&self, peer_id: &str, payload: &[u8]) -> SyncResult<()> {
        let abort = TransferAbort::decode(payload)?;
        if let Some(transfer_id) = self.transfer_id_for(&abort.relative_path, peer_id) {
            self.fail_transfer(&transfer_id, &format!("aborted by peer: {}", abort.reason));
        }
        Ok(())
    }
}
