//! Chunk reassembly.
//!
//! Bulk payloads arrive as `chunk_id/total_chunks` fragments, possibly
//! out of order and possibly duplicated. Each `(peer, path)` pair owns
//! one buffer of indexed slots; the first write to a slot wins, so
//! re-delivery never duplicates bytes.

use std::time::{Duration, Instant};

use protocol::chunk::Chunk;

use super::SyncPipeline;

/// Reassembly buffer for one in-flight bulk payload.
pub(crate) struct PendingChunks {
    pub(crate) total_chunks: u32,
    pub(crate) received_chunks: u32,
    pub(crate) slots: Vec<Option<Vec<u8>>>,
    pub(crate) last_activity: Instant,
}

impl SyncPipeline {
    /// Accepts one fragment; returns the reassembled payload once every
    /// slot is filled. The buffer is removed on completion.
    pub(crate) fn accept_chunk(&self, peer_id: &str, chunk: &Chunk) -> Option<Vec<u8>> {
        if chunk.total_chunks == 0 || chunk.chunk_id >= chunk.total_chunks {
            tracing::warn!(
                peer = peer_id,
                chunk_id = chunk.chunk_id,
                total = chunk.total_chunks,
                "chunk with inconsistent counters dropped"
            );
            return None;
        }

        let key = format!("{peer_id}|{}", chunk.relative_path);
        let mut buffers = self.chunk_buffers.lock().expect("chunk table poisoned");

        let pending = buffers.entry(key.clone()).or_insert_with(|| PendingChunks {
            total_chunks: chunk.total_chunks,
            received_chunks: 0,
            slots: vec![None; chunk.total_chunks as usize],
            last_activity: Instant::now(),
        });

        // A sender that restarted with a different chunk count resets
        // the buffer; mixing two framings can never reassemble.
        if pending.total_chunks != chunk.total_chunks {
            tracing::warn!(
                peer = peer_id,
                path = %chunk.relative_path,
                old = pending.total_chunks,
                new = chunk.total_chunks,
                "chunk framing changed, buffer reset"
            );
            *pending = PendingChunks {
                total_chunks: chunk.total_chunks,
                received_chunks: 0,
                slots: vec![None; chunk.total_chunks as usize],
                last_activity: Instant::now(),
            };
        }

        pending.last_activity = Instant::now();
        let slot = &mut pending.slots[chunk.chunk_id as usize];
        if slot.is_none() {
            *slot = Some(chunk.data.clone());
            pending.received_chunks += 1;
        }

        if pending.received_chunks < pending.total_chunks {
            tracing::debug!(
                peer = peer_id,
                path = %chunk.relative_path,
                received = pending.received_chunks,
                total = pending.total_chunks,
                "chunk buffered"
            );
            return None;
        }

        let pending = buffers.remove(&key)?;
        let mut payload = Vec::new();
        for slot in pending.slots {
            payload.extend_from_slice(&slot.unwrap_or_default());
        }
        Some(payload)
    }

    /// Discards buffers idle longer than `timeout`.
    pub(crate) fn sweep_stale_chunks(&self, timeout: Duration) {
        let mut buffers = self.chunk_buffers.lock().expect("chunk table poisoned");
        buffers.retain(|key, pending| {
            let keep = pending.last_activity.elapsed() <= timeout;
            if !keep {
                tracing::warn!(key, "stale chunk buffer discarded");
            }
            keep
        });
    }
}
