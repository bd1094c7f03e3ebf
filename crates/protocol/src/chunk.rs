//! Bulk-payload fragmentation.
//!
//! Signatures, delta streams, and whole files are split into chunks sized
//! to the session's agreed chunk size, each tagged `chunk_id/total_chunks`
//! so the receiver can reassemble out-of-order arrivals.

use crate::cursor::Cursor;
use crate::{ProtocolError, ProtocolResult};

/// One fragment of a larger payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Chunk {
    /// Path the payload belongs to.
    pub relative_path: String,
    /// Zero-based fragment index.
    pub chunk_id: u32,
    /// Total fragments in the payload.
    pub total_chunks: u32,
    /// Fragment bytes.
    pub data: Vec<u8>,
}

impl Chunk {
    /// Serializes the chunk payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let path = self.relative_path.as_bytes();
        let mut out = Vec::with_capacity(10 + path.len() + self.data.len());
        out.extend_from_slice(&(path.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.chunk_id.to_be_bytes());
        out.extend_from_slice(&self.total_chunks.to_be_bytes());
        out.extend_from_slice(path);
        out.extend_from_slice(&self.data);
        out
    }

    /// Deserializes a chunk payload.
    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut cursor = Cursor::new(payload);
        let path_len = cursor.u16("chunk")? as usize;
        let chunk_id = cursor.u32("chunk")?;
        let total_chunks = cursor.u32("chunk")?;
        let relative_path = std::str::from_utf8(cursor.take(path_len, "chunk path")?)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8("chunk path"))?;
        let data = cursor.rest().to_vec();
        Ok(Self {
            relative_path,
            chunk_id,
            total_chunks,
            data,
        })
    }
}

/// Splits `payload` into chunks of at most `chunk_size` bytes.
///
/// An empty payload still produces one (empty) chunk so the receiver
/// observes a complete transfer.
#[must_use]
pub fn split(relative_path: &str, payload: &[u8], chunk_size: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let total = payload.len().div_ceil(chunk_size).max(1) as u32;

    (0..total)
        .map(|chunk_id| {
            let start = chunk_id as usize * chunk_size;
            let end = (start + chunk_size).min(payload.len());
            Chunk {
                relative_path: relative_path.to_owned(),
                chunk_id,
                total_chunks: total,
                data: payload[start..end].to_vec(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_round_trips() {
        let chunk = Chunk {
            relative_path: "dir/file".to_owned(),
            chunk_id: 3,
            total_chunks: 9,
            data: vec![1, 2, 3, 4],
        };
        assert_eq!(Chunk::decode(&chunk.encode()).expect("decode"), chunk);
    }

    #[test]
    fn split_covers_payload_exactly() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let chunks = split("p", &payload, 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].data.len(), 100);
        assert_eq!(chunks[2].data.len(), 56);

        let rebuilt: Vec<u8> = chunks.iter().flat_map(|c| c.data.clone()).collect();
        assert_eq!(rebuilt, payload);
        assert!(chunks.iter().all(|c| c.total_chunks == 3));
    }

    #[test]
    fn empty_payload_yields_one_empty_chunk() {
        let chunks = split("p", &[], 64);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].data.is_empty());
        assert_eq!(chunks[0].total_chunks, 1);
    }

    #[test]
    fn truncated_chunk_is_rejected() {
        let chunk = Chunk {
            relative_path: "abc".to_owned(),
            chunk_id: 0,
            total_chunks: 1,
            data: Vec::new(),
        };
        let encoded = chunk.encode();
        assert!(Chunk::decode(&encoded[..encoded.len() - 2]).is_err());
    }
}
