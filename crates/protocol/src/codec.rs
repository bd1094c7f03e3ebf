//! Wire serialization for signature sets and delta streams.
//!
//! Signature sets are flat big-endian records. Delta streams are
//! LZ4-compressed with the original payload length prepended; the decoder
//! treats any decompressed-size disagreement as a protocol violation.

use engine::{BlockSignature, Delta, DeltaInstruction};

use crate::cursor::Cursor;
use crate::{ProtocolError, ProtocolResult};

const STRONG_DIGEST_LEN: u32 = 32;

/// Serializes an ordered signature set.
///
/// Layout: `u32 count` then per block `u32 index · u32 adler32 ·
/// u32 sha_len · sha`.
#[must_use]
pub fn encode_signatures(signatures: &[BlockSignature]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + signatures.len() * (12 + 32));
    out.extend_from_slice(&(signatures.len() as u32).to_be_bytes());
    for sig in signatures {
        out.extend_from_slice(&sig.index.to_be_bytes());
        out.extend_from_slice(&sig.adler32.to_be_bytes());
        out.extend_from_slice(&STRONG_DIGEST_LEN.to_be_bytes());
        out.extend_from_slice(&sig.strong);
    }
    out
}

/// Deserializes a signature set.
pub fn decode_signatures(data: &[u8]) -> ProtocolResult<Vec<BlockSignature>> {
    let mut cursor = Cursor::new(data);
    let count = cursor.u32("signature set")?;
    let mut signatures = Vec::with_capacity(count.min(1 << 20) as usize);

    for _ in 0..count {
        let index = cursor.u32("signature record")?;
        let adler32 = cursor.u32("signature record")?;
        let sha_len = cursor.u32("signature record")?;
        if sha_len != STRONG_DIGEST_LEN {
            return Err(ProtocolError::BadDigestLength(sha_len));
        }
        let mut strong = [0u8; 32];
        strong.copy_from_slice(cursor.take(32, "signature digest")?);
        signatures.push(BlockSignature {
            index,
            adler32,
            strong,
        });
    }
    Ok(signatures)
}

/// Serializes and compresses a delta stream.
///
/// Wire layout: `u32 original_size · LZ4(payload)` where `payload =
/// u32 count · u32 block_size · [u8 tag · …]`.
#[must_use]
pub fn encode_delta(delta: &Delta) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(delta.instructions.len() as u32).to_be_bytes());
    payload.extend_from_slice(&delta.block_size.to_be_bytes());

    for instruction in &delta.instructions {
        match instruction {
            DeltaInstruction::Literal { bytes } => {
                payload.push(1);
                payload.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                payload.extend_from_slice(bytes);
            }
            DeltaInstruction::Copy { block_index } => {
                payload.push(0);
                payload.extend_from_slice(&block_index.to_be_bytes());
            }
        }
    }

    let compressed = lz4_flex::block::compress(&payload);
    tracing::debug!(
        raw = payload.len(),
        compressed = compressed.len(),
        "compressed delta stream"
    );

    let mut out = Vec::with_capacity(4 + compressed.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&compressed);
    out
}

/// Decompresses and deserializes a delta stream.
///
/// Fails with [`ProtocolError::Decompress`] when the payload does not
/// decompress to exactly the declared size.
pub fn decode_delta(data: &[u8]) -> ProtocolResult<Delta> {
    let mut cursor = Cursor::new(data);
    let original_size = cursor.u32("delta stream")? as usize;
    let compressed = cursor.rest();

    let payload = lz4_flex::block::decompress(compressed, original_size)
        .map_err(|err| ProtocolError::Decompress(err.to_string()))?;
    if payload.len() != original_size {
        return Err(ProtocolError::Decompress(format!(
            "expected {original_size} bytes, got {}",
            payload.len()
        )));
    }

    let mut cursor = Cursor::new(&payload);
    let count = cursor.u32("delta payload")?;
    let block_size = cursor.u32("delta payload")?;

    let mut instructions = Vec::with_capacity(count.min(1 << 20) as usize);
    for _ in 0..count {
        match cursor.u8("delta instruction")? {
            1 => {
                let len = cursor.u32("literal length")? as usize;
                let bytes = cursor.take(len, "literal bytes")?.to_vec();
                instructions.push(DeltaInstruction::Literal { bytes });
            }
            0 => {
                let block_index = cursor.u32("copy index")?;
                instructions.push(DeltaInstruction::Copy { block_index });
            }
            other => return Err(ProtocolError::UnknownDeltaTag(other)),
        }
    }

    Ok(Delta {
        block_size,
        instructions,
    })
}
