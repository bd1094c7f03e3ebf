//! Message payloads for the meta, hash-scan, and finalize stages.
//!
//! Every payload that names a file carries the path as a length-prefixed
//! UTF-8 string relative to the watch root.

use crate::cursor::Cursor;
use crate::{ProtocolError, ProtocolResult};

/// FILE_META payload: announces a file about to be synchronized.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileMeta {
    /// Path relative to the watch root.
    pub relative_path: String,
    /// File size in bytes.
    pub size: u64,
    /// Modification time, milliseconds since the Unix epoch.
    pub mtime_ms: u64,
    /// SHA-256 of the announced contents.
    pub content_hash: [u8; 32],
}

impl FileMeta {
    /// Serializes the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let path = self.relative_path.as_bytes();
        let mut out = Vec::with_capacity(2 + 16 + 32 + path.len());
        out.extend_from_slice(&(path.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.size.to_be_bytes());
        out.extend_from_slice(&self.mtime_ms.to_be_bytes());
        out.extend_from_slice(&self.content_hash);
        out.extend_from_slice(path);
        out
    }

    /// Deserializes the payload.
    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut cursor = Cursor::new(payload);
        let path_len = cursor.u16("file meta")? as usize;
        let size = cursor.u64("file meta")?;
        let mtime_ms = cursor.u64("file meta")?;
        let mut content_hash = [0u8; 32];
        content_hash.copy_from_slice(cursor.take(32, "file meta hash")?);
        let relative_path = take_path(&mut cursor, path_len)?;
        Ok(Self {
            relative_path,
            size,
            mtime_ms,
            content_hash,
        })
    }
}

/// FILE_META_ACK payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileMetaAck {
    /// Path being acknowledged.
    pub relative_path: String,
    /// Receiver accepts the transfer.
    pub accepted: bool,
}

impl FileMetaAck {
    /// Serializes the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let path = self.relative_path.as_bytes();
        let mut out = Vec::with_capacity(3 + path.len());
        out.extend_from_slice(&(path.len() as u16).to_be_bytes());
        out.push(u8::from(self.accepted));
        out.extend_from_slice(path);
        out
    }

    /// Deserializes the payload.
    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut cursor = Cursor::new(payload);
        let path_len = cursor.u16("file meta ack")? as usize;
        let accepted = cursor.u8("file meta ack")? != 0;
        let relative_path = take_path(&mut cursor, path_len)?;
        Ok(Self {
            relative_path,
            accepted,
        })
    }
}

/// SIGNATURE_REQUEST / SIGNATURE_RESPONSE payload.
///
/// Carries the sender's block signatures for `relative_path`; an empty
/// signature blob means "I have no local copy, send everything".
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignaturePayload {
    /// Path the signatures describe.
    pub relative_path: String,
    /// Encoded signature set ([`crate::codec::encode_signatures`]).
    pub signatures: Vec<u8>,
}

impl SignaturePayload {
    /// Serializes the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let path = self.relative_path.as_bytes();
        let mut out = Vec::with_capacity(2 + path.len() + self.signatures.len());
        out.extend_from_slice(&(path.len() as u16).to_be_bytes());
        out.extend_from_slice(path);
        out.extend_from_slice(&self.signatures);
        out
    }

    /// Deserializes the payload.
    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut cursor = Cursor::new(payload);
        let path_len = cursor.u16("signature payload")? as usize;
        let relative_path = take_path(&mut cursor, path_len)?;
        let signatures = cursor.rest().to_vec();
        Ok(Self {
            relative_path,
            signatures,
        })
    }
}

/// TRANSFER_COMPLETE payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferComplete {
    /// Path of the finished transfer.
    pub relative_path: String,
    /// SHA-256 the receiver must reproduce.
    pub final_hash: [u8; 32],
    /// Bytes the sender pushed for this transfer.
    pub bytes_transferred: u64,
    /// Transfer duration in milliseconds.
    pub duration_ms: u32,
}

impl TransferComplete {
    /// Serializes the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let path = self.relative_path.as_bytes();
        let mut out = Vec::with_capacity(2 + 32 + 12 + path.len());
        out.extend_from_slice(&(path.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.final_hash);
        out.extend_from_slice(&self.bytes_transferred.to_be_bytes());
        out.extend_from_slice(&self.duration_ms.to_be_bytes());
        out.extend_from_slice(path);
        out
    }

    /// Deserializes the payload.
    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut cursor = Cursor::new(payload);
        let path_len = cursor.u16("transfer complete")? as usize;
        let mut final_hash = [0u8; 32];
        final_hash.copy_from_slice(cursor.take(32, "transfer complete hash")?);
        let bytes_transferred = cursor.u64("transfer complete")?;
        let duration_ms = cursor.u32("transfer complete")?;
        let relative_path = take_path(&mut cursor, path_len)?;
        Ok(Self {
            relative_path,
            final_hash,
            bytes_transferred,
            duration_ms,
        })
    }
}

/// TRANSFER_ACK / INTEGRITY_FAIL payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferAck {
    /// Path being acknowledged.
    pub relative_path: String,
    /// `true` when the receiver's hash matched.
    pub verified: bool,
    /// Hash the receiver computed over its reconstructed file.
    pub computed_hash: [u8; 32],
}

impl TransferAck {
    /// Serializes the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let path = self.relative_path.as_bytes();
        let mut out = Vec::with_capacity(3 + 32 + path.len());
        out.extend_from_slice(&(path.len() as u16).to_be_bytes());
        out.push(u8::from(self.verified));
        out.extend_from_slice(&self.computed_hash);
        out.extend_from_slice(path);
        out
    }

    /// Deserializes the payload.
    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut cursor = Cursor::new(payload);
        let path_len = cursor.u16("transfer ack")? as usize;
        let verified = cursor.u8("transfer ack")? != 0;
        let mut computed_hash = [0u8; 32];
        computed_hash.copy_from_slice(cursor.take(32, "transfer ack hash")?);
        let relative_path = take_path(&mut cursor, path_len)?;
        Ok(Self {
            relative_path,
            verified,
            computed_hash,
        })
    }
}

/// TRANSFER_ABORT payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferAbort {
    /// Path of the aborted transfer.
    pub relative_path: String,
    /// Human-readable abort reason.
    pub reason: String,
}

impl TransferAbort {
    /// Serializes the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let path = self.relative_path.as_bytes();
        let reason = self.reason.as_bytes();
        let mut out = Vec::with_capacity(4 + path.len() + reason.len());
        out.extend_from_slice(&(path.len() as u16).to_be_bytes());
        out.extend_from_slice(&(reason.len() as u16).to_be_bytes());
        out.extend_from_slice(path);
        out.extend_from_slice(reason);
        out
    }

    /// Deserializes the payload.
    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut cursor = Cursor::new(payload);
        let path_len = cursor.u16("transfer abort")? as usize;
        let reason_len = cursor.u16("transfer abort")? as usize;
        let relative_path = take_path(&mut cursor, path_len)?;
        let reason = std::str::from_utf8(cursor.take(reason_len, "abort reason")?)
            .map_err(|_| ProtocolError::InvalidUtf8("abort reason"))?
            .to_owned();
        Ok(Self {
            relative_path,
            reason,
        })
    }
}

fn take_path(cursor: &mut Cursor<'_>, len: usize) -> ProtocolResult<String> {
    std::str::from_utf8(cursor.take(len, "path")?)
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidUtf8("path"))
}
