//! Wire protocol for peer-to-peer sync.
//!
//! Two protocols co-exist on the same byte stream. The binary protocol is
//! authoritative: every frame opens with the magic `0x53454E54` ("SENT")
//! followed by a fixed [`FrameHeader`] and a message-specific payload. The
//! legacy pipe-delimited text protocol ([`legacy`]) survives as a
//! compatibility shim; receivers tell them apart by peeking at the first
//! four bytes.
//!
//! Bulk payloads (signature sets, delta streams, whole files) never travel
//! in one frame: [`chunk`] fragments them into `chunk_id/total_chunks`
//! pieces sized to the session's agreed chunk size.

#![deny(unsafe_code)]

pub mod chunk;
pub mod codec;
pub mod discovery;
mod frame;
pub mod handshake;
pub mod legacy;
pub mod payload;

use thiserror::Error;

pub use frame::{build_frame, has_magic, FrameHeader, MessageType, FRAME_HEADER_LEN};
pub use handshake::Capabilities;

/// Frame magic, ASCII "SENT".
pub const PROTOCOL_MAGIC: u32 = 0x5345_4E54;

/// Default chunk size for bulk payload fragmentation (64 KiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024;

/// Default maximum block size advertised during handshake (1 MiB).
pub const DEFAULT_MAX_BLOCK_SIZE: u32 = 1024 * 1024;

/// Result type for protocol encoding and decoding.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame does not start with the protocol magic.
    #[error("bad frame magic: 0x{0:08x}")]
    BadMagic(u32),
    /// The message type code is not known.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u16),
    /// The buffer ended before the structure was complete.
    #[error("truncated {0}")]
    Truncated(&'static str),
    /// A length field disagrees with the bytes that follow it.
    #[error("{context}: declared {declared} bytes, found {found}")]
    LengthMismatch {
        /// What was being decoded.
        context: &'static str,
        /// Length declared on the wire.
        declared: usize,
        /// Length actually available or produced.
        found: usize,
    },
    /// A strong digest had an unexpected length.
    #[error("bad digest length: {0}")]
    BadDigestLength(u32),
    /// LZ4 decompression failed or produced the wrong number of bytes.
    #[error("decompression failed: {0}")]
    Decompress(String),
    /// A delta instruction tag was neither copy nor literal.
    #[error("unknown delta instruction tag: {0}")]
    UnknownDeltaTag(u8),
    /// A path or text field was not valid UTF-8.
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    /// A legacy text message had an unknown prefix or malformed fields.
    #[error("malformed legacy message: {0}")]
    MalformedLegacy(&'static str),
}

/// Byte-cursor helpers shared by the decoders in this crate.
pub(crate) mod cursor {
    use super::{ProtocolError, ProtocolResult};

    pub(crate) struct Cursor<'a> {
        data: &'a [u8],
        pos: usize,
    }

    impl<'a> Cursor<'a> {
        pub(crate) fn new(data: &'a [u8]) -> Self {
            Self { data, pos: 0 }
        }

        pub(crate) fn remaining(&self) -> usize {
            self.data.len() - self.pos
        }

        pub(crate) fn take(&mut self, len: usize, context: &'static str) -> ProtocolResult<&'a [u8]> {
            if self.remaining() < len {
                return Err(ProtocolError::Truncated(context));
            }
            let slice = &self.data[self.pos..self.pos + len];
            self.pos += len;
            Ok(slice)
        }

        pub(crate) fn u8(&mut self, context: &'static str) -> ProtocolResult<u8> {
            Ok(self.take(1, context)?[0])
        }

        pub(crate) fn u16(&mut self, context: &'static str) -> ProtocolResult<u16> {
            let bytes = self.take(2, context)?;
            Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
        }

        pub(crate) fn u32(&mut self, context: &'static str) -> ProtocolResult<u32> {
            let bytes = self.take(4, context)?;
            Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }

        pub(crate) fn u64(&mut self, context: &'static str) -> ProtocolResult<u64> {
            let bytes = self.take(8, context)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Ok(u64::from_be_bytes(raw))
        }

        pub(crate) fn rest(&mut self) -> &'a [u8] {
            let slice = &self.data[self.pos..];
            self.pos = self.data.len();
            slice
        }
    }
}
