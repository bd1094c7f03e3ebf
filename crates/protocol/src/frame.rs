use crate::cursor::Cursor;
use crate::{ProtocolError, ProtocolResult, PROTOCOL_MAGIC};

/// Encoded length of a [`FrameHeader`].
pub const FRAME_HEADER_LEN: usize = 24;

/// Message types by pipeline stage.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u16)]
pub enum MessageType {
    /// Handshake opener carrying capabilities and limits.
    HandshakeInit = 1,
    /// Handshake reply carrying negotiated values and a challenge.
    HandshakeResponse = 2,
    /// Handshake closer carrying the challenge proof.
    HandshakeComplete = 3,
    /// File metadata announcement.
    FileMeta = 10,
    /// Acknowledgement of a metadata announcement.
    FileMetaAck = 11,
    /// Signature set offered as the baseline for a delta.
    SignatureRequest = 20,
    /// Signature set sent in reply to an explicit request.
    SignatureResponse = 21,
    /// One chunk of a serialized delta stream.
    DeltaResponse = 30,
    /// One chunk of raw file data (whole-file fallback).
    BlockData = 40,
    /// Flow-control acknowledgement for received blocks.
    BlockAck = 41,
    /// Sender's end-of-transfer notification with the final hash.
    TransferComplete = 50,
    /// Receiver's verification acknowledgement.
    TransferAck = 51,
    /// Receiver's hash-mismatch notification.
    IntegrityFail = 52,
    /// Either side aborting a transfer.
    TransferAbort = 53,
}

impl MessageType {
    /// Decodes a wire code into a message type.
    pub fn from_code(code: u16) -> ProtocolResult<Self> {
        Ok(match code {
            1 => Self::HandshakeInit,
            2 => Self::HandshakeResponse,
            3 => Self::HandshakeComplete,
            10 => Self::FileMeta,
            11 => Self::FileMetaAck,
            20 => Self::SignatureRequest,
            21 => Self::SignatureResponse,
            30 => Self::DeltaResponse,
            40 => Self::BlockData,
            41 => Self::BlockAck,
            50 => Self::TransferComplete,
            51 => Self::TransferAck,
            52 => Self::IntegrityFail,
            53 => Self::TransferAbort,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        })
    }

    /// Returns the wire code for this message type.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Handshake-stage messages bypass sequence validation.
    #[must_use]
    pub const fn is_handshake(self) -> bool {
        matches!(
            self,
            Self::HandshakeInit | Self::HandshakeResponse | Self::HandshakeComplete
        )
    }
}

/// Fixed header opening every binary frame.
///
/// Layout (big-endian): `u32 magic · u16 type · u16 flags · u32
/// payload_len · u32 sequence · u64 timestamp_ms`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    /// Message type of the payload that follows.
    pub message_type: MessageType,
    /// Reserved flag bits.
    pub flags: u16,
    /// Length of the payload in bytes.
    pub payload_len: u32,
    /// Per-peer monotonic sequence number; zero during handshake.
    pub sequence: u32,
    /// Sender clock, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl FrameHeader {
    /// Creates a header stamped with the current wall clock.
    #[must_use]
    pub fn new(message_type: MessageType, payload_len: u32, sequence: u32) -> Self {
        Self {
            message_type,
            flags: 0,
            payload_len,
            sequence,
            timestamp_ms: now_ms(),
        }
    }

    /// Serializes the header into its 24-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        out[0..4].copy_from_slice(&PROTOCOL_MAGIC.to_be_bytes());
        out[4..6].copy_from_slice(&self.message_type.code().to_be_bytes());
        out[6..8].copy_from_slice(&self.flags.to_be_bytes());
        out[8..12].copy_from_slice(&self.payload_len.to_be_bytes());
        out[12..16].copy_from_slice(&self.sequence.to_be_bytes());
        out[16..24].copy_from_slice(&self.timestamp_ms.to_be_bytes());
        out
    }

    /// Decodes a header and returns it with the payload that follows.
    pub fn decode(frame: &[u8]) -> ProtocolResult<(Self, &[u8])> {
        let mut cursor = Cursor::new(frame);
        let magic = cursor.u32("frame header")?;
        if magic != PROTOCOL_MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }
        let message_type = MessageType::from_code(cursor.u16("frame header")?)?;
        let flags = cursor.u16("frame header")?;
        let payload_len = cursor.u32("frame header")?;
        let sequence = cursor.u32("frame header")?;
        let timestamp_ms = cursor.u64("frame header")?;

        let payload = cursor.rest();
        if payload.len() != payload_len as usize {
            return Err(ProtocolError::LengthMismatch {
                context: "frame payload",
                declared: payload_len as usize,
                found: payload.len(),
            });
        }

        Ok((
            Self {
                message_type,
                flags,
                payload_len,
                sequence,
                timestamp_ms,
            },
            payload,
        ))
    }
}

/// Assembles a complete frame from a header template and payload.
#[must_use]
pub fn build_frame(message_type: MessageType, sequence: u32, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader::new(message_type, payload.len() as u32, sequence);
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(payload);
    frame
}

/// Returns `true` if `data` opens with the binary-protocol magic.
#[must_use]
pub fn has_magic(data: &[u8]) -> bool {
    data.len() >= 4 && data[0..4] == PROTOCOL_MAGIC.to_be_bytes()
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}
