//! Handshake payloads and capability negotiation.
//!
//! The initiator opens with [`HandshakeInit`]; the responder intersects
//! capabilities, picks the minimum of each advertised limit, and answers
//! with [`HandshakeResponse`] carrying a random 32-byte challenge; the
//! initiator closes with [`HandshakeComplete`] carrying the challenge
//! proof. Sessions authenticate only after the proof verifies.

use crate::cursor::Cursor;
use crate::{ProtocolError, ProtocolResult};

/// Fixed length of the peer-id field on the wire.
pub const PEER_ID_LEN: usize = 32;

/// Length of the handshake challenge and its proof.
pub const CHALLENGE_LEN: usize = 32;

/// Open capability bitset exchanged during handshake.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Capabilities(u32);

impl Capabilities {
    /// Delta sync (signature exchange + delta streams).
    pub const DELTA_SYNC: Self = Self(1);
    /// Zstandard compression on bulk payloads.
    pub const COMPRESSION_ZSTD: Self = Self(1 << 1);
    /// AES-GCM transport encryption.
    pub const ENCRYPTION_AES_GCM: Self = Self(1 << 2);
    /// Streaming block transfer.
    pub const STREAMING: Self = Self(1 << 3);

    /// Empty capability set.
    #[must_use]
    pub const fn none() -> Self {
        Self(0)
    }

    /// Capability set from raw bits; unknown bits are preserved.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bit representation.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Set union.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Set intersection; this is the negotiation rule.
    #[must_use]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Returns `true` if every bit of `other` is present.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl std::fmt::Display for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::DELTA_SYNC) {
            names.push("DELTA");
        }
        if self.contains(Self::COMPRESSION_ZSTD) {
            names.push("ZSTD");
        }
        if self.contains(Self::ENCRYPTION_AES_GCM) {
            names.push("AES-GCM");
        }
        if self.contains(Self::STREAMING) {
            names.push("STREAM");
        }
        write!(f, "{}", names.join("+"))
    }
}

/// HANDSHAKE_INIT payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HandshakeInit {
    /// Initiator's peer id (UTF-8, at most 32 bytes on the wire).
    pub peer_id: String,
    /// Capabilities the initiator supports.
    pub capabilities: Capabilities,
    /// Largest block size the initiator accepts.
    pub max_block_size: u32,
    /// Largest chunk size the initiator accepts.
    pub max_chunk_size: u32,
    /// Digest of the shared session code.
    pub session_code_hash: [u8; 32],
}

impl HandshakeInit {
    /// Serializes the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PEER_ID_LEN + 12 + 32);
        out.extend_from_slice(&encode_peer_id(&self.peer_id));
        out.extend_from_slice(&self.capabilities.bits().to_be_bytes());
        out.extend_from_slice(&self.max_block_size.to_be_bytes());
        out.extend_from_slice(&self.max_chunk_size.to_be_bytes());
        out.extend_from_slice(&self.session_code_hash);
        out
    }

    /// Deserializes the payload.
    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut cursor = Cursor::new(payload);
        let peer_id = decode_peer_id(cursor.take(PEER_ID_LEN, "handshake init")?)?;
        let capabilities = Capabilities::from_bits(cursor.u32("handshake init")?);
        let max_block_size = cursor.u32("handshake init")?;
        let max_chunk_size = cursor.u32("handshake init")?;
        let mut session_code_hash = [0u8; 32];
        session_code_hash.copy_from_slice(cursor.take(32, "handshake init")?);
        Ok(Self {
            peer_id,
            capabilities,
            max_block_size,
            max_chunk_size,
            session_code_hash,
        })
    }
}

/// HANDSHAKE_RESPONSE payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HandshakeResponse {
    /// Responder's peer id.
    pub peer_id: String,
    /// Negotiated capability intersection.
    pub capabilities: Capabilities,
    /// Agreed block size: `min` of both advertised maxima.
    pub agreed_block_size: u32,
    /// Agreed chunk size: `min` of both advertised maxima.
    pub agreed_chunk_size: u32,
    /// Random challenge the initiator must prove.
    pub challenge: [u8; CHALLENGE_LEN],
}

impl HandshakeResponse {
    /// Serializes the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PEER_ID_LEN + 12 + CHALLENGE_LEN);
        out.extend_from_slice(&encode_peer_id(&self.peer_id));
        out.extend_from_slice(&self.capabilities.bits().to_be_bytes());
        out.extend_from_slice(&self.agreed_block_size.to_be_bytes());
        out.extend_from_slice(&self.agreed_chunk_size.to_be_bytes());
        out.extend_from_slice(&self.challenge);
        out
    }

    /// Deserializes the payload.
    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut cursor = Cursor::new(payload);
        let peer_id = decode_peer_id(cursor.take(PEER_ID_LEN, "handshake response")?)?;
        let capabilities = Capabilities::from_bits(cursor.u32("handshake response")?);
        let agreed_block_size = cursor.u32("handshake response")?;
        let agreed_chunk_size = cursor.u32("handshake response")?;
        let mut challenge = [0u8; CHALLENGE_LEN];
        challenge.copy_from_slice(cursor.take(CHALLENGE_LEN, "handshake response")?);
        Ok(Self {
            peer_id,
            capabilities,
            agreed_block_size,
            agreed_chunk_size,
            challenge,
        })
    }
}

/// HANDSHAKE_COMPLETE payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HandshakeComplete {
    /// `HMAC-SHA256(challenge, session_key || local_peer_id)`.
    pub challenge_proof: [u8; CHALLENGE_LEN],
}

impl HandshakeComplete {
    /// Serializes the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.challenge_proof.to_vec()
    }

    /// Deserializes the payload.
    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut cursor = Cursor::new(payload);
        let mut challenge_proof = [0u8; CHALLENGE_LEN];
        challenge_proof.copy_from_slice(cursor.take(CHALLENGE_LEN, "handshake complete")?);
        Ok(Self { challenge_proof })
    }
}

fn encode_peer_id(peer_id: &str) -> [u8; PEER_ID_LEN] {
    let mut out = [0u8; PEER_ID_LEN];
    let bytes = peer_id.as_bytes();
    let len = bytes.len().min(PEER_ID_LEN);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

fn decode_peer_id(raw: &[u8]) -> ProtocolResult<String> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end])
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidUtf8("peer id"))
}
