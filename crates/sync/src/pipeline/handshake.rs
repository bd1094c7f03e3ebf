//! Stage 2: handshake.
//!
//! ```text
//! initiator                         responder
//!   HANDSHAKE_INIT (caps, limits) ---->
//!        <---- HANDSHAKE_RESPONSE (negotiated, challenge)
//!   HANDSHAKE_COMPLETE (proof)    ---->
//! ```
//!
//! The proof is `HMAC-SHA256` keyed by the challenge over
//! `session_key || peer_id`. A session that never proves the challenge
//! stays unauthenticated and all its non-handshake frames are dropped.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use protocol::handshake::{HandshakeComplete, HandshakeInit, HandshakeResponse, CHALLENGE_LEN};
use protocol::MessageType;

use super::{PeerSession, PipelineEvent, SyncPipeline};
use crate::SyncResult;

type HmacSha256 = Hmac<Sha256>;

pub(crate) fn challenge_proof(
    challenge: &[u8; CHALLENGE_LEN],
    session_key: &[u8],
    peer_id: &str,
) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(challenge).expect("hmac accepts any key length");
    mac.update(session_key);
    mac.update(peer_id.as_bytes());
    mac.finalize().into_bytes().into()
}

impl SyncPipeline {
    /// Opens a handshake with a peer.
    pub fn initiate_handshake(&self, peer_id: &str) -> SyncResult<()> {
        let config = self.config();
        let init = HandshakeInit {
            peer_id: config.local_peer_id.clone(),
            capabilities: config.capabilities,
            max_block_size: config.max_block_size,
            max_chunk_size: config.max_chunk_size,
            session_code_hash: checksums::strong::digest(&config.session_key),
        };

        self.insert_session(peer_id, PeerSession::new());
        tracing::info!(peer = peer_id, caps = %config.capabilities, "initiating handshake");
        self.send(peer_id, MessageType::HandshakeInit, &init.encode())
    }

    pub(crate) fn handle_handshake_init(&self, peer_id: &str, payload: &[u8]) -> SyncResult<()> {
        let init = HandshakeInit::decode(payload)?;
        let config = self.config();

        let negotiated = config.capabilities.intersect(init.capabilities);
        let agreed_block_size = config.max_block_size.min(init.max_block_size);
        let agreed_chunk_size = config.max_chunk_size.min(init.max_chunk_size);

        let mut challenge = [0u8; CHALLENGE_LEN];
        rand::thread_rng().fill_bytes(&mut challenge);

        let mut session = PeerSession::new();
        session.negotiated = negotiated;
        session.agreed_block_size = agreed_block_size;
        session.agreed_chunk_size = agreed_chunk_size;
        session.issued_challenge = Some(challenge);
        self.insert_session(peer_id, session);

        let response = HandshakeResponse {
            peer_id: config.local_peer_id.clone(),
            capabilities: negotiated,
            agreed_block_size,
            agreed_chunk_size,
            challenge,
        };

        tracing::info!(
            peer = peer_id,
            negotiated = %negotiated,
            agreed_block_size,
            agreed_chunk_size,
            "handshake init accepted"
        );
        self.send(peer_id, MessageType::HandshakeResponse, &response.encode())
    }

    pub(crate) fn handle_handshake_response(
        &self,
        peer_id: &str,
        payload: &[u8],
    ) -> SyncResult<()> {
        let response = HandshakeResponse::decode(payload)?;

        let known = self
            .with_session(peer_id, |session| {
                session.negotiated = response.capabilities;
                session.agreed_block_size = response.agreed_block_size;
                session.agreed_chunk_size = response.agreed_chunk_size;
            })
            .is_some();
        if !known {
            tracing::warn!(peer = peer_id, "handshake response without pending session");
            return Ok(());
        }

        let config = self.config();
        let proof = challenge_proof(
            &response.challenge,
            &config.session_key,
            &config.local_peer_id,
        );
        let complete = HandshakeComplete {
            challenge_proof: proof,
        };
        self.send(peer_id, MessageType::HandshakeComplete, &complete.encode())?;

        // The initiator considers the session live once the proof is out.
        self.with_session(peer_id, |session| {
            session.authenticated = true;
            session.next_sequence = 1;
        });
        let negotiated = response.capabilities;
        tracing::info!(peer = peer_id, negotiated = %negotiated, "handshake complete (initiator)");
        self.emit(PipelineEvent::PeerAuthenticated {
            peer_id: peer_id.to_owned(),
            capabilities: negotiated,
        });
        Ok(())
    }

    pub(crate) fn handle_handshake_complete(
        &self,
        peer_id: &str,
        payload: &[u8],
    ) -> SyncResult<()> {
        let complete = HandshakeComplete::decode(payload)?;

        let verdict = self.with_session(peer_id, |session| {
            let Some(challenge) = session.issued_challenge.take() else {
                return Verdict::NoChallenge;
            };
            let expected =
                challenge_proof(&challenge, &self.config().session_key, peer_id);
            if expected == complete.challenge_proof {
                session.authenticated = true;
                session.next_sequence = 1;
                Verdict::Authenticated(session.negotiated)
            } else {
                session.authenticated = false;
                Verdict::BadProof
            }
        });

        match verdict {
            Some(Verdict::Authenticated(negotiated)) => {
                tracing::info!(
                    peer = peer_id,
                    negotiated = %negotiated,
                    "handshake complete (responder)"
                );
                self.emit(PipelineEvent::PeerAuthenticated {
                    peer_id: peer_id.to_owned(),
                    capabilities: negotiated,
                });
            }
            Some(Verdict::BadProof) => {
                tracing::error!(peer = peer_id, "handshake proof mismatch, session stays dead");
            }
            Some(Verdict::NoChallenge) => {
                tracing::warn!(peer = peer_id, "handshake complete without issued challenge");
            }
            None => {
                tracing::warn!(peer = peer_id, "handshake complete without pending session");
            }
        }
        Ok(())
    }
}

enum Verdict {
    Authenticated(protocol::Capabilities),
    BadProof,
    NoChallenge,
}
