//! UDP presence-broadcast datagram format.
//!
//! `SENTINEL_DISCOVERY|<peer_id>|<tcp_port>|<sender_ip>`, broadcast on
//! the discovery port so peers on the local network can find each other.
//! The socket itself lives in the transport layer; only the datagram
//! format is defined here.

use crate::{ProtocolError, ProtocolResult};

const DISCOVERY_PREFIX: &str = "SENTINEL_DISCOVERY";

/// Parsed presence announcement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiscoveryAnnouncement {
    /// Announcing peer's id.
    pub peer_id: String,
    /// TCP port the peer accepts transfers on.
    pub tcp_port: u16,
    /// IP address as seen by the sender.
    pub sender_ip: String,
}

impl DiscoveryAnnouncement {
    /// Renders the datagram text.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{DISCOVERY_PREFIX}|{}|{}|{}",
            self.peer_id, self.tcp_port, self.sender_ip
        )
    }

    /// Parses a datagram.
    pub fn decode(datagram: &str) -> ProtocolResult<Self> {
        let mut fields = datagram.split('|');
        if fields.next() != Some(DISCOVERY_PREFIX) {
            return Err(ProtocolError::MalformedLegacy("not a discovery datagram"));
        }
        let peer_id = fields
            .next()
            .filter(|id| !id.is_empty())
            .ok_or(ProtocolError::MalformedLegacy("discovery without peer id"))?
            .to_owned();
        let tcp_port = fields
            .next()
            .and_then(|raw| raw.parse().ok())
            .ok_or(ProtocolError::MalformedLegacy("discovery without port"))?;
        let sender_ip = fields.next().unwrap_or_default().to_owned();
        Ok(Self {
            peer_id,
            tcp_port,
            sender_ip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announcement_round_trips() {
        let announcement = DiscoveryAnnouncement {
            peer_id: "peer-1".to_owned(),
            tcp_port: 8080,
            sender_ip: "192.168.1.20".to_owned(),
        };
        assert_eq!(
            DiscoveryAnnouncement::decode(&announcement.encode()).expect("decode"),
            announcement
        );
    }

    #[test]
    fn wrong_prefix_is_rejected() {
        assert!(DiscoveryAnnouncement::decode("HELLO|a|1|b").is_err());
    }

    #[test]
    fn bad_port_is_rejected() {
        assert!(DiscoveryAnnouncement::decode("SENTINEL_DISCOVERY|p|notaport|ip").is_err());
    }
}
