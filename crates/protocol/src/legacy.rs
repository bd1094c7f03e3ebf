//! Legacy pipe-delimited text protocol.
//!
//! Predates the binary framing and survives as a compatibility shim. A
//! message is an ASCII prefix up to the first `|`, text fields separated
//! by further pipes, and (for delta and file payloads) a trailing binary
//! blob. Receivers route here only when the first four bytes are not the
//! binary magic.

use crate::{ProtocolError, ProtocolResult};

/// Parsed legacy message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LegacyMessage {
    /// `UPDATE_AVAILABLE|path|hash|size`: a peer announces a change.
    UpdateAvailable {
        /// Announced path, relative to the peer's watch root.
        relative_path: String,
        /// Hex content hash, possibly empty on old senders.
        hash: String,
        /// Announced size; zero when the sender omitted it.
        size: u64,
    },
    /// `REQUEST_DELTA|path|<signature blob>`: peer requests a delta
    /// against the attached signature set.
    RequestDelta {
        /// Path to compute the delta for.
        relative_path: String,
        /// Encoded signature set.
        signatures: Vec<u8>,
    },
    /// `DELTA_DATA|path|<delta blob>`: serialized delta stream.
    DeltaData {
        /// Path the delta applies to.
        relative_path: String,
        /// Encoded delta stream.
        delta: Vec<u8>,
    },
    /// `REQUEST_FILE|path`: peer wants the whole file.
    RequestFile {
        /// Requested path.
        relative_path: String,
    },
    /// `FILE_DATA|path|<bytes>`: whole-file contents.
    FileData {
        /// Path the contents belong to.
        relative_path: String,
        /// Raw file bytes.
        contents: Vec<u8>,
    },
    /// `DELETE_FILE|path`: peer deleted the file.
    DeleteFile {
        /// Deleted path.
        relative_path: String,
    },
}

impl LegacyMessage {
    /// Serializes the message into its wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::UpdateAvailable {
                relative_path,
                hash,
                size,
            } => format!("UPDATE_AVAILABLE|{relative_path}|{hash}|{size}").into_bytes(),
            Self::RequestDelta {
                relative_path,
                signatures,
            } => {
                let mut out = format!("REQUEST_DELTA|{relative_path}|").into_bytes();
                out.extend_from_slice(signatures);
                out
            }
            Self::DeltaData {
                relative_path,
                delta,
            } => {
                let mut out = format!("DELTA_DATA|{relative_path}|").into_bytes();
                out.extend_from_slice(delta);
                out
            }
            Self::RequestFile { relative_path } => {
                format!("REQUEST_FILE|{relative_path}").into_bytes()
            }
            Self::FileData {
                relative_path,
                contents,
            } => {
                let mut out = format!("FILE_DATA|{relative_path}|").into_bytes();
                out.extend_from_slice(contents);
                out
            }
            Self::DeleteFile { relative_path } => {
                format!("DELETE_FILE|{relative_path}").into_bytes()
            }
        }
    }

    /// Parses a legacy message from raw bytes.
    pub fn decode(raw: &[u8]) -> ProtocolResult<Self> {
        let prefix_end = raw
            .iter()
            .position(|&b| b == b'|')
            .ok_or(ProtocolError::MalformedLegacy("missing prefix delimiter"))?;
        let prefix = std::str::from_utf8(&raw[..prefix_end])
            .map_err(|_| ProtocolError::InvalidUtf8("legacy prefix"))?;
        let body = &raw[prefix_end + 1..];

        match prefix {
            "UPDATE_AVAILABLE" => {
                let text = std::str::from_utf8(body)
                    .map_err(|_| ProtocolError::InvalidUtf8("update body"))?;
                let mut fields = text.splitn(3, '|');
                let relative_path = fields
                    .next()
                    .filter(|path| !path.is_empty())
                    .ok_or(ProtocolError::MalformedLegacy("update without path"))?
                    .to_owned();
                let hash = fields.next().unwrap_or_default().to_owned();
                let size = fields
                    .next()
                    .and_then(|raw| raw.trim().parse().ok())
                    .unwrap_or(0);
                Ok(Self::UpdateAvailable {
                    relative_path,
                    hash,
                    size,
                })
            }
            "REQUEST_DELTA" => {
                let (relative_path, blob) = split_path_and_blob(body, "request delta")?;
                Ok(Self::RequestDelta {
                    relative_path,
                    signatures: blob,
                })
            }
            "DELTA_DATA" => {
                let (relative_path, blob) = split_path_and_blob(body, "delta data")?;
                Ok(Self::DeltaData {
                    relative_path,
                    delta: blob,
                })
            }
            "REQUEST_FILE" => Ok(Self::RequestFile {
                relative_path: utf8_path(body)?,
            }),
            "FILE_DATA" => {
                let (relative_path, blob) = split_path_and_blob(body, "file data")?;
                Ok(Self::FileData {
                    relative_path,
                    contents: blob,
                })
            }
            "DELETE_FILE" => Ok(Self::DeleteFile {
                relative_path: utf8_path(body)?,
            }),
            _ => Err(ProtocolError::MalformedLegacy("unknown prefix")),
        }
    }
}

fn split_path_and_blob(body: &[u8], context: &'static str) -> ProtocolResult<(String, Vec<u8>)> {
    let pipe = body
        .iter()
        .position(|&b| b == b'|')
        .ok_or(ProtocolError::MalformedLegacy(context))?;
    let path = utf8_path(&body[..pipe])?;
    Ok((path, body[pipe + 1..].to_vec()))
}

fn utf8_path(raw: &[u8]) -> ProtocolResult<String> {
    let path = std::str::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8("legacy path"))?;
    if path.is_empty() {
        return Err(ProtocolError::MalformedLegacy("empty path"));
    }
    Ok(path.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_available_round_trips() {
        let msg = LegacyMessage::UpdateAvailable {
            relative_path: "notes/todo.txt".to_owned(),
            hash: "abcd1234".to_owned(),
            size: 512,
        };
        assert_eq!(LegacyMessage::decode(&msg.encode()).expect("decode"), msg);
    }

    #[test]
    fn request_delta_preserves_binary_blob() {
        let msg = LegacyMessage::RequestDelta {
            relative_path: "a.bin".to_owned(),
            signatures: vec![0, 1, 2, 0xff, b'|', 7],
        };
        assert_eq!(LegacyMessage::decode(&msg.encode()).expect("decode"), msg);
    }

    #[test]
    fn delta_data_preserves_binary_blob() {
        let msg = LegacyMessage::DeltaData {
            relative_path: "a.bin".to_owned(),
            delta: vec![9, 8, 7],
        };
        assert_eq!(LegacyMessage::decode(&msg.encode()).expect("decode"), msg);
    }

    #[test]
    fn simple_messages_round_trip() {
        for msg in [
            LegacyMessage::RequestFile {
                relative_path: "f".to_owned(),
            },
            LegacyMessage::DeleteFile {
                relative_path: "gone.txt".to_owned(),
            },
        ] {
            assert_eq!(LegacyMessage::decode(&msg.encode()).expect("decode"), msg);
        }
    }

    #[test]
    fn file_data_round_trips() {
        let msg = LegacyMessage::FileData {
            relative_path: "blob".to_owned(),
            contents: vec![0u8; 100],
        };
        assert_eq!(LegacyMessage::decode(&msg.encode()).expect("decode"), msg);
    }

    #[test]
    fn update_without_size_defaults_to_zero() {
        let decoded = LegacyMessage::decode(b"UPDATE_AVAILABLE|just/path").expect("decode");
        assert_eq!(
            decoded,
            LegacyMessage::UpdateAvailable {
                relative_path: "just/path".to_owned(),
                hash: String::new(),
                size: 0,
            }
        );
    }

    #[test]
    fn unknown_prefix_is_rejected() {
        assert!(matches!(
            LegacyMessage::decode(b"NOT_A_THING|x"),
            Err(ProtocolError::MalformedLegacy(_))
        ));
    }

    #[test]
    fn missing_delimiter_is_rejected() {
        assert!(LegacyMessage::decode(b"UPDATE_AVAILABLE").is_err());
    }
}
