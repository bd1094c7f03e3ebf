//! Strong-digest helpers built on SHA-256.
//!
//! Block signatures pair the weak rolling checksum with one of these
//! digests; the weak sum finds candidates, the strong digest confirms them.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Length in bytes of a strong digest.
pub const DIGEST_LEN: usize = 32;

/// A SHA-256 digest.
pub type StrongDigest = [u8; DIGEST_LEN];

/// Digests a byte slice.
#[must_use]
pub fn digest(data: &[u8]) -> StrongDigest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Digests a file by streaming its contents.
pub fn digest_file(path: &Path) -> io::Result<StrongDigest> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(hasher.finalize().into())
}

/// Renders a digest as lowercase hex.
#[must_use]
pub fn to_hex(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Digests a byte slice and renders it as lowercase hex.
#[must_use]
pub fn digest_hex(data: &[u8]) -> String {
    to_hex(&digest(data))
}
