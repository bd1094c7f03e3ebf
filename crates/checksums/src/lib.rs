//! Checksum primitives shared by the delta engine and the sync pipeline.
//!
//! Two families live here: the weak [`RollingAdler32`] used to slide a
//! block-match window one byte at a time in O(1), and the strong SHA-256
//! helpers in [`strong`] used to confirm candidate matches and to verify
//! whole-file integrity after a transfer.

#![deny(unsafe_code)]

mod rolling;
pub mod strong;

pub use rolling::{adler32, RollingAdler32, RollingError};

/// Modulus of the Adler-32 checksum, the largest prime below `2^16`.
pub const ADLER_MOD: u32 = 65521;
