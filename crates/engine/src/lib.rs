//! The delta engine: rsync-style signature, delta, and patch.
//!
//! A file is split into fixed-size blocks and summarized as
//! [`BlockSignature`] records (weak Adler-32 plus strong SHA-256 per
//! block). Given the signatures of an old copy, [`delta`] scans a new copy
//! with a one-byte-granular sliding window and emits a compact script of
//! [`DeltaInstruction`]s; [`apply`] replays that script against the old
//! copy to reconstruct the new contents.
//!
//! Block size is not fixed: [`block_size::adaptive_block_size`] picks it
//! per file from size, a content probe, and link latency, so every delta
//! carries the block size it was computed with.

#![deny(unsafe_code)]

pub mod apply;
pub mod block_size;
mod delta;
mod signature;

use std::io;

use thiserror::Error;

pub use apply::apply;
pub use delta::{delta, delta_with_block_size, Delta};
pub use signature::{signature, signature_with_block_size, BlockSignature};

/// Result type for delta-engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors produced while computing signatures, deltas, or patches.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Reading or seeking a source file failed.
    #[error("I/O error: {0}")]
    Io(
        #[from]
        #[source]
        io::Error,
    ),
}

/// A single reconstruction step in a delta stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeltaInstruction {
    /// Copy one block of the old file, addressed by block index.
    Copy {
        /// Index of the source block in the old file.
        block_index: u32,
    },
    /// Insert bytes that have no match in the old file.
    Literal {
        /// Raw bytes to append to the output.
        bytes: Vec<u8>,
    },
}

impl DeltaInstruction {
    /// Returns `true` for [`DeltaInstruction::Literal`].
    #[must_use]
    pub const fn is_literal(&self) -> bool {
        matches!(self, Self::Literal { .. })
    }
}
