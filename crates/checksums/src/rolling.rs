use thiserror::Error;

use crate::ADLER_MOD;

/// Errors produced by rolling-checksum window updates.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RollingError {
    /// [`RollingAdler32::roll`] was called before the window was seeded.
    #[error("cannot roll an empty checksum window")]
    EmptyWindow,
}

/// Adler-32 checksum over a sliding window of bytes.
///
/// The checksum keeps two 16-bit sums modulo [`ADLER_MOD`]: `a`, seeded at 1
/// and accumulating raw bytes, and `b`, accumulating the running value of
/// `a`. The packed value is `(b << 16) | a`. Because both sums are linear in
/// the window contents, the window can advance by one byte with two
/// constant-time updates instead of a full recompute.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RollingAdler32 {
    a: u32,
    b: u32,
    window: usize,
}

impl RollingAdler32 {
    /// Creates a checksum with an empty window.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            a: 0,
            b: 0,
            window: 0,
        }
    }

    /// Seeds the checksum over `block`, replacing any previous state.
    pub fn init(&mut self, block: &[u8]) {
        let mut a: u32 = 1;
        let mut b: u32 = 0;
        for &byte in block {
            a = (a + u32::from(byte)) % ADLER_MOD;
            b = (b + a) % ADLER_MOD;
        }
        self.a = a;
        self.b = b;
        self.window = block.len();
    }

    /// Convenience constructor seeding the window from `block`.
    #[must_use]
    pub fn from_block(block: &[u8]) -> Self {
        let mut hash = Self::new();
        hash.init(block);
        hash
    }

    /// Returns the number of bytes in the current window.
    #[must_use]
    pub const fn window_len(&self) -> usize {
        self.window
    }

    /// Returns `true` if the window has not been seeded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.window == 0
    }

    /// Slides the window forward one byte, dropping `outgoing` from the
    /// front and appending `incoming` at the back.
    ///
    /// Both internal sums are kept non-negative by adding a multiple of the
    /// modulus before each subtraction.
    pub fn roll(&mut self, outgoing: u8, incoming: u8) -> Result<(), RollingError> {
        if self.window == 0 {
            return Err(RollingError::EmptyWindow);
        }

        let modulus = u64::from(ADLER_MOD);
        let out = u64::from(outgoing);
        let inn = u64::from(incoming);
        let window = self.window as u64 % modulus;

        let a = (u64::from(self.a) + modulus - out + inn) % modulus;
        let weighted_out = (window * out) % modulus;
        let b = (u64::from(self.b) + modulus - weighted_out + a + modulus - 1) % modulus;

        self.a = a as u32;
        self.b = b as u32;
        Ok(())
    }

    /// Returns the packed 32-bit checksum `(b << 16) | a`.
    #[must_use]
    pub const fn value(&self) -> u32 {
        (self.b << 16) | self.a
    }
}

/// One-shot Adler-32 over a complete block.
#[must_use]
pub fn adler32(block: &[u8]) -> u32 {
    RollingAdler32::from_block(block).value()
}
