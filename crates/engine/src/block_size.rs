//! Adaptive block sizing.
//!
//! The block size trades delta granularity against signature volume and
//! round trips. Small files get small blocks; high-entropy files (already
//! compressed) get larger blocks because sub-block matches are unlikely;
//! highly repetitive files get smaller blocks; slow links get larger
//! blocks to cut round trips.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use rustc_hash::FxHashMap;

/// Smallest block size the engine will pick.
pub const MIN_BLOCK_SIZE: usize = 4 * 1024;

/// Largest block size the engine will pick.
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024;

/// Bytes sampled from the head of a file for the content probe.
const PROBE_LEN: usize = 64 * 1024;

/// Length of the repetition-probe pattern window.
const PATTERN_LEN: usize = 16;

/// Repetition ratio above which a low-entropy file counts as repetitive.
const REPEAT_RATIO_THRESHOLD: f64 = 0.8;

/// Content characteristics sampled from a file prefix.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FileTraits {
    /// Shannon entropy of the sampled bytes, in bits per byte.
    pub entropy: f64,
    /// Fraction of sampled bytes that are printable ASCII or whitespace.
    pub printable_ratio: f64,
    /// Fraction of 16-byte windows that occur more than once in the sample.
    pub repeat_ratio: f64,
}

impl FileTraits {
    /// Heuristic: the sample looks like text.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.printable_ratio > 0.9
    }

    /// Heuristic: the sample looks compressed or encrypted.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.entropy > 7.5
    }
}

/// Samples up to 64 KiB from the head of `path` and derives [`FileTraits`].
///
/// Returns default (all-zero) traits if the file cannot be read; sizing
/// then falls back to the file-size base alone.
#[must_use]
pub fn analyze(path: &Path) -> FileTraits {
    let mut buffer = vec![0u8; PROBE_LEN];
    let read = match File::open(path).and_then(|mut f| f.read(&mut buffer)) {
        Ok(read) => read,
        Err(err) => {
            tracing::debug!(path = %path.display(), %err, "content probe failed");
            return FileTraits::default();
        }
    };
    buffer.truncate(read);
    analyze_bytes(&buffer)
}

fn analyze_bytes(sample: &[u8]) -> FileTraits {
    if sample.is_empty() {
        return FileTraits::default();
    }

    let mut freq = [0usize; 256];
    let mut printable = 0usize;
    for &byte in sample {
        freq[usize::from(byte)] += 1;
        if (32..=126).contains(&byte) || byte == b'\t' || byte == b'\n' || byte == b'\r' {
            printable += 1;
        }
    }

    let total = sample.len() as f64;
    let mut entropy = 0.0;
    for count in freq {
        if count > 0 {
            let p = count as f64 / total;
            entropy -= p * p.log2();
        }
    }

    let mut patterns: FxHashMap<&[u8], usize> = FxHashMap::default();
    for window in sample.windows(PATTERN_LEN) {
        *patterns.entry(window).or_insert(0) += 1;
    }

    let mut total_windows = 0usize;
    let mut repeating = 0usize;
    for &count in patterns.values() {
        total_windows += count;
        if count > 1 {
            repeating += count;
        }
    }
    let repeat_ratio = if total_windows > 0 {
        repeating as f64 / total_windows as f64
    } else {
        0.0
    };

    FileTraits {
        entropy,
        printable_ratio: printable as f64 / total,
        repeat_ratio,
    }
}

/// Picks a block size for `path`.
///
/// Base size by file size (<1 MiB ⇒ 32 KiB, <100 MiB ⇒ 128 KiB, else
/// 256 KiB), scaled by the content probe and `latency_ms`, clamped to
/// `[4 KiB, 1 MiB]` and rounded up to a 4 KiB boundary. A negative
/// latency means unknown and applies no latency factor.
#[must_use]
pub fn adaptive_block_size(path: &Path, file_size: u64, latency_ms: i64) -> usize {
    let mut size = if file_size < 1024 * 1024 {
        32 * 1024
    } else if file_size < 100 * 1024 * 1024 {
        128 * 1024
    } else {
        256 * 1024
    };

    let traits = analyze(path);
    if traits.entropy > 7.5 {
        size *= 2;
    } else if traits.entropy < 4.0 && traits.repeat_ratio > REPEAT_RATIO_THRESHOLD {
        size /= 2;
    }

    if latency_ms > 200 {
        size = (size as f64 * 1.5) as usize;
    } else if (0..20).contains(&latency_ms) {
        size = (size as f64 * 0.75) as usize;
    }

    let size = size.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE);
    let aligned = (size + 4095) & !4095;

    tracing::debug!(
        path = %path.display(),
        block_size = aligned,
        entropy = traits.entropy,
        "adaptive block size"
    );
    aligned
}
