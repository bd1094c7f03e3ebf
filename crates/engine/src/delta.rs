use std::fs::File;
use std::io::Read;
use std::path::Path;

use checksums::{strong, RollingAdler32};
use rustc_hash::FxHashMap;

use crate::block_size::adaptive_block_size;
use crate::signature::BlockSignature;
use crate::{DeltaInstruction, EngineResult};

/// A delta stream together with the block size it was computed against.
///
/// Copy instructions address blocks of `block_size` bytes in the old file;
/// a stream is meaningless under any other block size, so the two travel
/// together all the way to the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Delta {
    /// Block size the copy indices refer to.
    pub block_size: u32,
    /// Ordered reconstruction script.
    pub instructions: Vec<DeltaInstruction>,
}

impl Delta {
    /// Total literal bytes carried by the stream.
    #[must_use]
    pub fn literal_bytes(&self) -> u64 {
        self.instructions
            .iter()
            .map(|inst| match inst {
                DeltaInstruction::Literal { bytes } => bytes.len() as u64,
                DeltaInstruction::Copy { .. } => 0,
            })
            .sum()
    }

    /// Number of copy instructions in the stream.
    #[must_use]
    pub fn copy_count(&self) -> usize {
        self.instructions
            .iter()
            .filter(|inst| !inst.is_literal())
            .count()
    }
}

/// Bounded read-ahead buffer over the new file.
///
/// Holds 4 × blocksize bytes; when the free tail shrinks below one block,
/// the valid region is compacted to the front before the next read. Peak
/// memory stays O(blocksize) regardless of file size.
struct SlidingBuffer {
    data: Vec<u8>,
    start: usize,
    len: usize,
    eof: bool,
    block_size: usize,
}

impl SlidingBuffer {
    fn new(block_size: usize) -> Self {
        Self {
            data: vec![0u8; block_size * 4],
            start: 0,
            len: 0,
            eof: false,
            block_size,
        }
    }

    /// Refills until at least one full block is buffered or EOF.
    fn fill(&mut self, file: &mut File) -> std::io::Result<()> {
        if self.start > 0 && self.start + self.len + self.block_size > self.data.len() {
            self.data.copy_within(self.start..self.start + self.len, 0);
            self.start = 0;
        }

        while !self.eof && self.start + self.len < self.data.len() {
            let free = self.start + self.len..self.data.len();
            match file.read(&mut self.data[free]) {
                Ok(0) => self.eof = true,
                Ok(read) => {
                    self.len += read;
                    if self.len >= self.block_size {
                        break;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn window(&self) -> &[u8] {
        let window = self.len.min(self.block_size);
        &self.data[self.start..self.start + window]
    }

    fn advance(&mut self, by: usize) {
        self.start += by;
        self.len -= by;
    }

    fn byte_at(&self, offset: usize) -> u8 {
        self.data[self.start + offset]
    }
}

/// Computes the delta between `new_path` and an old file described by
/// `old_signatures`.
///
/// The window slides one byte at a time over the new file. Whenever the
/// rolling Adler-32 hits the signature index and a candidate's strong
/// digest confirms the match, pending literals are flushed and a copy
/// instruction is emitted; the window then jumps a whole block. Duplicate
/// signature indices are tolerated; the first strong match wins. The
/// trailing partial window can never match a full block and drains into
/// the literal buffer.
pub fn delta(
    new_path: &Path,
    old_signatures: &[BlockSignature],
    latency_ms: i64,
) -> EngineResult<Delta> {
    let file_size = std::fs::metadata(new_path)?.len();
    let block_size = adaptive_block_size(new_path, file_size, latency_ms);
    delta_with_block_size(new_path, old_signatures, block_size)
}

/// [`delta`] with an explicit block size.
pub fn delta_with_block_size(
    new_path: &Path,
    old_signatures: &[BlockSignature],
    block_size: usize,
) -> EngineResult<Delta> {
    let mut file = File::open(new_path)?;

    let mut by_adler: FxHashMap<u32, Vec<&BlockSignature>> = FxHashMap::default();
    for sig in old_signatures {
        by_adler.entry(sig.adler32).or_default().push(sig);
    }

    let mut buffer = SlidingBuffer::new(block_size);
    let mut instructions = Vec::new();
    let mut literal: Vec<u8> = Vec::new();

    let mut hash = RollingAdler32::new();
    let mut seeded = false;
    let mut window_len = 0usize;

    loop {
        if buffer.len < block_size && !buffer.eof {
            buffer.fill(&mut file)?;
        }
        if buffer.len == 0 {
            break;
        }

        let window = buffer.window();
        if !seeded || window.len() != window_len {
            hash.init(window);
            seeded = true;
            window_len = window.len();
        }

        let matched = by_adler.get(&hash.value()).and_then(|candidates| {
            let window_digest = strong::digest(window);
            candidates
                .iter()
                .find(|sig| sig.strong == window_digest)
                .map(|sig| sig.index)
        });

        if let Some(block_index) = matched {
            if !literal.is_empty() {
                instructions.push(DeltaInstruction::Literal {
                    bytes: std::mem::take(&mut literal),
                });
            }
            instructions.push(DeltaInstruction::Copy { block_index });
            buffer.advance(window_len);
            seeded = false;
        } else {
            literal.push(buffer.byte_at(0));
            if buffer.len > window_len && seeded {
                // roll cannot fail: the window was seeded above
                let _ = hash.roll(buffer.byte_at(0), buffer.byte_at(window_len));
            } else {
                seeded = false;
            }
            buffer.advance(1);
        }
    }

    if !literal.is_empty() {
        instructions.push(DeltaInstruction::Literal { bytes: literal });
    }

    let delta = Delta {
        block_size: block_size as u32,
        instructions,
    };
    tracing::debug!(
        path = %new_path.display(),
        instructions = delta.instructions.len(),
        copies = delta.copy_count(),
        literal_bytes = delta.literal_bytes(),
        "computed delta"
    );
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::signature_with_block_size;
    use std::io::Write;

    fn fixture(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        file.write_all(contents).expect("write fixture");
        file
    }

    #[test]
    fn identical_partial_block_becomes_single_copy() {
        let contents = b"Hello, World!";
        let old = fixture(contents);
        let new = fixture(contents);

        let sigs = signature_with_block_size(old.path(), 4096).expect("signature");
        let delta = delta_with_block_size(new.path(), &sigs, 4096).expect("delta");

        assert_eq!(
            delta.instructions,
            vec![DeltaInstruction::Copy { block_index: 0 }]
        );
        assert_eq!(delta.literal_bytes(), 0);
    }

    #[test]
    fn middle_insertion_splits_into_copy_literal_copy() {
        let old_contents = vec![b'a'; 8192];
        let mut new_contents = old_contents[..4096].to_vec();
        new_contents.extend_from_slice(b"INSERTION");
        new_contents.extend_from_slice(&old_contents[4096..]);

        let old = fixture(&old_contents);
        let new = fixture(&new_contents);

        let sigs = signature_with_block_size(old.path(), 4096).expect("signature");
        let delta = delta_with_block_size(new.path(), &sigs, 4096).expect("delta");

        assert_eq!(
            delta.instructions,
            vec![
                DeltaInstruction::Copy { block_index: 0 },
                DeltaInstruction::Literal {
                    bytes: b"INSERTION".to_vec()
                },
                DeltaInstruction::Copy { block_index: 1 },
            ]
        );
    }

    #[test]
    fn empty_signature_set_yields_one_literal() {
        let new = fixture(b"Brand new file content");
        let delta = delta_with_block_size(new.path(), &[], 4096).expect("delta");

        assert_eq!(
            delta.instructions,
            vec![DeltaInstruction::Literal {
                bytes: b"Brand new file content".to_vec()
            }]
        );
    }

    #[test]
    fn duplicate_signature_indices_resolve_to_first_match() {
        let block = vec![b'z'; 4096];
        let old = fixture(&block);
        let new = fixture(&block);

        let mut sigs = signature_with_block_size(old.path(), 4096).expect("signature");
        let mut duplicate = sigs[0].clone();
        duplicate.index = 9;
        sigs.push(duplicate);

        let delta = delta_with_block_size(new.path(), &sigs, 4096).expect("delta");
        assert_eq!(
            delta.instructions,
            vec![DeltaInstruction::Copy { block_index: 0 }]
        );
    }

    #[test]
    fn empty_new_file_yields_empty_stream() {
        let old = fixture(&vec![b'q'; 4096]);
        let new = fixture(b"");

        let sigs = signature_with_block_size(old.path(), 4096).expect("signature");
        let delta = delta_with_block_size(new.path(), &sigs, 4096).expect("delta");
        assert!(delta.instructions.is_empty());
    }

    #[test]
    fn large_shift_still_finds_blocks() {
        // Prepend a prefix shorter than one block; every old block should
        // still be located at its shifted offset.
        let old_contents: Vec<u8> = (0..16384u32).map(|i| (i % 251) as u8).collect();
        let mut new_contents = b"prefix".to_vec();
        new_contents.extend_from_slice(&old_contents);

        let old = fixture(&old_contents);
        let new = fixture(&new_contents);

        let sigs = signature_with_block_size(old.path(), 4096).expect("signature");
        let delta = delta_with_block_size(new.path(), &sigs, 4096).expect("delta");

        assert_eq!(delta.copy_count(), 4);
        assert_eq!(delta.literal_bytes(), 6);
        assert_eq!(
            delta.instructions[0],
            DeltaInstruction::Literal {
                bytes: b"prefix".to_vec()
            }
        );
    }
}
