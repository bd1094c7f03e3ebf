//! Delta application: rebuilds new file contents from an old copy plus a
//! delta stream.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::delta::Delta;
use crate::{DeltaInstruction, EngineResult};

/// Old files larger than this are patched with on-demand seeks instead of
/// being loaded whole.
const LARGE_FILE_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Reconstructs the new file contents from `old_path` and `delta`.
///
/// Copy instructions address `delta.block_size`-sized blocks in the old
/// file; the final block may be short, so each copy length is clamped to
/// the file size. Copy indices beyond the old file are logged and
/// skipped.
pub fn apply(old_path: &Path, delta: &Delta) -> EngineResult<Vec<u8>> {
    let mut old_file = File::open(old_path)?;
    let old_size = old_file.metadata()?.len();
    let block_size = u64::from(delta.block_size);

    let mut output = Vec::new();

    if old_size > LARGE_FILE_THRESHOLD {
        tracing::info!(
            path = %old_path.display(),
            size_mib = old_size / (1024 * 1024),
            "streaming delta apply for large file"
        );
        output.reserve(old_size as usize);
        let mut block = vec![0u8; delta.block_size as usize];

        for instruction in &delta.instructions {
            match instruction {
                DeltaInstruction::Literal { bytes } => output.extend_from_slice(bytes),
                DeltaInstruction::Copy { block_index } => {
                    let offset = u64::from(*block_index) * block_size;
                    if offset >= old_size {
                        tracing::error!(block_index, "copy index out of bounds, skipped");
                        continue;
                    }
                    let len = block_size.min(old_size - offset) as usize;
                    old_file.seek(SeekFrom::Start(offset))?;
                    old_file.read_exact(&mut block[..len])?;
                    output.extend_from_slice(&block[..len]);
                }
            }
        }
    } else {
        let mut old_data = Vec::with_capacity(old_size as usize);
        old_file.read_to_end(&mut old_data)?;

        for instruction in &delta.instructions {
            match instruction {
                DeltaInstruction::Literal { bytes } => output.extend_from_slice(bytes),
                DeltaInstruction::Copy { block_index } => {
                    let offset = u64::from(*block_index) * block_size;
                    if offset >= old_data.len() as u64 {
                        tracing::error!(block_index, "copy index out of bounds, skipped");
                        continue;
                    }
                    let offset = offset as usize;
                    let len = (block_size as usize).min(old_data.len() - offset);
                    output.extend_from_slice(&old_data[offset..offset + len]);
                }
            }
        }
    }

    Ok(output)
}
