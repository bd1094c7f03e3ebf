use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};

use checksums::strong::{self, StrongDigest};
use workers::ThreadPool;

use crate::block_size::adaptive_block_size;
use crate::EngineResult;

/// Number of blocks hashed per worker-pool task.
///
/// Batching amortizes the enqueue cost; reading stays on the caller's
/// thread so disk access remains sequential.
const SIGNATURE_BATCH: usize = 16;

/// Weak and strong checksums of one file block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockSignature {
    /// Zero-based block index within the file.
    pub index: u32,
    /// Adler-32 over the block contents.
    pub adler32: u32,
    /// SHA-256 over the block contents.
    pub strong: StrongDigest,
}

/// Computes block signatures for `path` using an adaptive block size.
///
/// `latency_ms` feeds the sizing heuristic; pass a negative value when
/// the link latency is unknown. Returns the chosen block size together
/// with the signatures, ordered by block index. The final block may be
/// short; its checksums cover its actual length.
pub fn signature(path: &Path, latency_ms: i64) -> EngineResult<(usize, Vec<BlockSignature>)> {
    let file_size = std::fs::metadata(path)?.len();
    let block_size = adaptive_block_size(path, file_size, latency_ms);
    let blocks = signature_with_block_size(path, block_size)?;
    Ok((block_size, blocks))
}

/// Computes block signatures for `path` with an explicit block size.
///
/// Blocks are hashed in batches on the global worker pool and merged in
/// index order.
pub fn signature_with_block_size(
    path: &Path,
    block_size: usize,
) -> EngineResult<Vec<BlockSignature>> {
    let mut file = File::open(path)?;
    let pool = ThreadPool::global();

    let collected: Arc<Mutex<Vec<BlockSignature>>> = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    let mut batch: Vec<(u32, Vec<u8>)> = Vec::with_capacity(SIGNATURE_BATCH);
    let mut index: u32 = 0;

    let mut buffer = vec![0u8; block_size];
    loop {
        let read = read_block(&mut file, &mut buffer)?;
        if read == 0 {
            break;
        }
        batch.push((index, buffer[..read].to_vec()));
        index += 1;

        if batch.len() >= SIGNATURE_BATCH {
            handles.push(submit_batch(pool, std::mem::take(&mut batch), &collected));
        }
        if read < block_size {
            break;
        }
    }
    if !batch.is_empty() {
        handles.push(submit_batch(pool, batch, &collected));
    }

    for handle in handles {
        handle.wait();
    }

    let mut blocks = Arc::try_unwrap(collected)
        .map_or_else(
            |shared| shared.lock().expect("signature sink poisoned").clone(),
            |owned| owned.into_inner().expect("signature sink poisoned"),
        );
    blocks.sort_unstable_by_key(|sig| sig.index);

    tracing::debug!(
        path = %path.display(),
        blocks = blocks.len(),
        block_size,
        "computed file signature"
    );
    Ok(blocks)
}

fn submit_batch(
    pool: &ThreadPool,
    batch: Vec<(u32, Vec<u8>)>,
    sink: &Arc<Mutex<Vec<BlockSignature>>>,
) -> workers::TaskHandle {
    let sink = Arc::clone(sink);
    pool.spawn(move || {
        let mut signatures = Vec::with_capacity(batch.len());
        for (index, block) in &batch {
            signatures.push(BlockSignature {
                index: *index,
                adler32: checksums::adler32(block),
                strong: strong::digest(block),
            });
        }
        sink.lock().expect("signature sink poisoned").extend(signatures);
    })
}

/// Reads until `buffer` is full or EOF; returns the number of bytes read.
fn read_block(file: &mut File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match file.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn fixture(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        file.write_all(contents).expect("write fixture");
        file
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let missing = PathBuf::from("/nonexistent/sentinel/fixture");
        assert!(signature_with_block_size(&missing, 4096).is_err());
    }

    #[test]
    fn empty_file_has_no_blocks() {
        let file = fixture(b"");
        let blocks = signature_with_block_size(file.path(), 4096).expect("signature");
        assert!(blocks.is_empty());
    }

    #[test]
    fn short_final_block_is_kept() {
        let file = fixture(&[7u8; 4096 + 100]);
        let blocks = signature_with_block_size(file.path(), 4096).expect("signature");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].index, 1);
        assert_eq!(blocks[1].strong, strong::digest(&[7u8; 100]));
    }

    #[test]
    fn indices_are_dense_and_ordered() {
        // 70 blocks exercises several pool batches.
        let file = fixture(&vec![3u8; 70 * 1024]);
        let blocks = signature_with_block_size(file.path(), 1024).expect("signature");
        assert_eq!(blocks.len(), 70);
        for (expected, sig) in blocks.iter().enumerate() {
            assert_eq!(sig.index as usize, expected);
        }
    }

    #[test]
    fn signature_depends_only_on_content_and_block_size() {
        let contents = b"identical bytes in two different files";
        let first = fixture(contents);
        let second = fixture(contents);
        let a = signature_with_block_size(first.path(), 4096).expect("signature");
        let b = signature_with_block_size(second.path(), 4096).expect("signature");
        assert_eq!(a, b);
    }
}
