use std::io::{Read, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::TransferError;
use crate::types::{ChunkSpan, FilePlan};

const BUF_SIZE: usize = 64 * 1024;

/// Hex chars of the name hash appended to the content hash.
const NAME_SUFFIX_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file by streaming it in 64 KiB blocks.
///
/// Returns the hex digest and the number of bytes hashed.
pub fn hash_file(path: &Path) -> Result<(String, u64), TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// Short suffix derived from a file name.
///
/// Keeps two files with identical bytes but different names apart on the
/// server's dedup check.
pub fn name_suffix(file_name: &str) -> String {
    let mut digest = checksum_bytes(file_name.as_bytes());
    digest.truncate(NAME_SUFFIX_LEN);
    digest
}

/// Deterministic chunk identifier, reproducible from `(fingerprint, index)`.
pub fn chunk_hash(fingerprint: &str, index: u32) -> String {
    format!("{fingerprint}-{index}")
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Number of chunks a file of `file_size` bytes splits into.
pub fn chunk_count(file_size: u64, chunk_size: u64) -> u32 {
    if file_size == 0 {
        return 1; // Empty files still have one (empty) chunk
    }
    file_size.div_ceil(chunk_size) as u32
}

fn spans(file_size: u64, chunk_size: u64) -> Vec<ChunkSpan> {
    (0..chunk_count(file_size, chunk_size))
        .map(|index| {
            let offset = u64::from(index) * chunk_size;
            ChunkSpan {
                index,
                offset,
                size: chunk_size.min(file_size - offset),
            }
        })
        .collect()
}

/// Fingerprints `path` and partitions it into `chunk_size` slices.
///
/// Blocking: streams the whole file through SHA-256. Callers on an async
/// runtime run it under `spawn_blocking`.
pub fn plan_file(path: &Path, chunk_size: u64) -> Result<FilePlan, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize(chunk_size));
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| TransferError::InvalidFileName(path.display().to_string()))?;

    let (content_hash, file_size) = hash_file(path)?;
    let fingerprint = format!("{content_hash}-{}", name_suffix(&file_name));

    Ok(FilePlan {
        path: path.to_path_buf(),
        file_name,
        file_size,
        content_hash,
        fingerprint,
        chunk_size,
        chunks: spans(file_size, chunk_size),
    })
}

// ---------------------------------------------------------------------------
// Payload reads
// ---------------------------------------------------------------------------

/// Reads `len` bytes at `offset` from `path`.
pub async fn read_chunk(path: &Path, offset: u64, len: u64) -> Result<Vec<u8>, TransferError> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;

    let mut buf = vec![0u8; len as usize];
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(TransferError::ShortRead {
                offset,
                expected: len,
                actual: filled as u64,
            });
        }
        filled += n;
    }
    Ok(buf)
}

/// Reads a whole file (small-file path).
pub async fn read_whole(path: &Path) -> Result<Vec<u8>, TransferError> {
    Ok(tokio::fs::read(path).await?)
}
