//! File fingerprinting and chunk planning.
//!
//! Everything the uploader needs to know about a file before it touches the
//! network: a content fingerprint, the chunk partition, the per-chunk hash the
//! server uses for dedup, and ranged reads of chunk payloads.

mod chunked;
mod types;
mod validation;

pub use chunked::{
    checksum_bytes, chunk_count, chunk_hash, hash_file, name_suffix, plan_file, read_chunk,
    read_whole,
};
pub use types::{ChunkSpan, FilePlan};
pub use validation::validate_file_name;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(u64),

    #[error("file changed while reading: expected {expected} bytes at offset {offset}, got {actual}")]
    ShortRead {
        offset: u64,
        expected: u64,
        actual: u64,
    },
}
