use std::path::PathBuf;

/// One slice of a planned file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    /// 0-based position within the file.
    pub index: u32,
    /// Byte offset within the file.
    pub offset: u64,
    /// Size of this chunk in bytes.
    pub size: u64,
}

/// Result of fingerprinting and partitioning a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePlan {
    pub path: PathBuf,
    pub file_name: String,
    pub file_size: u64,
    /// SHA-256 hex of the file content alone.
    pub content_hash: String,
    /// `content_hash` joined with the name-derived suffix.
    pub fingerprint: String,
    /// Nominal chunk size the file was split with.
    pub chunk_size: u64,
    pub chunks: Vec<ChunkSpan>,
}

impl FilePlan {
    /// Number of chunks in the plan.
    pub fn total_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// Deterministic hash of chunk `index`, see [`crate::chunk_hash`].
    pub fn chunk_hash(&self, index: u32) -> String {
        crate::chunk_hash(&self.fingerprint, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_chunk_hash_uses_fingerprint() {
        let plan = FilePlan {
            path: PathBuf::from("/tmp/a.bin"),
            file_name: "a.bin".into(),
            file_size: 10,
            content_hash: "c".into(),
            fingerprint: "c-1234abcd".into(),
            chunk_size: 4,
            chunks: vec![
                ChunkSpan { index: 0, offset: 0, size: 4 },
                ChunkSpan { index: 1, offset: 4, size: 4 },
                ChunkSpan { index: 2, offset: 8, size: 2 },
            ],
        };
        assert_eq!(plan.total_chunks(), 3);
        assert_eq!(plan.chunk_hash(2), "c-1234abcd-2");
    }
}
