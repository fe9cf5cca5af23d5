use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Asks the server which parts of a file it already holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckExistingRequest {
    pub fingerprint: String,
    pub file_name: String,
}

/// Metadata sent alongside every chunk payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHeader {
    pub fingerprint: String,
    pub file_name: String,
    pub file_size: u64,
    pub index: u32,
    pub chunk_hash: String,
    /// Size of this chunk's payload in bytes.
    pub chunk_size: u64,
    pub total_chunks: u32,
}

/// Asks the server to assemble a file from its uploaded chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub fingerprint: String,
    pub file_name: String,
    /// Nominal chunk size the file was split with.
    pub chunk_size: u64,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Dedup check answer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckExistingResponse {
    /// `false` when the server already has the complete file.
    pub should_upload: bool,
    /// Chunk hashes the server already stores for this fingerprint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub existing_chunk_hashes: Vec<String>,
}

impl CheckExistingResponse {
    /// Response for a server that has nothing for this file yet.
    pub fn upload_all() -> Self {
        Self {
            should_upload: true,
            existing_chunk_hashes: Vec::new(),
        }
    }
}

/// Contains error details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}
