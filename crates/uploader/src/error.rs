//! Uploader error types.

use chunklift_protocol::TransferState;

/// Errors reported by an [`UploadServer`](crate::UploadServer).
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("server rejected request: {0}")]
    Rejected(String),
}

/// Errors returned to callers of [`UploadEngine`](crate::UploadEngine).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("task {task_id} is {state}, cannot {action}")]
    InvalidState {
        task_id: String,
        state: TransferState,
        action: &'static str,
    },

    #[error("not a regular file: {0}")]
    NotAFile(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("engine is shut down")]
    Closed,

    #[error("transfer error: {0}")]
    Transfer(#[from] chunklift_transfer::TransferError),
}
