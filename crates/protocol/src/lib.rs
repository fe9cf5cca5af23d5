//! Wire types shared by the chunklift uploader and its server collaborator.
//!
//! Plain serde data: request/response bodies for the four server operations,
//! the task state enum, and the observable task snapshot. Nothing here knows
//! about HTTP or the engine internals.

pub mod messages;
pub mod types;

pub use messages::{
    CheckExistingRequest, CheckExistingResponse, ChunkHeader, ErrorResponse, MergeRequest,
};
pub use types::{TaskSnapshot, TransferState, progress_percent};
