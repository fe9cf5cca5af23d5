//! Resumable chunked upload engine.
//!
//! This crate implements the **client side** of a chunked large-file upload.
//! It has no UI dependencies; the transport is abstracted behind
//! [`UploadServer`], with [`HttpUploadServer`] as the stock implementation.
//!
//! # Pipeline (per file)
//!
//! 1. **Plan**: fingerprint the file and split it into chunks (off the core)
//! 2. **Dedup**: ask the server which chunks it already has
//! 3. **Upload**: send the remaining chunks under a fair-share concurrency cap,
//!    retrying failures until the task-wide error budget runs out
//! 4. **Merge**: ask the server to assemble the file
//!
//! Files no larger than one chunk skip all of this and go through a single
//! direct upload.
//!
//! All task state is owned by one cooperative core task; callers talk to it
//! through [`UploadEngine`] and observe it through [`TransferEvent`]s.

pub mod config;
mod coordinator;
pub mod engine;
pub mod error;
mod events;
pub mod http;
pub mod scheduler;
pub mod server;
mod task;
#[cfg(test)]
mod testing;
mod transport;
pub mod types;

// Re-export primary types for convenience.
pub use chunklift_protocol::{TaskSnapshot, TransferState};
pub use config::EngineConfig;
pub use engine::UploadEngine;
pub use error::{EngineError, ServerError};
pub use http::HttpUploadServer;
pub use scheduler::{ConcurrencyScheduler, ConcurrencySlot};
pub use server::{ChunkUpload, DirectUpload, ServerFuture, UploadServer};
pub use task::ChunkDescriptor;
pub use types::{FileHandle, TaskId, TransferEvent};
