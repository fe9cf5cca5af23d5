//! Server collaborator trait.
//!
//! `UploadServer` is the seam between the engine and the network. The stock
//! implementation is [`HttpUploadServer`](crate::HttpUploadServer); tests
//! plug in scripted mocks.

use std::future::Future;
use std::pin::Pin;

use chunklift_protocol::{CheckExistingRequest, CheckExistingResponse, ChunkHeader, MergeRequest};

use crate::error::ServerError;

/// Boxed future returned by [`UploadServer`] methods.
pub type ServerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ServerError>> + Send + 'a>>;

/// One chunk on its way to the server.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub header: ChunkHeader,
    pub payload: Vec<u8>,
}

/// A whole small file sent in one request.
#[derive(Debug, Clone)]
pub struct DirectUpload {
    pub file_name: String,
    pub payload: Vec<u8>,
}

/// Abstract connection to the upload server.
///
/// Every method is cancellable by dropping the returned future.
pub trait UploadServer: Send + Sync {
    /// Dedup check: does the server need this file, and which chunks does it
    /// already hold?
    fn check_existing(&self, req: CheckExistingRequest)
    -> ServerFuture<'_, CheckExistingResponse>;

    /// Sends one chunk.
    fn upload_chunk(&self, chunk: ChunkUpload) -> ServerFuture<'_, ()>;

    /// Asks the server to assemble the file from its chunks.
    fn merge_chunks(&self, req: MergeRequest) -> ServerFuture<'_, ()>;

    /// Sends a small file in one request.
    fn upload_direct(&self, upload: DirectUpload) -> ServerFuture<'_, ()>;
}
