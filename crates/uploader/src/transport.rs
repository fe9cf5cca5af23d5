//! Async units spawned by the core.
//!
//! Each unit runs as its own tokio task and posts exactly one [`CoreEvent`]
//! back. Planning, dedup, merge and direct uploads post nothing when they are
//! cancelled; chunk sends report a `Cancelled` outcome.

use std::path::PathBuf;
use std::sync::Arc;

use chunklift_protocol::{CheckExistingRequest, ChunkHeader, MergeRequest};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::coordinator::CoreEvent;
use crate::server::{ChunkUpload, DirectUpload, UploadServer};
use crate::task::ChunkDescriptor;
use crate::types::TaskId;

pub(crate) type EventSender = mpsc::UnboundedSender<CoreEvent>;

/// How a chunk send ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChunkOutcome {
    Acked,
    Failed(String),
    Cancelled,
}

/// Everything a chunk send needs, detached from the task record.
#[derive(Debug, Clone)]
pub(crate) struct ChunkJob {
    pub task_id: TaskId,
    pub path: PathBuf,
    pub file_name: String,
    pub file_size: u64,
    pub descriptor: ChunkDescriptor,
    pub attempt: u64,
}

impl ChunkJob {
    fn header(&self) -> ChunkHeader {
        let d = &self.descriptor;
        ChunkHeader {
            fingerprint: d.fingerprint.clone(),
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            index: d.index,
            chunk_hash: d.chunk_hash.clone(),
            chunk_size: d.size_bytes,
            total_chunks: d.total_chunks,
        }
    }
}

/// Fingerprints and partitions a file on the blocking pool.
pub(crate) fn spawn_plan(
    task_id: TaskId,
    ticket: u64,
    path: PathBuf,
    chunk_size: u64,
    events: EventSender,
) {
    tokio::spawn(async move {
        let result = tokio::task::spawn_blocking(move || {
            chunklift_transfer::plan_file(&path, chunk_size)
        })
        .await
        .map_err(|e| format!("hash task failed: {e}"))
        .and_then(|r| r.map_err(|e| e.to_string()));
        let _ = events.send(CoreEvent::Planned {
            task_id,
            ticket,
            result,
        });
    });
}

pub(crate) fn spawn_check(
    server: Arc<dyn UploadServer>,
    task_id: TaskId,
    ticket: u64,
    req: CheckExistingRequest,
    cancel: CancellationToken,
    events: EventSender,
) {
    tokio::spawn(async move {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            r = server.check_existing(req) => r.map_err(|e| e.to_string()),
        };
        let _ = events.send(CoreEvent::Checked {
            task_id,
            ticket,
            result,
        });
    });
}

/// Reads one chunk's bytes and sends them.
pub(crate) fn spawn_chunk(
    server: Arc<dyn UploadServer>,
    job: ChunkJob,
    cancel: CancellationToken,
    events: EventSender,
) {
    tokio::spawn(async move {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => ChunkOutcome::Cancelled,
            r = send_chunk(server.as_ref(), &job) => match r {
                Ok(()) => ChunkOutcome::Acked,
                Err(e) => ChunkOutcome::Failed(e),
            },
        };
        if outcome == ChunkOutcome::Cancelled {
            trace!(task = %job.task_id, index = job.descriptor.index, "chunk send cancelled");
        }
        let _ = events.send(CoreEvent::ChunkDone {
            task_id: job.task_id,
            index: job.descriptor.index,
            attempt: job.attempt,
            outcome,
        });
    });
}

async fn send_chunk(server: &dyn UploadServer, job: &ChunkJob) -> Result<(), String> {
    let d = &job.descriptor;
    let payload = chunklift_transfer::read_chunk(&job.path, d.offset, d.size_bytes)
        .await
        .map_err(|e| e.to_string())?;
    server
        .upload_chunk(ChunkUpload {
            header: job.header(),
            payload,
        })
        .await
        .map_err(|e| e.to_string())
}

pub(crate) fn spawn_merge(
    server: Arc<dyn UploadServer>,
    task_id: TaskId,
    ticket: u64,
    req: MergeRequest,
    cancel: CancellationToken,
    events: EventSender,
) {
    tokio::spawn(async move {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            r = server.merge_chunks(req) => r.map_err(|e| e.to_string()),
        };
        let _ = events.send(CoreEvent::Merged {
            task_id,
            ticket,
            result,
        });
    });
}

/// Reads a small file whole and sends it in one request.
pub(crate) fn spawn_direct(
    server: Arc<dyn UploadServer>,
    task_id: TaskId,
    ticket: u64,
    path: PathBuf,
    file_name: String,
    cancel: CancellationToken,
    events: EventSender,
) {
    tokio::spawn(async move {
        let send = async {
            let payload = chunklift_transfer::read_whole(&path)
                .await
                .map_err(|e| e.to_string())?;
            server
                .upload_direct(DirectUpload { file_name, payload })
                .await
                .map_err(|e| e.to_string())
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            r = send => r,
        };
        let _ = events.send(CoreEvent::DirectDone {
            task_id,
            ticket,
            result,
        });
    });
}
