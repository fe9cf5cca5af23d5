//! Per-file task record.
//!
//! A `TransferTask` is owned exclusively by the core. Every chunk lives in
//! exactly one of `pending`, `in_flight` or `acknowledged`.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use chunklift_protocol::{TaskSnapshot, TransferState, progress_percent};
use chunklift_transfer::FilePlan;
use tokio_util::sync::CancellationToken;

use crate::scheduler::ConcurrencySlot;
use crate::types::TaskId;

/// One chunk of a planned file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub fingerprint: String,
    /// 0-based position within the file.
    pub index: u32,
    /// `"{fingerprint}-{index}"`.
    pub chunk_hash: String,
    pub offset: u64,
    pub size_bytes: u64,
    pub total_chunks: u32,
    pub acknowledged: bool,
}

/// A chunk currently on the wire.
#[derive(Debug)]
pub(crate) struct InFlightChunk {
    pub descriptor: ChunkDescriptor,
    /// Ticket of the current send; completions with another ticket are stale.
    pub attempt: u64,
    pub cancel: CancellationToken,
    pub _slot: ConcurrencySlot,
}

/// Non-chunk async unit the task is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Plan,
    Check,
    Merge,
    Direct,
}

#[derive(Debug)]
struct PendingOp {
    stage: Stage,
    ticket: u64,
    cancel: CancellationToken,
}

/// What to do after a chunk failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureAction {
    Retry,
    Interrupt,
}

#[derive(Debug)]
pub(crate) struct TransferTask {
    pub id: TaskId,
    pub path: PathBuf,
    pub file_name: String,
    pub file_size: u64,
    pub state: TransferState,
    /// Single-request path for files no larger than one chunk.
    pub direct: bool,
    pub fingerprint: Option<String>,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub completed_count: u32,
    pub error_count: u32,
    pub merge_failures: u32,
    pub last_error: Option<String>,
    /// Child of the engine's root token. Cancelled when the task is removed.
    pub cancel: CancellationToken,
    pending: Vec<ChunkDescriptor>,
    in_flight: HashMap<u32, InFlightChunk>,
    acknowledged: BTreeSet<u32>,
    op: Option<PendingOp>,
}

impl TransferTask {
    pub fn new(
        id: TaskId,
        path: PathBuf,
        file_name: String,
        file_size: u64,
        chunk_size: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            path,
            file_name,
            file_size,
            state: TransferState::None,
            direct: file_size <= chunk_size,
            fingerprint: None,
            chunk_size,
            total_chunks: 0,
            completed_count: 0,
            error_count: 0,
            merge_failures: 0,
            last_error: None,
            cancel,
            pending: Vec::new(),
            in_flight: HashMap::new(),
            acknowledged: BTreeSet::new(),
            op: None,
        }
    }

    // -----------------------------------------------------------------------
    // Planning and dedup
    // -----------------------------------------------------------------------

    /// Builds the chunk partition from a finished plan. Everything starts
    /// pending.
    pub fn install_plan(&mut self, plan: &FilePlan) {
        let total = plan.total_chunks();
        self.fingerprint = Some(plan.fingerprint.clone());
        self.file_size = plan.file_size;
        self.chunk_size = plan.chunk_size;
        self.total_chunks = total;
        self.pending = plan
            .chunks
            .iter()
            .map(|span| ChunkDescriptor {
                fingerprint: plan.fingerprint.clone(),
                index: span.index,
                chunk_hash: plan.chunk_hash(span.index),
                offset: span.offset,
                size_bytes: span.size,
                total_chunks: total,
                acknowledged: false,
            })
            .collect();
        self.in_flight.clear();
        self.acknowledged.clear();
        self.completed_count = 0;
    }

    /// Acknowledges every pending chunk whose hash the server already holds.
    /// Returns how many were acknowledged.
    pub fn apply_existing(&mut self, existing: &[String]) -> usize {
        if existing.is_empty() {
            return 0;
        }
        let before = self.pending.len();
        let mut kept = Vec::with_capacity(before);
        for mut chunk in self.pending.drain(..) {
            if existing.iter().any(|h| *h == chunk.chunk_hash) {
                chunk.acknowledged = true;
                self.acknowledged.insert(chunk.index);
                self.completed_count += 1;
            } else {
                kept.push(chunk);
            }
        }
        self.pending = kept;
        before - self.pending.len()
    }

    // -----------------------------------------------------------------------
    // Plan, check, merge and direct operations
    // -----------------------------------------------------------------------

    /// Records that `stage` is running under `ticket` and returns its
    /// cancellation token.
    pub fn begin_op(&mut self, stage: Stage, ticket: u64) -> CancellationToken {
        if let Some(old) = self.op.take() {
            old.cancel.cancel();
        }
        let cancel = self.cancel.child_token();
        self.op = Some(PendingOp {
            stage,
            ticket,
            cancel: cancel.clone(),
        });
        cancel
    }

    /// Consumes the pending op if it matches. `false` means the completion is
    /// stale.
    pub fn finish_op(&mut self, stage: Stage, ticket: u64) -> bool {
        match &self.op {
            Some(op) if op.stage == stage && op.ticket == ticket => {
                self.op = None;
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn op_stage(&self) -> Option<Stage> {
        self.op.as_ref().map(|op| op.stage)
    }

    // -----------------------------------------------------------------------
    // Chunk dispatch
    // -----------------------------------------------------------------------

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether every chunk has been acknowledged.
    pub fn all_acknowledged(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    /// Moves the tail of `pending` into `in_flight` under `attempt`.
    pub fn begin_send(
        &mut self,
        attempt: u64,
        slot: ConcurrencySlot,
    ) -> Option<(ChunkDescriptor, CancellationToken)> {
        let descriptor = self.pending.pop()?;
        let cancel = self.cancel.child_token();
        self.in_flight.insert(
            descriptor.index,
            InFlightChunk {
                descriptor: descriptor.clone(),
                attempt,
                cancel: cancel.clone(),
                _slot: slot,
            },
        );
        Some((descriptor, cancel))
    }

    /// Whether a completion for `(index, attempt)` belongs to the live send.
    pub fn is_current(&self, index: u32, attempt: u64) -> bool {
        self.state == TransferState::Uploading
            && self
                .in_flight
                .get(&index)
                .is_some_and(|chunk| chunk.attempt == attempt)
    }

    /// Acknowledges a chunk. Its slot is released. Returns `false` if the
    /// completion is stale.
    pub fn complete_chunk(&mut self, index: u32, attempt: u64) -> bool {
        if !self.is_current(index, attempt) {
            return false;
        }
        if self.in_flight.remove(&index).is_some() {
            self.acknowledged.insert(index);
            self.completed_count += 1;
            self.error_count = self.error_count.saturating_sub(1);
        }
        true
    }

    /// Counts a chunk failure against the task-wide budget.
    pub fn record_failure(&mut self, error: String, retry_budget: u32) -> FailureAction {
        self.error_count += 1;
        self.last_error = Some(error);
        if self.error_count > retry_budget {
            FailureAction::Interrupt
        } else {
            FailureAction::Retry
        }
    }

    /// Re-arms an in-flight chunk with a new attempt, keeping its slot.
    pub fn retry(
        &mut self,
        index: u32,
        attempt: u64,
    ) -> Option<(ChunkDescriptor, CancellationToken)> {
        let cancel = self.cancel.child_token();
        let chunk = self.in_flight.get_mut(&index)?;
        chunk.attempt = attempt;
        chunk.cancel = cancel.clone();
        Some((chunk.descriptor.clone(), cancel))
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Stops all transport for this task and moves it to `state`.
    ///
    /// In-flight chunks go back to `pending` and release their slots; a
    /// running merge or direct upload is cancelled. Returns the number of
    /// chunk sends cancelled.
    pub fn halt(&mut self, state: TransferState) -> usize {
        let cancelled = self.in_flight.len();
        for (_, chunk) in self.in_flight.drain() {
            chunk.cancel.cancel();
            self.pending.push(chunk.descriptor);
        }
        self.pending.sort_by_key(|chunk| chunk.index);
        if let Some(op) = self.op.take() {
            op.cancel.cancel();
        }
        self.state = state;
        cancelled
    }

    /// Marks the task finished. The completed counter is cleared; progress
    /// reads 100 from here on.
    pub fn finish(&mut self) {
        self.state = TransferState::Finished;
        self.completed_count = 0;
        self.error_count = 0;
        self.last_error = None;
    }

    pub fn fail(&mut self, error: String) {
        self.halt(TransferState::Failed);
        self.last_error = Some(error);
    }

    /// Chunks acknowledged so far, including ones found on the server.
    pub fn acknowledged_len(&self) -> u32 {
        self.acknowledged.len() as u32
    }

    pub fn progress(&self) -> f64 {
        if self.state == TransferState::Finished {
            100.0
        } else {
            progress_percent(self.completed_count, self.total_chunks)
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id.clone(),
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            state: self.state,
            progress_percent: self.progress(),
            completed_chunks: self.acknowledged_len(),
            total_chunks: self.total_chunks,
            error_count: self.error_count,
            last_error: self.last_error.clone(),
        }
    }

    /// Each planned index appears in exactly one of pending, in-flight and
    /// acknowledged.
    #[cfg(test)]
    pub fn coverage_holds(&self) -> bool {
        let mut seen = BTreeSet::new();
        let pending = self.pending.iter().map(|c| c.index);
        let in_flight = self.in_flight.keys().copied();
        let acked = self.acknowledged.iter().copied();
        for index in pending.chain(in_flight).chain(acked) {
            if !seen.insert(index) {
                return false;
            }
        }
        seen.len() as u32 == self.total_chunks && seen.iter().all(|i| *i < self.total_chunks)
    }
}
