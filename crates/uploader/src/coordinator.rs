//! The core: single owner of every task.
//!
//! Caller commands and completion events are processed one at a time by a
//! single tokio task. After each one, a rebalance pass hands free capacity to
//! every uploading task, so capacity released by one task is picked up by
//! the others within the same step.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chunklift_protocol::{
    CheckExistingRequest, CheckExistingResponse, MergeRequest, TaskSnapshot, TransferState,
};
use chunklift_transfer::{FilePlan, TransferError, validate_file_name};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::EventSink;
use crate::scheduler::ConcurrencyScheduler;
use crate::server::UploadServer;
use crate::task::{FailureAction, Stage, TransferTask};
use crate::transport::{self, ChunkJob, ChunkOutcome};
use crate::types::{FileHandle, TaskId, TransferEvent};

/// Caller operation, answered on its oneshot.
#[derive(Debug)]
pub(crate) enum Command {
    Submit {
        files: Vec<FileHandle>,
        reply: oneshot::Sender<Result<Vec<TaskId>, EngineError>>,
    },
    Pause {
        task_id: TaskId,
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    Resume {
        task_id: TaskId,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Cancel {
        task_id: TaskId,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Snapshot {
        task_id: Option<TaskId>,
        reply: oneshot::Sender<Vec<TaskSnapshot>>,
    },
}

/// Outcome of an async unit, posted back to the core.
#[derive(Debug)]
pub(crate) enum CoreEvent {
    Planned {
        task_id: TaskId,
        ticket: u64,
        result: Result<FilePlan, String>,
    },
    Checked {
        task_id: TaskId,
        ticket: u64,
        result: Result<CheckExistingResponse, String>,
    },
    ChunkDone {
        task_id: TaskId,
        index: u32,
        attempt: u64,
        outcome: ChunkOutcome,
    },
    Merged {
        task_id: TaskId,
        ticket: u64,
        result: Result<(), String>,
    },
    DirectDone {
        task_id: TaskId,
        ticket: u64,
        result: Result<(), String>,
    },
}

pub(crate) struct Core {
    config: EngineConfig,
    server: Arc<dyn UploadServer>,
    scheduler: ConcurrencyScheduler,
    tasks: HashMap<TaskId, TransferTask>,
    /// Submission order, for snapshots and dispatch.
    order: Vec<TaskId>,
    events: EventSink,
    internal_tx: mpsc::UnboundedSender<CoreEvent>,
    internal_rx: mpsc::UnboundedReceiver<CoreEvent>,
    root: CancellationToken,
    next_ticket: u64,
}

fn next_ticket(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}

fn state_changed(events: &mut EventSink, task: &TransferTask) {
    events.emit(TransferEvent::StateChanged {
        task_id: task.id.clone(),
        state: task.state,
    });
}

fn progress(events: &mut EventSink, task: &TransferTask) {
    events.emit(TransferEvent::Progress {
        task_id: task.id.clone(),
        percent: task.progress(),
        completed: task.acknowledged_len(),
        total: task.total_chunks,
    });
}

/// Looks up the task an op completion belongs to, consuming the op.
fn current_op<'a>(
    tasks: &'a mut HashMap<TaskId, TransferTask>,
    task_id: &str,
    stage: Stage,
    ticket: u64,
) -> Option<&'a mut TransferTask> {
    let Some(task) = tasks.get_mut(task_id) else {
        trace!(task = %task_id, ?stage, ticket, "completion for removed task");
        return None;
    };
    if task.finish_op(stage, ticket) {
        Some(task)
    } else {
        trace!(task = %task_id, ?stage, ticket, "stale completion discarded");
        None
    }
}

impl Core {
    pub fn new(
        config: EngineConfig,
        server: Arc<dyn UploadServer>,
        events: mpsc::Sender<TransferEvent>,
        root: CancellationToken,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            scheduler: ConcurrencyScheduler::new(config.global_concurrency_ceiling),
            config,
            server,
            tasks: HashMap::new(),
            order: Vec::new(),
            events: EventSink::new(events),
            internal_tx,
            internal_rx,
            root,
            next_ticket: 0,
        }
    }

    /// Processes commands and completions until the root token is cancelled
    /// or every engine handle is gone.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                biased;
                _ = self.root.cancelled() => break,
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                Some(event) = self.internal_rx.recv() => self.handle_event(event),
                permit = self.events.sender().reserve_owned(), if self.events.has_backlog() => {
                    match permit {
                        Ok(permit) => self.events.release(permit),
                        Err(_) => self.events.close(),
                    }
                }
            }
            self.rebalance();
        }
        self.root.cancel();
        debug!(tasks = self.tasks.len(), "upload core stopped");
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit { files, reply } => {
                let _ = reply.send(self.submit(files).await);
            }
            Command::Pause { task_id, reply } => {
                let _ = reply.send(self.pause(&task_id));
            }
            Command::Resume { task_id, reply } => {
                let _ = reply.send(self.resume(&task_id));
            }
            Command::Cancel { task_id, reply } => {
                let _ = reply.send(self.cancel(&task_id));
            }
            Command::Snapshot { task_id, reply } => {
                let _ = reply.send(self.snapshots(task_id.as_deref()));
            }
        }
    }

    /// Validates every file, then creates all tasks before any of them
    /// starts. Nothing is created if one file is rejected.
    async fn submit(&mut self, files: Vec<FileHandle>) -> Result<Vec<TaskId>, EngineError> {
        let mut accepted: Vec<(TaskId, PathBuf, String, u64)> = Vec::with_capacity(files.len());
        for file in files {
            let task_id = file
                .task_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            if self.tasks.contains_key(&task_id) || accepted.iter().any(|a| a.0 == task_id) {
                return Err(EngineError::DuplicateTask(task_id));
            }

            let meta = tokio::fs::metadata(&file.path)
                .await
                .map_err(TransferError::from)?;
            if !meta.is_file() {
                return Err(EngineError::NotAFile(file.path.display().to_string()));
            }
            let file_name = file
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    TransferError::InvalidFileName(file.path.display().to_string())
                })?
                .to_string();
            validate_file_name(&file_name)?;

            accepted.push((task_id, file.path, file_name, meta.len()));
        }

        let mut ids = Vec::with_capacity(accepted.len());
        for (task_id, path, file_name, file_size) in accepted {
            let task = TransferTask::new(
                task_id.clone(),
                path,
                file_name,
                file_size,
                self.config.chunk_size_bytes,
                self.root.child_token(),
            );
            info!(
                task = %task_id,
                file = %task.file_name,
                size = file_size,
                direct = task.direct,
                "task submitted"
            );
            self.tasks.insert(task_id.clone(), task);
            self.order.push(task_id.clone());
            ids.push(task_id);
        }

        for task_id in &ids {
            self.start(task_id);
        }
        Ok(ids)
    }

    fn start(&mut self, task_id: &str) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        if task.direct {
            task.state = TransferState::Uploading;
            state_changed(&mut self.events, task);
            self.start_direct(task_id);
        } else {
            task.state = TransferState::Processing;
            state_changed(&mut self.events, task);
            let ticket = next_ticket(&mut self.next_ticket);
            task.begin_op(Stage::Plan, ticket);
            transport::spawn_plan(
                task.id.clone(),
                ticket,
                task.path.clone(),
                self.config.chunk_size_bytes,
                self.internal_tx.clone(),
            );
        }
    }

    fn pause(&mut self, task_id: &str) -> Result<usize, EngineError> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| EngineError::UnknownTask(task_id.to_string()))?;
        if task.state != TransferState::Uploading {
            return Err(EngineError::InvalidState {
                task_id: task_id.to_string(),
                state: task.state,
                action: "pause",
            });
        }
        let cancelled = task.halt(TransferState::Paused);
        task.error_count = 0;
        info!(task = %task_id, cancelled, "task paused");
        state_changed(&mut self.events, task);
        Ok(cancelled)
    }

    fn resume(&mut self, task_id: &str) -> Result<(), EngineError> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| EngineError::UnknownTask(task_id.to_string()))?;
        if !task.state.is_resumable() {
            return Err(EngineError::InvalidState {
                task_id: task_id.to_string(),
                state: task.state,
                action: "resume",
            });
        }
        task.state = TransferState::Uploading;
        task.error_count = 0;
        info!(task = %task_id, pending = task.pending_len(), "task resumed");
        state_changed(&mut self.events, task);

        if task.direct {
            self.start_direct(task_id);
        } else if task.all_acknowledged() {
            self.start_merge(task_id);
        }
        Ok(())
    }

    /// Removes a task in any state. In-flight work is cancelled.
    fn cancel(&mut self, task_id: &str) -> Result<(), EngineError> {
        let mut task = self
            .tasks
            .remove(task_id)
            .ok_or_else(|| EngineError::UnknownTask(task_id.to_string()))?;
        self.order.retain(|id| id != task_id);
        let dismissed = task.state.is_terminal();
        let cancelled = task.halt(task.state);
        task.cancel.cancel();
        info!(task = %task_id, cancelled, dismissed, "task removed");
        self.events.emit(TransferEvent::Removed {
            task_id: task_id.to_string(),
        });
        Ok(())
    }

    fn snapshots(&self, task_id: Option<&str>) -> Vec<TaskSnapshot> {
        match task_id {
            Some(id) => self
                .tasks
                .get(id)
                .map(TransferTask::snapshot)
                .into_iter()
                .collect(),
            None => self
                .order
                .iter()
                .filter_map(|id| self.tasks.get(id))
                .map(TransferTask::snapshot)
                .collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Completions
    // -----------------------------------------------------------------------

    fn handle_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::Planned {
                task_id,
                ticket,
                result,
            } => self.on_planned(&task_id, ticket, result),
            CoreEvent::Checked {
                task_id,
                ticket,
                result,
            } => self.on_checked(&task_id, ticket, result),
            CoreEvent::ChunkDone {
                task_id,
                index,
                attempt,
                outcome,
            } => self.on_chunk_done(&task_id, index, attempt, outcome),
            CoreEvent::Merged {
                task_id,
                ticket,
                result,
            } => self.on_merged(&task_id, ticket, result),
            CoreEvent::DirectDone {
                task_id,
                ticket,
                result,
            } => self.on_direct_done(&task_id, ticket, result),
        }
    }

    fn on_planned(&mut self, task_id: &str, ticket: u64, result: Result<FilePlan, String>) {
        let Some(task) = current_op(&mut self.tasks, task_id, Stage::Plan, ticket) else {
            return;
        };
        let plan = match result {
            Ok(plan) => plan,
            Err(e) => {
                self.fail(task_id, format!("hashing failed: {e}"));
                return;
            }
        };
        debug!(
            task = %task_id,
            fingerprint = %plan.fingerprint,
            chunks = plan.total_chunks(),
            "file planned"
        );
        task.install_plan(&plan);

        let ticket = next_ticket(&mut self.next_ticket);
        let cancel = task.begin_op(Stage::Check, ticket);
        let req = CheckExistingRequest {
            fingerprint: plan.fingerprint,
            file_name: task.file_name.clone(),
        };
        transport::spawn_check(
            Arc::clone(&self.server),
            task.id.clone(),
            ticket,
            req,
            cancel,
            self.internal_tx.clone(),
        );
    }

    fn on_checked(
        &mut self,
        task_id: &str,
        ticket: u64,
        result: Result<CheckExistingResponse, String>,
    ) {
        let Some(task) = current_op(&mut self.tasks, task_id, Stage::Check, ticket) else {
            return;
        };
        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                self.fail(task_id, format!("dedup check failed: {e}"));
                return;
            }
        };
        if !resp.should_upload {
            info!(task = %task_id, "server already has file");
            self.finish(task_id, true);
            return;
        }

        let existing = task.apply_existing(&resp.existing_chunk_hashes);
        task.state = TransferState::Uploading;
        state_changed(&mut self.events, task);
        if existing > 0 {
            debug!(task = %task_id, existing, "chunks already on server");
            progress(&mut self.events, task);
        }
        if task.all_acknowledged() {
            self.start_merge(task_id);
        }
    }

    fn on_chunk_done(&mut self, task_id: &str, index: u32, attempt: u64, outcome: ChunkOutcome) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            trace!(task = %task_id, index, "completion for removed task");
            return;
        };
        if !task.is_current(index, attempt) {
            trace!(task = %task_id, index, attempt, ?outcome, "stale chunk completion discarded");
            return;
        }

        match outcome {
            ChunkOutcome::Acked => {
                task.complete_chunk(index, attempt);
                trace!(task = %task_id, index, "chunk acknowledged");
                progress(&mut self.events, task);
                if task.all_acknowledged() {
                    self.start_merge(task_id);
                }
            }
            ChunkOutcome::Failed(e) => {
                match task.record_failure(e.clone(), self.config.retry_budget) {
                    FailureAction::Retry => {
                        warn!(
                            task = %task_id,
                            index,
                            errors = task.error_count,
                            error = %e,
                            "chunk failed, retrying"
                        );
                        let ticket = next_ticket(&mut self.next_ticket);
                        if let Some((descriptor, cancel)) = task.retry(index, ticket) {
                            let job = ChunkJob {
                                task_id: task.id.clone(),
                                path: task.path.clone(),
                                file_name: task.file_name.clone(),
                                file_size: task.file_size,
                                descriptor,
                                attempt: ticket,
                            };
                            transport::spawn_chunk(
                                Arc::clone(&self.server),
                                job,
                                cancel,
                                self.internal_tx.clone(),
                            );
                        }
                    }
                    FailureAction::Interrupt => {
                        let cancelled = task.halt(TransferState::Interrupted);
                        warn!(
                            task = %task_id,
                            errors = task.error_count,
                            cancelled,
                            error = %e,
                            "retry budget exhausted, task interrupted"
                        );
                        state_changed(&mut self.events, task);
                        self.events.emit(TransferEvent::Interrupted {
                            task_id: task_id.to_string(),
                            error: e,
                        });
                    }
                }
            }
            // Only reachable while the engine is shutting down.
            ChunkOutcome::Cancelled => {}
        }
    }

    fn on_merged(&mut self, task_id: &str, ticket: u64, result: Result<(), String>) {
        let budget = self.config.retry_budget;
        let Some(task) = current_op(&mut self.tasks, task_id, Stage::Merge, ticket) else {
            return;
        };
        let e = match result {
            Ok(()) => {
                self.finish(task_id, false);
                return;
            }
            Err(e) => e,
        };

        task.merge_failures += 1;
        let attempts = task.merge_failures;
        if attempts > budget {
            self.fail(task_id, format!("merge failed {attempts} times: {e}"));
            return;
        }
        task.halt(TransferState::Paused);
        task.error_count = 0;
        task.last_error = Some(e.clone());
        warn!(task = %task_id, attempts, error = %e, "merge failed, task paused");
        state_changed(&mut self.events, task);
        self.events.emit(TransferEvent::MergeFailed {
            task_id: task_id.to_string(),
            error: e,
            attempts,
        });
    }

    fn on_direct_done(&mut self, task_id: &str, ticket: u64, result: Result<(), String>) {
        if current_op(&mut self.tasks, task_id, Stage::Direct, ticket).is_none() {
            return;
        }
        match result {
            Ok(()) => self.finish(task_id, false),
            Err(e) => self.fail(task_id, format!("direct upload failed: {e}")),
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn start_merge(&mut self, task_id: &str) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        let Some(fingerprint) = task.fingerprint.clone() else {
            return;
        };
        let ticket = next_ticket(&mut self.next_ticket);
        let cancel = task.begin_op(Stage::Merge, ticket);
        info!(task = %task_id, chunks = task.total_chunks, "all chunks acknowledged, merging");
        let req = MergeRequest {
            fingerprint,
            file_name: task.file_name.clone(),
            chunk_size: task.chunk_size,
        };
        transport::spawn_merge(
            Arc::clone(&self.server),
            task.id.clone(),
            ticket,
            req,
            cancel,
            self.internal_tx.clone(),
        );
    }

    fn start_direct(&mut self, task_id: &str) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        let ticket = next_ticket(&mut self.next_ticket);
        let cancel = task.begin_op(Stage::Direct, ticket);
        debug!(task = %task_id, size = task.file_size, "direct upload");
        transport::spawn_direct(
            Arc::clone(&self.server),
            task.id.clone(),
            ticket,
            task.path.clone(),
            task.file_name.clone(),
            cancel,
            self.internal_tx.clone(),
        );
    }

    fn finish(&mut self, task_id: &str, instant: bool) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        task.finish();
        info!(task = %task_id, instant, "upload finished");
        state_changed(&mut self.events, task);
        progress(&mut self.events, task);
        self.events.emit(TransferEvent::Finished {
            task_id: task_id.to_string(),
            instant,
        });
    }

    fn fail(&mut self, task_id: &str, e: String) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        task.fail(e.clone());
        error!(task = %task_id, error = %e, "upload failed");
        state_changed(&mut self.events, task);
        self.events.emit(TransferEvent::Failed {
            task_id: task_id.to_string(),
            error: e,
        });
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Tops up every uploading task to its current fair share.
    fn rebalance(&mut self) {
        let active = self.tasks.values().filter(|t| t.state.is_active()).count();
        let ready: Vec<TaskId> = self
            .order
            .iter()
            .filter(|id| {
                self.tasks.get(*id).is_some_and(|t| {
                    t.state == TransferState::Uploading && !t.direct && t.has_pending()
                })
            })
            .cloned()
            .collect();
        for task_id in ready {
            self.dispatch(&task_id, active);
        }
    }

    fn dispatch(&mut self, task_id: &str, active: usize) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        let grant = self.scheduler.grant(task.in_flight_len(), active);
        let mut sent = 0;
        for _ in 0..grant {
            if !task.has_pending() {
                break;
            }
            let Some(slot) = self.scheduler.acquire() else {
                break;
            };
            let attempt = next_ticket(&mut self.next_ticket);
            let Some((descriptor, cancel)) = task.begin_send(attempt, slot) else {
                break;
            };
            let job = ChunkJob {
                task_id: task.id.clone(),
                path: task.path.clone(),
                file_name: task.file_name.clone(),
                file_size: task.file_size,
                descriptor,
                attempt,
            };
            transport::spawn_chunk(
                Arc::clone(&self.server),
                job,
                cancel,
                self.internal_tx.clone(),
            );
            sent += 1;
        }
        if sent > 0 {
            debug!(
                task = %task_id,
                sent,
                in_flight = task.in_flight_len(),
                pending = task.pending_len(),
                "chunks dispatched"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockServer;
    use std::io::Write;
    use std::time::Duration;

    fn core(server: Arc<MockServer>, config: EngineConfig) -> (Core, mpsc::Receiver<TransferEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (Core::new(config, server, tx, CancellationToken::new()), rx)
    }

    fn config(chunk_size: u64) -> EngineConfig {
        EngineConfig {
            chunk_size_bytes: chunk_size,
            ..EngineConfig::default()
        }
    }

    fn big_file(dir: &tempfile::TempDir, name: &str, len: usize) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&vec![7u8; len]).unwrap();
        path
    }

    /// Runs one completion through the core the way `run` does.
    async fn step(core: &mut Core) {
        let event = tokio::time::timeout(Duration::from_secs(5), core.internal_rx.recv())
            .await
            .expect("core stalled")
            .unwrap();
        core.handle_event(event);
        core.rebalance();
    }

    /// Steps until `task_id` reaches `state`, checking chunk coverage after
    /// every completion.
    async fn drive_until(core: &mut Core, task_id: &str, state: TransferState) {
        for _ in 0..200 {
            let task = &core.tasks[task_id];
            assert!(task.coverage_holds(), "coverage broken in {}", task.state);
            if task.state == state {
                return;
            }
            step(core).await;
        }
        panic!("task {task_id} never reached {state}");
    }

    #[tokio::test]
    async fn pause_and_resume_keep_every_chunk_accounted() {
        let dir = tempfile::tempdir().unwrap();
        let path = big_file(&dir, "big.bin", 60);
        let server = Arc::new(MockServer::new().gated());
        let config = EngineConfig {
            global_concurrency_ceiling: 4,
            ..config(10)
        };
        let (mut core, _events) = core(server.clone(), config);
        core.submit(vec![FileHandle::new(path).with_id("t1")])
            .await
            .unwrap();

        drive_until(&mut core, "t1", TransferState::Uploading).await;
        assert_eq!(core.tasks["t1"].in_flight_len(), 4);
        assert_eq!(core.tasks["t1"].pending_len(), 2);

        assert_eq!(core.pause("t1").unwrap(), 4);
        let task = &core.tasks["t1"];
        assert!(task.coverage_holds());
        assert_eq!(task.in_flight_len(), 0);
        assert_eq!(task.pending_len(), 6);
        assert_eq!(core.scheduler.in_flight(), 0);

        core.resume("t1").unwrap();
        core.rebalance();
        let task = &core.tasks["t1"];
        assert!(task.coverage_holds());
        assert_eq!(task.in_flight_len(), 4);

        server.release(1000);
        drive_until(&mut core, "t1", TransferState::Finished).await;
        assert_eq!(server.chunk_uploads().len(), 6);
        assert_eq!(core.scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn interrupt_and_resume_keep_every_chunk_accounted() {
        let dir = tempfile::tempdir().unwrap();
        let path = big_file(&dir, "big.bin", 30);
        let server = Arc::new(MockServer::new());
        server.fail_chunks(4);
        let config = EngineConfig {
            global_concurrency_ceiling: 1,
            ..config(10)
        };
        let (mut core, _events) = core(server.clone(), config);
        core.submit(vec![FileHandle::new(path).with_id("t1")])
            .await
            .unwrap();

        drive_until(&mut core, "t1", TransferState::Interrupted).await;
        let task = &core.tasks["t1"];
        assert_eq!(task.error_count, 4);
        assert_eq!(task.in_flight_len(), 0);
        assert_eq!(task.pending_len(), 3);

        core.resume("t1").unwrap();
        core.rebalance();
        assert!(core.tasks["t1"].coverage_holds());
        drive_until(&mut core, "t1", TransferState::Finished).await;
        assert_eq!(server.chunk_uploads().len(), 3);
    }

    #[tokio::test]
    async fn completion_for_removed_task_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = big_file(&dir, "big.bin", 100);
        let (mut core, _events) = core(Arc::new(MockServer::new()), config(10));
        core.submit(vec![FileHandle::new(path).with_id("t1")])
            .await
            .unwrap();
        core.cancel("t1").unwrap();

        core.handle_event(CoreEvent::Planned {
            task_id: "t1".into(),
            ticket: 1,
            result: Err("late".into()),
        });
        assert!(core.tasks.is_empty());
    }

    #[tokio::test]
    async fn hash_failure_fails_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let path = big_file(&dir, "big.bin", 100);
        let server = Arc::new(MockServer::new());
        let (mut core, mut events) = core(server.clone(), config(10));

        let ids = core
            .submit(vec![FileHandle::new(path).with_id("t1")])
            .await
            .unwrap();
        assert_eq!(ids, vec!["t1".to_string()]);
        assert_eq!(core.tasks["t1"].state, TransferState::Processing);

        // Ticket 1 is the plan op started by submit.
        core.handle_event(CoreEvent::Planned {
            task_id: "t1".into(),
            ticket: 1,
            result: Err("disk on fire".into()),
        });

        let snapshot = core.tasks["t1"].snapshot();
        assert_eq!(snapshot.state, TransferState::Failed);
        assert!(snapshot.last_error.unwrap().contains("disk on fire"));
        assert_eq!(server.check_calls(), 0);
        assert_eq!(server.chunk_attempts(), 0);

        let mut saw_failed = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, TransferEvent::Failed { .. }) {
                saw_failed = true;
            }
        }
        assert!(saw_failed);
    }

    #[tokio::test]
    async fn stale_plan_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = big_file(&dir, "big.bin", 100);
        let (mut core, _events) = core(Arc::new(MockServer::new()), config(10));
        core.submit(vec![FileHandle::new(path).with_id("t1")])
            .await
            .unwrap();

        core.handle_event(CoreEvent::Planned {
            task_id: "t1".into(),
            ticket: 99,
            result: Err("late".into()),
        });
        assert_eq!(core.tasks["t1"].state, TransferState::Processing);
    }

    #[tokio::test]
    async fn submit_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let good = big_file(&dir, "good.bin", 5);
        let (mut core, _events) = core(Arc::new(MockServer::new()), config(10));

        let err = core
            .submit(vec![
                FileHandle::new(good),
                FileHandle::new(dir.path().join("missing.bin")),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transfer(TransferError::Io(_))));
        assert!(core.tasks.is_empty());
        assert!(core.order.is_empty());
    }

    #[tokio::test]
    async fn submit_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (mut core, _events) = core(Arc::new(MockServer::new()), config(10));
        let err = core
            .submit(vec![FileHandle::new(dir.path())])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotAFile(_)));
    }

    #[tokio::test]
    async fn submit_rejects_duplicate_ids_in_batch() {
        let dir = tempfile::tempdir().unwrap();
        let a = big_file(&dir, "a.bin", 5);
        let b = big_file(&dir, "b.bin", 5);
        let (mut core, _events) = core(Arc::new(MockServer::new()), config(10));
        let err = core
            .submit(vec![
                FileHandle::new(a).with_id("same"),
                FileHandle::new(b).with_id("same"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTask(id) if id == "same"));
        assert!(core.tasks.is_empty());
    }

    #[tokio::test]
    async fn small_file_takes_direct_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = big_file(&dir, "small.bin", 10);
        let (mut core, _events) = core(Arc::new(MockServer::new()), config(10));
        core.submit(vec![FileHandle::new(path).with_id("t1")])
            .await
            .unwrap();
        let task = &core.tasks["t1"];
        assert!(task.direct);
        assert_eq!(task.state, TransferState::Uploading);
        assert_eq!(task.op_stage(), Some(Stage::Direct));
        assert_eq!(task.total_chunks, 0);
    }

    #[tokio::test]
    async fn pause_rejected_while_processing() {
        let dir = tempfile::tempdir().unwrap();
        let path = big_file(&dir, "big.bin", 100);
        let (mut core, _events) = core(Arc::new(MockServer::new()), config(10));
        core.submit(vec![FileHandle::new(path).with_id("t1")])
            .await
            .unwrap();
        let err = core.pause("t1").unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState {
                state: TransferState::Processing,
                action: "pause",
                ..
            }
        ));
        assert!(matches!(core.resume("t1"), Err(EngineError::InvalidState { .. })));
        assert!(matches!(core.pause("nope"), Err(EngineError::UnknownTask(_))));
    }
}
