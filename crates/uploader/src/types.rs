//! Caller-facing data types.

use std::path::{Path, PathBuf};

use chunklift_protocol::TransferState;

/// Caller-visible task identifier, unique within one engine.
pub type TaskId = String;

/// A file submitted for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub path: PathBuf,
    /// Caller-assigned id. A UUID is generated when `None`.
    pub task_id: Option<TaskId>,
}

impl FileHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            task_id: None,
        }
    }

    /// Uses `task_id` instead of a generated id.
    pub fn with_id(mut self, task_id: impl Into<TaskId>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

impl From<PathBuf> for FileHandle {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl From<&Path> for FileHandle {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

/// Event emitted by the engine as tasks progress.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// A task moved to a new state.
    StateChanged {
        task_id: TaskId,
        state: TransferState,
    },
    /// A chunk was acknowledged (or found on the server).
    Progress {
        task_id: TaskId,
        percent: f64,
        completed: u32,
        total: u32,
    },
    /// The retry budget ran out; the task is parked until resumed.
    Interrupted { task_id: TaskId, error: String },
    /// The merge call failed; the task is paused with its chunks intact.
    MergeFailed {
        task_id: TaskId,
        error: String,
        attempts: u32,
    },
    /// The file is on the server. `instant` means no bytes were sent.
    Finished { task_id: TaskId, instant: bool },
    /// The task hit an unrecoverable error.
    Failed { task_id: TaskId, error: String },
    /// The task was cancelled or dismissed.
    Removed { task_id: TaskId },
}

impl TransferEvent {
    /// Id of the task this event is about.
    pub fn task_id(&self) -> &str {
        match self {
            TransferEvent::StateChanged { task_id, .. }
            | TransferEvent::Progress { task_id, .. }
            | TransferEvent::Interrupted { task_id, .. }
            | TransferEvent::MergeFailed { task_id, .. }
            | TransferEvent::Finished { task_id, .. }
            | TransferEvent::Failed { task_id, .. }
            | TransferEvent::Removed { task_id } => task_id,
        }
    }
}
