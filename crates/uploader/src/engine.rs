//! Caller-facing engine handle.
//!
//! `UploadEngine` spawns the core on construction and forwards every
//! operation to it over a command channel. Progress is observed through the
//! event receiver returned by [`UploadEngine::take_events`].

use std::sync::Arc;

use chunklift_protocol::TaskSnapshot;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::EngineConfig;
use crate::coordinator::{Command, Core};
use crate::error::EngineError;
use crate::server::UploadServer;
use crate::types::{FileHandle, TaskId, TransferEvent};

const COMMAND_BUFFER: usize = 64;

/// Runs uploads against an [`UploadServer`].
///
/// Must be created inside a tokio runtime. Dropping the engine cancels every
/// in-flight request.
pub struct UploadEngine {
    commands: mpsc::Sender<Command>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
    cancel: CancellationToken,
    config: EngineConfig,
}

impl UploadEngine {
    /// Validates `config` and starts the core.
    pub fn new(config: EngineConfig, server: Arc<dyn UploadServer>) -> Result<Self, EngineError> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let cancel = CancellationToken::new();

        let core = Core::new(config.clone(), server, event_tx, cancel.clone());
        tokio::spawn(core.run(command_rx));

        info!(
            chunk_size = config.chunk_size_bytes,
            ceiling = config.global_concurrency_ceiling,
            retry_budget = config.retry_budget,
            "upload engine started"
        );

        Ok(Self {
            commands: command_tx,
            events_rx: Some(event_rx),
            cancel,
            config,
        })
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.take()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns a token that stops the engine when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    /// Submits files for upload and returns their task ids, in order.
    ///
    /// Either every file is accepted or none is.
    pub async fn submit(&self, files: Vec<FileHandle>) -> Result<Vec<TaskId>, EngineError> {
        self.request(|reply| Command::Submit { files, reply })
            .await?
    }

    /// Pauses an uploading task. Returns how many chunk sends were cancelled.
    pub async fn pause(&self, task_id: &str) -> Result<usize, EngineError> {
        let task_id = task_id.to_string();
        self.request(|reply| Command::Pause { task_id, reply })
            .await?
    }

    /// Resumes a paused or interrupted task.
    pub async fn resume(&self, task_id: &str) -> Result<(), EngineError> {
        let task_id = task_id.to_string();
        self.request(|reply| Command::Resume { task_id, reply })
            .await?
    }

    /// Removes a task in any state, cancelling its in-flight work.
    pub async fn cancel(&self, task_id: &str) -> Result<(), EngineError> {
        let task_id = task_id.to_string();
        self.request(|reply| Command::Cancel { task_id, reply })
            .await?
    }

    pub async fn snapshot(&self, task_id: &str) -> Result<Option<TaskSnapshot>, EngineError> {
        let task_id = Some(task_id.to_string());
        let mut found = self
            .request(|reply| Command::Snapshot { task_id, reply })
            .await?;
        Ok(found.pop())
    }

    /// Snapshots of every task, in submission order.
    pub async fn snapshots(&self) -> Result<Vec<TaskSnapshot>, EngineError> {
        self.request(|reply| Command::Snapshot {
            task_id: None,
            reply,
        })
        .await
    }

    /// Stops the core and cancels all in-flight work.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for UploadEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
