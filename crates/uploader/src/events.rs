//! Caller-facing event delivery.
//!
//! The core never waits on the caller. `Progress` is best-effort and dropped
//! when the channel is full. Every other event is queued in a backlog and
//! delivered in order as the caller drains the channel.

use std::collections::VecDeque;

use tokio::sync::mpsc::{self, OwnedPermit, error::TrySendError};
use tracing::debug;

use crate::types::TransferEvent;

#[derive(Debug)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<TransferEvent>,
    backlog: VecDeque<TransferEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<TransferEvent>) -> Self {
        Self {
            tx,
            backlog: VecDeque::new(),
        }
    }

    pub fn emit(&mut self, event: TransferEvent) {
        if !self.backlog.is_empty() {
            self.defer(event);
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => self.defer(event),
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn defer(&mut self, event: TransferEvent) {
        if matches!(event, TransferEvent::Progress { .. }) {
            debug!(task = %event.task_id(), "event channel full, dropping progress");
        } else {
            self.backlog.push_back(event);
        }
    }

    pub fn has_backlog(&self) -> bool {
        !self.backlog.is_empty()
    }

    /// Sender handle for awaiting channel capacity outside the sink.
    pub fn sender(&self) -> mpsc::Sender<TransferEvent> {
        self.tx.clone()
    }

    /// Uses a reserved slot for the oldest queued event, then moves as many
    /// more as fit.
    pub fn release(&mut self, permit: OwnedPermit<TransferEvent>) {
        let Some(event) = self.backlog.pop_front() else {
            return;
        };
        permit.send(event);
        while let Some(event) = self.backlog.pop_front() {
            match self.tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    self.backlog.push_front(event);
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    self.backlog.clear();
                    break;
                }
            }
        }
    }

    /// The receiver is gone; nothing queued can be delivered.
    pub fn close(&mut self) {
        self.backlog.clear();
    }
}
