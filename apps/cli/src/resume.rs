//! Delayed auto-resume.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Tasks waiting out the auto-resume delay, oldest first.
#[derive(Debug)]
pub struct ResumeQueue {
    delay: Duration,
    due: VecDeque<(Instant, String)>,
}

impl ResumeQueue {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            due: VecDeque::new(),
        }
    }

    pub fn schedule(&mut self, task_id: String) {
        self.due.push_back((Instant::now() + self.delay, task_id));
    }

    pub fn is_empty(&self) -> bool {
        self.due.is_empty()
    }

    /// Waits for the oldest deadline and pops its task. Never completes while
    /// the queue is empty. Dropping the future leaves the queue unchanged.
    pub async fn next(&mut self) -> Option<String> {
        match self.due.front() {
            Some((at, _)) => tokio::time::sleep_until(*at).await,
            None => std::future::pending::<()>().await,
        }
        self.due.pop_front().map(|(_, task_id)| task_id)
    }
}
