//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Default global ceiling on simultaneous chunk requests.
///
/// Matches the common per-origin connection limit of browsers.
pub const DEFAULT_CONCURRENCY_CEILING: usize = 6;

/// Default number of net chunk errors tolerated before a task is interrupted.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// Default capacity of the caller-facing event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Recognized engine options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Size of each chunk. Files no larger than this use the direct path.
    pub chunk_size_bytes: u64,
    /// Max simultaneous in-flight chunk requests across all tasks.
    pub global_concurrency_ceiling: usize,
    /// Net error count a task may reach before it is interrupted.
    pub retry_budget: u32,
    /// Capacity of the event channel handed out by `take_events`. Progress
    /// events beyond it are dropped; other events wait for room.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: chunklift_transfer::DEFAULT_CHUNK_SIZE,
            global_concurrency_ceiling: DEFAULT_CONCURRENCY_CEILING,
            retry_budget: DEFAULT_RETRY_BUDGET,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl EngineConfig {
    /// Checks that the options describe a usable engine.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.chunk_size_bytes == 0 {
            return Err(EngineError::Config("chunk_size_bytes must be positive".into()));
        }
        if self.global_concurrency_ceiling == 0 {
            return Err(EngineError::Config(
                "global_concurrency_ceiling must be positive".into(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(EngineError::Config("event_buffer must be positive".into()));
        }
        Ok(())
    }
}
