use serde::{Deserialize, Serialize};

/// Lifecycle state of one file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// Created, not yet processed.
    #[default]
    None,
    /// Hashing, chunk planning, or the dedup check is running.
    Processing,
    /// Chunks are pending dispatch or in flight (or the merge is running).
    Uploading,
    /// Halted by the caller; remaining chunks are retained.
    Paused,
    /// All chunks acknowledged and merged, or the server already had the file.
    Finished,
    /// Halted after the retry budget was exceeded; remaining chunks are retained.
    Interrupted,
    /// Unrecoverable failure.
    Failed,
}

impl TransferState {
    /// Returns `true` for states that count against the concurrency share.
    pub fn is_active(self) -> bool {
        matches!(self, TransferState::Processing | TransferState::Uploading)
    }

    /// Returns `true` once no further transition can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Finished | TransferState::Failed)
    }

    /// Returns `true` if a resume action is accepted in this state.
    pub fn is_resumable(self) -> bool {
        matches!(self, TransferState::Paused | TransferState::Interrupted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferState::None => "none",
            TransferState::Processing => "processing",
            TransferState::Uploading => "uploading",
            TransferState::Paused => "paused",
            TransferState::Finished => "finished",
            TransferState::Interrupted => "interrupted",
            TransferState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of a task, as handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub task_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub state: TransferState,
    pub progress_percent: f64,
    pub completed_chunks: u32,
    pub total_chunks: u32,
    pub error_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Computes `completed / total * 100`, rounded to two decimals.
///
/// Returns 0 when `total` is zero.
pub fn progress_percent(completed: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = f64::from(completed) / f64::from(total) * 100.0;
    (raw * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_wire_names() {
        let json = serde_json::to_string(&TransferState::Interrupted).unwrap();
        assert_eq!(json, "\"interrupted\"");
        let parsed: TransferState = serde_json::from_str("\"uploading\"").unwrap();
        assert_eq!(parsed, TransferState::Uploading);
    }

    #[test]
    fn state_classification() {
        assert!(TransferState::Processing.is_active());
        assert!(TransferState::Uploading.is_active());
        assert!(!TransferState::Paused.is_active());
        assert!(TransferState::Finished.is_terminal());
        assert!(TransferState::Failed.is_terminal());
        assert!(!TransferState::Interrupted.is_terminal());
        assert!(TransferState::Interrupted.is_resumable());
        assert!(!TransferState::Uploading.is_resumable());
    }

    #[test]
    fn progress_rounds_to_two_decimals() {
        assert_eq!(progress_percent(1, 3), 33.33);
        assert_eq!(progress_percent(2, 3), 66.67);
        assert_eq!(progress_percent(5, 5), 100.0);
        assert_eq!(progress_percent(0, 0), 0.0);
    }

    #[test]
    fn snapshot_field_names() {
        let snap = TaskSnapshot {
            task_id: "t1".into(),
            file_name: "a.bin".into(),
            file_size: 10,
            state: TransferState::Paused,
            progress_percent: 40.0,
            completed_chunks: 2,
            total_chunks: 5,
            error_count: 0,
            last_error: None,
        };
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["taskId"], "t1");
        assert_eq!(json["progressPercent"], 40.0);
        assert_eq!(json["state"], "paused");
        assert!(json.get("lastError").is_none());
    }
}
