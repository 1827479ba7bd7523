//! `Run` identity and externally-visible status.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Externally-visible run status. `agentLoop` (the state machine's internal
/// sub-state) surfaces as `Running` here — watchers never see it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Waiting,
    Complete,
    Error,
    Cancelled,
}

impl RunStatus {
    /// Terminal statuses reject further executor activity.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Complete | RunStatus::Error | RunStatus::Cancelled)
    }
}

/// A run's persisted header: `{status, title, description, createdAt,
/// startedAt?, completedAt?, lastSeq}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub brain_title: String,
    pub brain_description: Option<String>,
    pub status: RunStatus,
    pub options: Value,
    pub error: Option<Value>,
    pub created_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    pub last_seq: u64,
}

impl Run {
    pub fn new(run_id: impl Into<String>, brain_title: impl Into<String>, options: Value, created_at_ms: i64) -> Self {
        Self {
            run_id: run_id.into(),
            brain_title: brain_title.into(),
            brain_description: None,
            status: RunStatus::Pending,
            options,
            error: None,
            created_at_ms,
            started_at_ms: None,
            completed_at_ms: None,
            last_seq: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: only COMPLETE/ERROR/CANCELLED are terminal.
    #[test]
    fn terminal_statuses() {
        assert!(RunStatus::Complete.is_terminal());
        assert!(RunStatus::Error.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Waiting.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
    }

    /// **Scenario**: a freshly constructed run starts PENDING with no timestamps set.
    #[test]
    fn new_run_is_pending() {
        let r = Run::new("run-1", "My Brain", serde_json::json!({}), 1000);
        assert_eq!(r.status, RunStatus::Pending);
        assert!(r.started_at_ms.is_none());
        assert!(r.completed_at_ms.is_none());
        assert_eq!(r.last_seq, 0);
    }
}
