//! Per-agent lifecycle records owned by the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an agent task. Transitions are monotonic:
/// `Queued -> Running -> (Completed | Failed | TimedOut)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl AgentStatus {
    /// Whether this status is terminal. Terminal states are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::TimedOut
        )
    }
}

/// One agent task's lifecycle record for a single scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRun {
    pub id: Uuid,
    pub agent_id: String,
    pub status: AgentStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub finding_count: Option<usize>,
    pub error: Option<String>,
}

impl AgentRun {
    /// Create a queued record for `agent_id`.
    pub fn queued(agent_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            status: AgentStatus::Queued,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            finding_count: None,
            error: None,
        }
    }

    /// Mark the task as running. No-op once terminal.
    pub fn start(&mut self) {
        if self.status == AgentStatus::Queued {
            self.status = AgentStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }

    /// Settle into a terminal state. No-op if already terminal.
    pub fn finish(
        &mut self,
        status: AgentStatus,
        finding_count: Option<usize>,
        error: Option<String>,
    ) {
        debug_assert!(status.is_terminal(), "finish requires a terminal status");
        if self.status.is_terminal() {
            return;
        }
        let completed = Utc::now();
        self.duration_ms = self
            .started_at
            .map(|s| (completed - s).num_milliseconds().max(0) as u64);
        self.status = status;
        self.completed_at = Some(completed);
        self.finding_count = finding_count;
        self.error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_is_monotonic() {
        let mut run = AgentRun::queued("account-validation");
        assert_eq!(run.status, AgentStatus::Queued);

        run.start();
        assert_eq!(run.status, AgentStatus::Running);
        assert!(run.started_at.is_some());

        run.finish(AgentStatus::Completed, Some(3), None);
        assert_eq!(run.status, AgentStatus::Completed);
        assert_eq!(run.finding_count, Some(3));
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn terminal_states_are_immutable() {
        let mut run = AgentRun::queued("cpi-safety");
        run.start();
        run.finish(AgentStatus::TimedOut, None, None);

        run.start();
        assert_eq!(run.status, AgentStatus::TimedOut);

        run.finish(AgentStatus::Completed, Some(1), None);
        assert_eq!(run.status, AgentStatus::TimedOut);
        assert_eq!(run.finding_count, None);
    }

    #[test]
    fn failed_run_records_error() {
        let mut run = AgentRun::queued("pda-seeds");
        run.start();
        run.finish(
            AgentStatus::Failed,
            None,
            Some("scanner panicked".to_string()),
        );
        assert_eq!(run.status, AgentStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("scanner panicked"));
    }

    #[test]
    fn status_serde_snake_case() {
        let json = serde_json::to_string(&AgentStatus::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
    }
}
