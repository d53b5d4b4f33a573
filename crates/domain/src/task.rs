use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::stream::Usage;

/// Lifecycle state of a task. Transitions are monotonic: once a task leaves
/// `Pending` it never returns to it, and once it reaches a terminal state
/// (`Succeeded`, `Failed`, `Cancelled`, `TimedOut`) it never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::TimedOut
        )
    }

    /// Whether `self -> next` is a legal transition under the monotonic
    /// pending -> running -> terminal state machine.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => matches!(next, TaskStatus::Running) || next.is_terminal(),
            TaskStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// A single record of a dispatched task: its execution context, progress
/// counters, and terminal outcome once it finishes. The record is detached
/// from the HTTP request that created it — the task keeps running even if
/// the originating connection drops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub session_id: String,
    /// Set when this task is a subagent dispatched by another task, sharing
    /// its session. `None` for a top-level task submitted via the API.
    #[serde(default)]
    pub parent_task_id: Option<String>,
    pub status: TaskStatus,
    /// Identity of whoever submitted this task, when auth middleware
    /// validated a bearer token for the request. `None` when auth is
    /// disabled or the task is a subagent dispatched internally.
    #[serde(default)]
    pub principal: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Completed ReAct iterations so far.
    #[serde(default)]
    pub iteration: u32,
    pub max_iterations: u32,
    /// Accumulated token usage across every LLM call this task has made.
    #[serde(default)]
    pub usage: Usage,
    /// Final answer text, set when status becomes `Succeeded`.
    #[serde(default)]
    pub result: Option<String>,
    /// Human-readable reason the task left the running state, set for every
    /// terminal status (error message, cancellation reason, or timeout note).
    #[serde(default)]
    pub terminal_reason: Option<String>,
    /// Structured taxonomy bucket for `terminal_reason`, set whenever the
    /// task ends in a non-`Succeeded` terminal status. `TaskView` reports
    /// this as the API's `error.kind`, not the task status string.
    #[serde(default)]
    pub error_code: Option<ErrorCode>,
}

impl Task {
    pub fn new(task_id: impl Into<String>, session_id: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            task_id: task_id.into(),
            session_id: session_id.into(),
            parent_task_id: None,
            status: TaskStatus::Pending,
            principal: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            iteration: 0,
            max_iterations,
            usage: Usage::default(),
            result: None,
            terminal_reason: None,
            error_code: None,
        }
    }

    /// Mark this task as a subagent dispatched on behalf of `parent`.
    pub fn with_parent(mut self, parent_task_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_task_id.into());
        self
    }

    /// Attempt the transition, returning `false` (no-op) if it would violate
    /// the monotonic state machine.
    pub fn transition(&mut self, next: TaskStatus, reason: Option<String>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        if next == TaskStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
            self.terminal_reason = reason;
        }
        self.status = next;
        true
    }
}

/// A shared, cooperative cancellation flag for a running task. Cloning shares
/// the same underlying flag; setting it from any clone is visible to all.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_only_go_to_running_or_terminal() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn running_can_only_go_to_terminal() {
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Succeeded));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::TimedOut));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn terminal_states_never_transition() {
        for terminal in [
            TaskStatus::Succeeded,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
            TaskStatus::TimedOut,
        ] {
            assert!(!terminal.can_transition_to(TaskStatus::Running));
        }
    }

    #[test]
    fn task_transition_sets_timestamps() {
        let mut task = Task::new("t1", "s1", 25);
        assert!(task.started_at.is_none());
        assert!(task.transition(TaskStatus::Running, None));
        assert!(task.started_at.is_some());
        assert!(task.transition(TaskStatus::Succeeded, None));
        assert!(task.finished_at.is_some());
        assert_eq!(task.status, TaskStatus::Succeeded);
    }

    #[test]
    fn task_illegal_transition_is_noop() {
        let mut task = Task::new("t1", "s1", 25);
        assert!(!task.transition(TaskStatus::Succeeded, None));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn cancel_handle_is_shared_across_clones() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_cancelled());
        handle.cancel();
        assert!(clone.is_cancelled());
    }
}
