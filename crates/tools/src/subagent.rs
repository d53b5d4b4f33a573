//! The subagent tool's execution contract.
//!
//! `sa-tools` cannot depend on `sa-engine` — the engine needs the registry
//! to dispatch its own tool calls, and the subagent tool's body *is* a
//! recursive engine run. The dependency is inverted with a trait: the
//! gateway constructs both the registry and the engine, then wires an
//! implementation of [`SubagentRunner`] into the registry at startup.

use async_trait::async_trait;

/// Input to one subagent dispatch, built from the parent task's context and
/// the model-supplied tool call arguments.
#[derive(Debug, Clone)]
pub struct SubagentRequest {
    pub parent_task_id: String,
    /// The parent's session — the child shares it, per spec.md §4.5.
    pub session_id: String,
    pub task_text: String,
    /// Overrides the default iteration cap for the child task.
    pub iteration_cap: Option<u32>,
    /// Overrides the default token budget for the child task, checked the
    /// same way `iteration_cap` is.
    pub token_cap: Option<u64>,
}

/// The outcome handed back to the parent's tool-call message: a compact
/// summary plus the child task id, which doubles as the citation handle
/// into its full event stream (the parent's session already carries the
/// child's events, tagged with `parent_task_id`).
#[derive(Debug, Clone)]
pub struct SubagentOutcome {
    pub child_task_id: String,
    pub summary: String,
}

#[async_trait]
pub trait SubagentRunner: Send + Sync {
    async fn run_subagent(&self, req: SubagentRequest) -> Result<SubagentOutcome, String>;
}
