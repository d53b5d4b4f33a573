use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stream::Usage;

/// The payload of a single execution event, one variant per stage of the
/// ReAct loop the event broadcaster can publish. `kind()` returns the wire
/// name used as the SSE `event:` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    /// Emitted once, before the first iteration, summarizing the task as the
    /// engine understood it.
    TaskAnalysis {
        summary: String,
        /// The action the engine decided to take, e.g. `"respond"`,
        /// `"delegate"`, `"tool_plan"`. Informational only.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
    },
    /// A new ReAct iteration has begun.
    IterationStart { iteration: u32 },
    /// The model is reasoning; `delta` is an incremental text chunk.
    Thinking { iteration: u32, delta: String },
    /// The model finished reasoning for this iteration.
    ThinkComplete {
        iteration: u32,
        text: String,
        /// How many tool calls the model asked for this iteration.
        #[serde(default)]
        tool_call_count: u32,
    },
    /// A tool call was dispatched.
    ToolCallStart {
        iteration: u32,
        call_id: String,
        tool_name: String,
        arguments: Value,
    },
    /// Incremental output from a running tool call.
    ToolCallStream {
        call_id: String,
        chunk: String,
    },
    /// A tool call finished (successfully or not).
    ToolCallComplete {
        call_id: String,
        tool_name: String,
        #[serde(default)]
        is_error: bool,
        result: String,
    },
    /// An iteration finished: all of its tool calls have been observed.
    IterationComplete {
        iteration: u32,
        usage: Usage,
        /// Number of tool calls observed in this iteration.
        #[serde(default)]
        tools_run: u32,
    },
    /// The task reached a terminal state.
    TaskComplete {
        status: String,
        #[serde(default)]
        result: Option<String>,
        usage: Usage,
        #[serde(default)]
        total_iterations: u32,
    },
    /// Something went wrong; the task may or may not continue.
    Error {
        message: String,
        fatal: bool,
        /// Iteration in progress when the error occurred, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        iteration: Option<u32>,
        /// Which phase of the loop raised it (`"think"`, `"act"`, `"observe"`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<String>,
    },
}

impl EventPayload {
    /// The SSE `event:` field / wire discriminant for this payload.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::TaskAnalysis { .. } => "task_analysis",
            EventPayload::IterationStart { .. } => "iteration_start",
            EventPayload::Thinking { .. } => "thinking",
            EventPayload::ThinkComplete { .. } => "think_complete",
            EventPayload::ToolCallStart { .. } => "tool_call_start",
            EventPayload::ToolCallStream { .. } => "tool_call_stream",
            EventPayload::ToolCallComplete { .. } => "tool_call_complete",
            EventPayload::IterationComplete { .. } => "iteration_complete",
            EventPayload::TaskComplete { .. } => "task_complete",
            EventPayload::Error { .. } => "error",
        }
    }
}

/// A single event on a session's stream: the payload plus the envelope
/// metadata (sequence number, task, timestamp) a subscriber needs to
/// reconstruct ordering and support resumable reconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonically increasing per-session sequence number. Used as the
    /// SSE `id:` field and as the `Last-Event-ID` replay cursor.
    pub seq: u64,
    pub session_id: String,
    pub task_id: String,
    /// Set when `task_id` is a subagent, so a single session stream can
    /// distinguish nested task executions from the top-level one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(
        seq: u64,
        session_id: impl Into<String>,
        task_id: impl Into<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            seq,
            session_id: session_id.into(),
            task_id: task_id.into(),
            parent_task_id: None,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn with_parent(mut self, parent_task_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_task_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let payload = EventPayload::IterationStart { iteration: 1 };
        assert_eq!(payload.kind(), "iteration_start");
    }

    #[test]
    fn event_serializes_with_tagged_payload() {
        let event = Event::new(
            1,
            "s1",
            "t1",
            EventPayload::Error {
                message: "boom".into(),
                fatal: true,
                iteration: Some(2),
                phase: Some("act".into()),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["kind"], "error");
        assert_eq!(json["payload"]["message"], "boom");
        assert_eq!(json["payload"]["phase"], "act");
    }

    #[test]
    fn parent_task_id_omitted_when_absent() {
        let event = Event::new(1, "s1", "t1", EventPayload::IterationStart { iteration: 0 });
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("parent_task_id").is_none());
    }
}
