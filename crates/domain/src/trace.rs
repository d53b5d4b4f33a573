use serde::Serialize;

/// Structured trace events emitted across the agent execution platform's
/// crates, independent of the per-task SSE event stream (`event::Event`).
/// These are diagnostic/operational signals logged via `tracing`, not
/// client-facing progress.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    EnvelopeBuilt {
        session_id: String,
        system_tokens: usize,
        dynamic_tokens: usize,
        meta_tokens: usize,
        messages_included: usize,
        messages_dropped: usize,
    },
    CompactionTriggered {
        session_id: String,
        section: String,
        pre_tokens: usize,
        post_tokens: usize,
        kept_turns: usize,
    },
    SessionCreated {
        session_id: String,
    },
    SessionDeleted {
        session_id: String,
    },
    WalFlushed {
        session_id: String,
        records: usize,
        duration_ms: u64,
    },
    LlmRequest {
        provider: String,
        model: String,
        role: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    LlmFallback {
        from_provider: String,
        from_model: String,
        to_provider: String,
        to_model: String,
        reason: String,
    },
    ToolDispatched {
        task_id: String,
        tool_name: String,
        duration_ms: u64,
        ok: bool,
    },
    SubagentSpawned {
        parent_task_id: String,
        child_task_id: String,
        session_id: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sa_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_tag() {
        let ev = TraceEvent::SessionCreated {
            session_id: "s1".into(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"event\":\"SessionCreated\""));
        assert!(json.contains("\"session_id\":\"s1\""));
    }
}
