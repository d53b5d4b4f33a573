//! Wires the `subagent` tool's dispatch contract to a recursive engine run.
//! Kept in its own module, separate from `sa-tools`, so that crate does not
//! need to depend on `sa-engine` (which already depends on `sa-tools`) —
//! the dependency points one way only.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use sa_domain::task::CancelHandle;
use sa_domain::trace::TraceEvent;
use sa_tools::{SubagentOutcome, SubagentRequest, SubagentRunner};

use crate::cancel::CancelMap;
use crate::react::{run_task, RunTaskRequest};
use crate::services::EngineServices;

const DEFAULT_SUBAGENT_ITERATION_CAP: u32 = 10;
const SUBAGENT_TOOL_PRESET: &str = "safe";
const SUBAGENT_TOOL_CONCURRENCY: usize = 4;
const SUBAGENT_SUMMARY_CHARS: usize = 600;

/// Implements [`SubagentRunner`] by recursively invoking [`run_task`] under
/// a freshly minted task id, sharing the parent's session so the child's
/// messages land in the same conversation.
pub struct EngineSubagentRunner {
    services: Arc<EngineServices>,
    cancels: Arc<CancelMap>,
}

impl EngineSubagentRunner {
    pub fn new(services: Arc<EngineServices>, cancels: Arc<CancelMap>) -> Self {
        Self { services, cancels }
    }
}

#[async_trait]
impl SubagentRunner for EngineSubagentRunner {
    async fn run_subagent(&self, req: SubagentRequest) -> Result<SubagentOutcome, String> {
        let child_task_id = format!("sub-{}", Uuid::new_v4());
        let cancel: CancelHandle = self.cancels.register(&child_task_id);
        self.services.broadcaster.register_task(&child_task_id, &req.session_id);

        TraceEvent::SubagentSpawned {
            parent_task_id: req.parent_task_id.clone(),
            child_task_id: child_task_id.clone(),
            session_id: req.session_id.clone(),
        }
        .emit();

        let outcome = run_task(
            self.services.clone(),
            RunTaskRequest {
                task_id: child_task_id.clone(),
                session_id: req.session_id,
                parent_task_id: Some(req.parent_task_id),
                task_text: req.task_text,
                max_iterations: req.iteration_cap.unwrap_or(DEFAULT_SUBAGENT_ITERATION_CAP),
                token_cap: req.token_cap,
                tool_preset: SUBAGENT_TOOL_PRESET.to_string(),
                tool_concurrency: SUBAGENT_TOOL_CONCURRENCY,
                cancel,
            },
        )
        .await;

        self.services.broadcaster.unregister_task(&child_task_id);
        self.cancels.remove(&child_task_id);

        let summary = outcome.result.unwrap_or_else(|| {
            outcome
                .terminal_reason
                .unwrap_or_else(|| "subagent produced no result".to_string())
        });

        Ok(SubagentOutcome {
            child_task_id,
            summary: truncate(&summary, SUBAGENT_SUMMARY_CHARS),
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}
