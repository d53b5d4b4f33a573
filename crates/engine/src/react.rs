//! The bounded think -> act -> observe loop a task (or subagent) runs
//! through. One call to [`run_task`] drives a single task id from its
//! first iteration to a terminal outcome, publishing every event named in
//! the broadcaster's event table along the way.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};

use sa_domain::capability::ModelRole;
use sa_domain::error::{Error, ErrorCode};
use sa_domain::event::EventPayload;
use sa_domain::stream::{StreamEvent, Usage};
use sa_domain::task::{CancelHandle, TaskStatus};
use sa_domain::tool::{ContentPart, Message, MessageContent, MessageSource, Role, ToolCall};
use sa_domain::trace::TraceEvent;
use sa_providers::{ChatRequest, LlmRouter};
use sa_sessions::EnvelopeBuilder;
use sa_tools::ToolCtx;

use crate::services::EngineServices;

const SYSTEM_PROMPT: &str = "You are an autonomous execution agent. Work the \
task through a bounded reason-act-observe loop: think about what the task \
requires, call tools when you need information or side effects, and read \
their results before deciding the next step. Give a direct final answer as \
soon as the task is satisfied; do not call a tool you do not need.";

const TOOL_CALL_FENCE_OPEN: &str = "<<<TOOL_CALL>>>";
const TOOL_CALL_FENCE_CLOSE: &str = "<<<END_TOOL_CALL>>>";
const TASK_ANALYSIS_PREVIEW_CHARS: usize = 200;

pub struct RunTaskRequest {
    pub task_id: String,
    pub session_id: String,
    pub parent_task_id: Option<String>,
    pub task_text: String,
    pub max_iterations: u32,
    /// Optional ceiling on accumulated token usage, checked at the top of
    /// every iteration the same way `max_iterations` is. `None` means no
    /// budget beyond the iteration cap — the default for top-level tasks,
    /// which are bounded by wall-clock timeout instead.
    pub token_cap: Option<u64>,
    pub tool_preset: String,
    pub tool_concurrency: usize,
    pub cancel: CancelHandle,
}

#[derive(Debug, Clone)]
pub struct RunTaskOutcome {
    pub status: TaskStatus,
    pub result: Option<String>,
    pub usage: Usage,
    pub total_iterations: u32,
    pub terminal_reason: Option<String>,
    /// Structured taxonomy bucket for `terminal_reason`. `None` for
    /// `Succeeded`; set for every other terminal status.
    pub error_code: Option<ErrorCode>,
}

pub async fn run_task(services: Arc<EngineServices>, req: RunTaskRequest) -> RunTaskOutcome {
    let task_id = req.task_id.as_str();
    let parent = req.parent_task_id.as_deref();

    let (mut compression_summary, mut base_history) = match services.sessions.get(&req.session_id)
    {
        Some(session) => split_compression_summary(session.read().messages.clone()),
        None => (None, Vec::new()),
    };

    let system_prompt = Message::system(SYSTEM_PROMPT);
    let new_user_input = Message::user(req.task_text.clone());
    let envelope_builder = EnvelopeBuilder::new(services.context.clone(), services.compaction.trigger_ratio);
    let tool_concurrency = req.tool_concurrency.max(1);

    services.broadcaster.publish(
        task_id,
        parent,
        EventPayload::TaskAnalysis {
            summary: format!(
                "received task: {}",
                truncate(&req.task_text, TASK_ANALYSIS_PREVIEW_CHARS)
            ),
            action: None,
        },
    );

    let mut working_history: Vec<Message> = Vec::new();
    let mut total_usage = Usage::default();
    let mut iteration: u32 = 0;

    let outcome = loop {
        if req.cancel.is_cancelled() {
            break finalize(
                TaskStatus::Cancelled,
                None,
                total_usage,
                iteration,
                Some("cancelled".into()),
                Some(ErrorCode::Cancelled),
            );
        }
        if iteration >= req.max_iterations {
            services.broadcaster.publish(
                task_id,
                parent,
                EventPayload::Error {
                    message: "iteration cap reached".into(),
                    fatal: true,
                    iteration: Some(iteration),
                    phase: None,
                },
            );
            break finalize(
                TaskStatus::TimedOut,
                None,
                total_usage,
                iteration,
                Some("iteration cap reached".into()),
                Some(ErrorCode::TimedOut),
            );
        }
        if let Some(cap) = req.token_cap {
            if total_usage.total_tokens as u64 >= cap {
                services.broadcaster.publish(
                    task_id,
                    parent,
                    EventPayload::Error {
                        message: "token cap reached".into(),
                        fatal: true,
                        iteration: Some(iteration),
                        phase: None,
                    },
                );
                break finalize(
                    TaskStatus::TimedOut,
                    None,
                    total_usage,
                    iteration,
                    Some("token cap reached".into()),
                    Some(ErrorCode::TimedOut),
                );
            }
        }
        iteration += 1;
        services
            .broadcaster
            .publish(task_id, parent, EventPayload::IterationStart { iteration });

        let mut history = base_history.clone();
        history.extend(working_history.iter().cloned());

        let built = envelope_builder.build(
            &system_prompt,
            compression_summary.as_ref(),
            &history,
            &new_user_input,
            None,
        );

        let chat_req = ChatRequest {
            messages: built.messages,
            tools: services.tools.list_available(&req.tool_preset),
            temperature: None,
            max_tokens: None,
            json_mode: false,
            model: None,
        };

        if built.needs_compaction && services.compaction.auto && !base_history.is_empty() {
            let (summary, audit) = sa_sessions::compact(&req.session_id, &base_history, &services.compaction);
            if audit.turns_collapsed > 0 {
                let summary_message = summary.to_message();
                if services
                    .sessions
                    .apply_compaction(&req.session_id, audit.turns_collapsed, summary_message.clone())
                    .is_ok()
                {
                    TraceEvent::CompactionTriggered {
                        session_id: req.session_id.clone(),
                        section: audit.section.clone(),
                        pre_tokens: audit.pre_tokens,
                        post_tokens: audit.post_tokens,
                        kept_turns: audit.turns_kept_verbatim,
                    }
                    .emit();
                    base_history = base_history.split_off(audit.turns_collapsed);
                    compression_summary = Some(summary_message);
                }
            }
        }

        let think = run_iteration_llm(&services.router, &services.broadcaster, task_id, parent, iteration, chat_req)
            .await;
        let (text, mut tool_calls, usage) = match think {
            Ok(v) => v,
            Err(err) => {
                services.broadcaster.publish(
                    task_id,
                    parent,
                    EventPayload::Error {
                        message: err.to_string(),
                        fatal: true,
                        iteration: Some(iteration),
                        phase: Some("think".into()),
                    },
                );
                break finalize(
                    TaskStatus::Failed,
                    None,
                    total_usage,
                    iteration,
                    Some(err.to_string()),
                    Some(err.code()),
                );
            }
        };
        total_usage += usage.clone();

        let mut parse_failures = Vec::new();
        if tool_calls.is_empty() {
            let (parsed, failures) = parse_embedded_tool_calls(&text);
            tool_calls = parsed;
            parse_failures = failures;
        }

        services.broadcaster.publish(
            task_id,
            parent,
            EventPayload::ThinkComplete {
                iteration,
                text: text.clone(),
                tool_call_count: tool_calls.len() as u32,
            },
        );

        working_history.push(assistant_message(&text, &tool_calls));

        if !parse_failures.is_empty() {
            let observation = format!(
                "could not parse tool call: {}",
                parse_failures.join("; ")
            );
            services.broadcaster.publish(
                task_id,
                parent,
                EventPayload::Error {
                    message: observation.clone(),
                    fatal: false,
                    iteration: Some(iteration),
                    phase: Some("act".into()),
                },
            );
            working_history.push(tool_result_message("parse_error", &observation, true));
        }

        if tool_calls.is_empty() {
            services.broadcaster.publish(
                task_id,
                parent,
                EventPayload::IterationComplete { iteration, usage, tools_run: 0 },
            );
            if parse_failures.is_empty() {
                break finalize(TaskStatus::Succeeded, Some(text), total_usage, iteration, None, None);
            }
            continue;
        }

        for call in &tool_calls {
            services.broadcaster.publish(
                task_id,
                parent,
                EventPayload::ToolCallStart {
                    iteration,
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    arguments: call.arguments.clone(),
                },
            );
        }

        let stream_sink: sa_tools::StreamSink = {
            let broadcaster = services.broadcaster.clone();
            let task_id = req.task_id.clone();
            let parent = req.parent_task_id.clone();
            Arc::new(move |call_id: &str, chunk: &str| {
                broadcaster.publish(
                    &task_id,
                    parent.as_deref(),
                    EventPayload::ToolCallStream {
                        call_id: call_id.to_string(),
                        chunk: chunk.to_string(),
                    },
                );
            })
        };

        let ctx = Arc::new(ToolCtx {
            workspace_root: services.session_workspace(&req.session_id),
            process_manager: services.process_manager.clone(),
            session_id: req.session_id.clone(),
            task_id: req.task_id.clone(),
            stream_sink: Some(stream_sink),
        });

        let results = if req.cancel.is_cancelled() {
            tool_calls
                .iter()
                .map(|c| sa_domain::tool::ToolResult::err(c.call_id.clone(), "task cancelled".to_string()))
                .collect::<Vec<_>>()
        } else {
            let preset = req.tool_preset.clone();
            let dispatches = tool_calls.iter().cloned().map(|call| {
                let registry = services.tools.clone();
                let ctx = ctx.clone();
                let preset = preset.clone();
                async move {
                    let started = Instant::now();
                    let result = registry.invoke(&ctx, &preset, call.clone()).await;
                    TraceEvent::ToolDispatched {
                        task_id: ctx.task_id.clone(),
                        tool_name: call.tool_name.clone(),
                        duration_ms: started.elapsed().as_millis() as u64,
                        ok: !result.error,
                    }
                    .emit();
                    result
                }
            });
            stream::iter(dispatches).buffered(tool_concurrency).collect().await
        };

        for (call, result) in tool_calls.iter().zip(results.iter()) {
            services.broadcaster.publish(
                task_id,
                parent,
                EventPayload::ToolCallComplete {
                    call_id: result.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    is_error: result.error,
                    result: result.content.clone(),
                },
            );
            working_history.push(tool_result_message(&result.call_id, &result.content, result.error));
        }

        services.broadcaster.publish(
            task_id,
            parent,
            EventPayload::IterationComplete {
                iteration,
                usage: Usage::default(),
                tools_run: tool_calls.len() as u32,
            },
        );
    };

    let mut to_persist = vec![new_user_input];
    to_persist.extend(working_history);
    if let Err(err) = services.sessions.append(&req.session_id, to_persist) {
        tracing::warn!(session_id = %req.session_id, error = %err, "failed to persist task messages");
    }
    if outcome.usage.total_tokens > 0 {
        let _ = services
            .sessions
            .record_usage(&req.session_id, outcome.usage.total_tokens as u64);
    }

    services.broadcaster.publish(
        task_id,
        parent,
        EventPayload::TaskComplete {
            status: task_status_wire(outcome.status).to_string(),
            result: outcome.result.clone(),
            usage: outcome.usage.clone(),
            total_iterations: outcome.total_iterations,
        },
    );

    outcome
}

async fn run_iteration_llm(
    router: &LlmRouter,
    broadcaster: &sa_broadcaster::Broadcaster,
    task_id: &str,
    parent: Option<&str>,
    iteration: u32,
    req: ChatRequest,
) -> sa_domain::error::Result<(String, Vec<ToolCall>, Usage)> {
    let mut s = router.chat_stream_for_role(ModelRole::Executor, req).await?;
    let mut text = String::new();
    let mut order: Vec<String> = Vec::new();
    let mut calls: std::collections::HashMap<String, (String, serde_json::Value)> = std::collections::HashMap::new();
    let mut usage = Usage::default();

    while let Some(event) = s.next().await {
        match event? {
            StreamEvent::Token { text: delta } | StreamEvent::Thinking { text: delta } => {
                text.push_str(&delta);
                broadcaster.publish(task_id, parent, EventPayload::Thinking { iteration, delta });
            }
            StreamEvent::ToolCallStarted { call_id, tool_name } => {
                order.push(call_id.clone());
                calls.insert(call_id, (tool_name, serde_json::Value::Null));
            }
            StreamEvent::ToolCallDelta { .. } => {}
            StreamEvent::ToolCallFinished { call_id, tool_name, arguments } => {
                calls.insert(call_id, (tool_name, arguments));
            }
            StreamEvent::Done { usage: u, .. } => {
                usage = u.unwrap_or_default();
            }
            StreamEvent::Error { message } => return Err(Error::LlmTransient(message)),
        }
    }

    let tool_calls = order
        .into_iter()
        .filter_map(|id| {
            calls.remove(&id).map(|(tool_name, arguments)| ToolCall {
                call_id: id,
                tool_name,
                arguments,
            })
        })
        .collect();

    Ok((text, tool_calls, usage))
}

/// Parses `<<<TOOL_CALL>>> ... <<<END_TOOL_CALL>>>` fences out of a model's
/// raw text response. A fence that never closes, doesn't parse as JSON, or
/// is missing its `"tool"` field is not silently dropped — its description
/// is returned alongside so the caller can surface it as an observation.
fn parse_embedded_tool_calls(text: &str) -> (Vec<ToolCall>, Vec<String>) {
    let mut calls = Vec::new();
    let mut failures = Vec::new();
    let mut rest = text;
    let mut n = 0usize;
    while let Some(start) = rest.find(TOOL_CALL_FENCE_OPEN) {
        let after = &rest[start + TOOL_CALL_FENCE_OPEN.len()..];
        let Some(end) = after.find(TOOL_CALL_FENCE_CLOSE) else {
            failures.push("unterminated tool call fence".to_string());
            break;
        };
        let body = after[..end].trim();
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(value) => match value.get("tool").and_then(|v| v.as_str()) {
                Some(name) => {
                    n += 1;
                    calls.push(ToolCall {
                        call_id: format!("embedded-{n}"),
                        tool_name: name.to_string(),
                        arguments: value.get("arguments").cloned().unwrap_or(serde_json::Value::Null),
                    });
                }
                None => failures.push(format!("tool call block missing \"tool\" field: {body}")),
            },
            Err(e) => failures.push(format!("tool call block is not valid JSON: {e}")),
        }
        rest = &after[end + TOOL_CALL_FENCE_CLOSE.len()..];
    }
    (calls, failures)
}

fn assistant_message(text: &str, tool_calls: &[ToolCall]) -> Message {
    if tool_calls.is_empty() {
        return Message::assistant(text);
    }
    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(ContentPart::Text { text: text.to_string() });
    }
    for call in tool_calls {
        parts.push(ContentPart::ToolUse {
            id: call.call_id.clone(),
            name: call.tool_name.clone(),
            input: call.arguments.clone(),
        });
    }
    Message {
        role: Role::Assistant,
        content: MessageContent::Parts(parts),
        source: MessageSource::UserHistory,
        timestamp: Utc::now(),
    }
}

fn tool_result_message(call_id: &str, content: &str, is_error: bool) -> Message {
    Message {
        role: Role::Tool,
        content: MessageContent::Parts(vec![ContentPart::ToolResult {
            tool_use_id: call_id.to_string(),
            content: content.to_string(),
            is_error,
        }]),
        source: MessageSource::UserHistory,
        timestamp: Utc::now(),
    }
}

fn split_compression_summary(mut messages: Vec<Message>) -> (Option<Message>, Vec<Message>) {
    let is_summary = messages
        .first()
        .map(|m| m.source == MessageSource::CompressionSummary)
        .unwrap_or(false);
    if is_summary {
        let summary = messages.remove(0);
        (Some(summary), messages)
    } else {
        (None, messages)
    }
}

fn finalize(
    status: TaskStatus,
    result: Option<String>,
    usage: Usage,
    total_iterations: u32,
    terminal_reason: Option<String>,
    error_code: Option<ErrorCode>,
) -> RunTaskOutcome {
    RunTaskOutcome { status, result, usage, total_iterations, terminal_reason, error_code }
}

fn task_status_wire(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Succeeded => "succeeded",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
        TaskStatus::TimedOut => "timed_out",
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_tool_call_fence_parses() {
        let text = format!(
            "I'll check the file.\n{}{{\"tool\":\"file_read\",\"arguments\":{{\"path\":\"a.txt\"}}}}{}",
            TOOL_CALL_FENCE_OPEN, TOOL_CALL_FENCE_CLOSE
        );
        let (calls, failures) = parse_embedded_tool_calls(&text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "file_read");
        assert!(failures.is_empty());
    }

    #[test]
    fn no_fence_means_no_calls() {
        let (calls, failures) = parse_embedded_tool_calls("just a plain answer");
        assert!(calls.is_empty());
        assert!(failures.is_empty());
    }

    #[test]
    fn unterminated_fence_is_reported_as_a_failure_not_dropped() {
        let text = format!("{}{{\"tool\":\"file_read\"}}", TOOL_CALL_FENCE_OPEN);
        let (calls, failures) = parse_embedded_tool_calls(&text);
        assert!(calls.is_empty());
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("unterminated"));
    }

    #[test]
    fn malformed_json_in_a_fence_is_reported_as_a_failure() {
        let text = format!(
            "{}not json{}",
            TOOL_CALL_FENCE_OPEN, TOOL_CALL_FENCE_CLOSE
        );
        let (calls, failures) = parse_embedded_tool_calls(&text);
        assert!(calls.is_empty());
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("not valid JSON"));
    }

    #[test]
    fn truncate_adds_ellipsis_only_when_needed() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("0123456789abcdef", 4), "0123…");
    }

    #[test]
    fn compression_summary_is_split_from_history() {
        let summary = Message::compression_summary("summary text");
        let history = vec![summary.clone(), Message::user("hi")];
        let (split_summary, rest) = split_compression_summary(history);
        assert!(split_summary.is_some());
        assert_eq!(rest.len(), 1);
    }
}
