//! Tool Registry & Dispatch: name -> `ToolDefinition` lookup with capability
//! metadata, preset filtering, and the `invoke(ctx, ToolCall) -> ToolResult`
//! contract the engine drives tool calls through.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use sa_domain::tool::{ToolCall, ToolCapability, ToolDefinition, ToolResult};

use crate::exec::{self, ExecRequest};
use crate::file_ops::{
    self, FileAppendRequest, FileDeleteRequest, FileListRequest, FileMoveRequest,
    FileReadRequest, FileWriteRequest,
};
use crate::manager::ProcessManager;
use crate::process::{self, ProcessRequest};
use crate::subagent::{SubagentRequest, SubagentRunner};

/// Called with `(call_id, chunk)` as a streaming-capable tool produces
/// incremental output, so the engine can forward it as a `tool_call_stream`
/// event without the registry knowing anything about the broadcaster.
pub type StreamSink = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Runtime context passed to every dispatch: the workspace root file tools
/// are constrained to and the process manager background exec/process
/// tools dispatch through.
pub struct ToolCtx {
    pub workspace_root: PathBuf,
    pub process_manager: Arc<ProcessManager>,
    pub session_id: String,
    pub task_id: String,
    /// Sink for incremental output from tools whose `ToolCapability::streams`
    /// is set. `None` when nothing is listening (e.g. tests, or a subagent
    /// run that doesn't wire one up).
    pub stream_sink: Option<StreamSink>,
}

/// A preset policy, parsed from the string carried on a task (`full`,
/// `safe`, `read-only`, `web`, `cli`, or a comma-separated explicit list).
#[derive(Debug, Clone)]
pub enum Preset {
    Full,
    Safe,
    ReadOnly,
    Web,
    Cli,
    Named(Vec<String>),
}

impl Preset {
    pub fn parse(s: &str) -> Self {
        match s {
            "full" => Preset::Full,
            "safe" => Preset::Safe,
            "read-only" | "read_only" => Preset::ReadOnly,
            "web" => Preset::Web,
            "cli" => Preset::Cli,
            other => Preset::Named(
                other
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
        }
    }

    fn allows(&self, def: &ToolDefinition) -> bool {
        match self {
            Preset::Full => true,
            Preset::ReadOnly => !def.capability.side_effects,
            Preset::Safe => def.name != "exec" && def.name != "process",
            Preset::Cli => matches!(def.name.as_str(), "exec" | "process" | "subagent"),
            Preset::Web => def.capability.consumes.iter().any(|c| c == "network")
                || def.capability.produces.iter().any(|c| c == "network"),
            Preset::Named(names) => names.iter().any(|n| n == &def.name),
        }
    }
}

fn builtin_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "exec".into(),
            description: "Run a shell command, in the foreground or auto-backgrounded after a yield timeout.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "background": {"type": "boolean"},
                    "yield_ms": {"type": "integer"},
                    "timeout_sec": {"type": "integer"},
                    "workdir": {"type": "string"},
                },
                "required": ["command"],
            }),
            capability: ToolCapability {
                consumes: vec!["process".into()],
                produces: vec!["process".into()],
                streams: true,
                side_effects: true,
            },
        },
        ToolDefinition {
            name: "process".into(),
            description: "Manage background process sessions started by exec (list/poll/log/write/kill/clear/remove).".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["list","poll","log","write","kill","clear","remove"]},
                    "session_id": {"type": "string"},
                },
                "required": ["action"],
            }),
            capability: ToolCapability {
                consumes: vec!["process".into()],
                produces: vec!["process".into()],
                streams: false,
                side_effects: true,
            },
        },
        ToolDefinition {
            name: "file_read".into(),
            description: "Read a file within the task's workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}, "offset": {"type": "integer"}, "limit": {"type": "integer"}},
                "required": ["path"],
            }),
            capability: ToolCapability {
                consumes: vec!["filesystem".into()],
                produces: vec![],
                streams: false,
                side_effects: false,
            },
        },
        ToolDefinition {
            name: "file_list".into(),
            description: "List a directory within the task's workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
            }),
            capability: ToolCapability {
                consumes: vec!["filesystem".into()],
                produces: vec![],
                streams: false,
                side_effects: false,
            },
        },
        ToolDefinition {
            name: "file_write".into(),
            description: "Write (overwrite) a file within the task's workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
                "required": ["path", "content"],
            }),
            capability: ToolCapability {
                consumes: vec![],
                produces: vec!["filesystem".into()],
                streams: false,
                side_effects: true,
            },
        },
        ToolDefinition {
            name: "file_append".into(),
            description: "Append to a file within the task's workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
                "required": ["path", "content"],
            }),
            capability: ToolCapability {
                consumes: vec![],
                produces: vec!["filesystem".into()],
                streams: false,
                side_effects: true,
            },
        },
        ToolDefinition {
            name: "file_move".into(),
            description: "Move or rename a file within the task's workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"source": {"type": "string"}, "destination": {"type": "string"}},
                "required": ["source", "destination"],
            }),
            capability: ToolCapability {
                consumes: vec!["filesystem".into()],
                produces: vec!["filesystem".into()],
                streams: false,
                side_effects: true,
            },
        },
        ToolDefinition {
            name: "file_delete".into(),
            description: "Delete a file within the task's workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"],
            }),
            capability: ToolCapability {
                consumes: vec!["filesystem".into()],
                produces: vec![],
                streams: false,
                side_effects: true,
            },
        },
        ToolDefinition {
            name: "subagent".into(),
            description: "Dispatch a recursive sub-task sharing this task's session, returning a compact summary.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "task": {"type": "string"},
                    "iteration_cap": {"type": "integer"},
                    "token_cap": {"type": "integer"},
                },
                "required": ["task"],
            }),
            capability: ToolCapability {
                consumes: vec![],
                produces: vec![],
                streams: false,
                side_effects: true,
            },
        },
    ]
}

/// Owns every built-in tool definition and dispatches invocations against
/// them. One instance is shared across the gateway.
pub struct ToolRegistry {
    definitions: HashMap<String, ToolDefinition>,
    /// Behind a lock rather than taken by `&mut self`: the gateway needs to
    /// construct the registry, hand an `Arc` of it to `EngineServices`, and
    /// only then build the runner (which itself closes over that same
    /// `Arc<EngineServices>`). A `&mut` setter would make that cycle
    /// impossible to wire up.
    subagent_runner: parking_lot::RwLock<Option<Arc<dyn SubagentRunner>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let definitions = builtin_definitions()
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        Self {
            definitions,
            subagent_runner: parking_lot::RwLock::new(None),
        }
    }

    /// Wire the subagent tool's execution. `sa-tools` cannot depend on
    /// `sa-engine` directly (the engine is the subagent's implementation and
    /// depends on the registry to dispatch its *own* tool calls), so the
    /// runner is injected by whichever crate constructs both — the gateway.
    /// Takes `&self` so it can be called after the registry is already
    /// behind an `Arc` shared with the runner's own dependencies.
    pub fn set_subagent_runner(&self, runner: Arc<dyn SubagentRunner>) {
        *self.subagent_runner.write() = Some(runner);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.definitions.get(name)
    }

    /// Every definition allowed under `preset`, for building the tool list
    /// sent to the LLM.
    pub fn list_available(&self, preset: &str) -> Vec<ToolDefinition> {
        let policy = Preset::parse(preset);
        self.definitions
            .values()
            .filter(|d| policy.allows(d))
            .cloned()
            .collect()
    }

    pub fn is_allowed(&self, preset: &str, name: &str) -> bool {
        match self.definitions.get(name) {
            Some(def) => Preset::parse(preset).allows(def),
            None => false,
        }
    }

    /// Dispatch one tool call. Calls against an unknown or preset-excluded
    /// tool never execute — they produce a synthetic observation instead.
    pub async fn invoke(&self, ctx: &ToolCtx, preset: &str, call: ToolCall) -> ToolResult {
        let Some(def) = self.definitions.get(&call.tool_name) else {
            return ToolResult::err(
                call.call_id,
                format!("tool {} not available", call.tool_name),
            );
        };
        if !Preset::parse(preset).allows(def) {
            return ToolResult::err(
                call.call_id,
                format!("tool {} not available", call.tool_name),
            );
        }

        match call.tool_name.as_str() {
            "exec" => self.invoke_exec(ctx, call).await,
            "process" => self.invoke_process(ctx, call).await,
            "file_read" => self.invoke_file_read(ctx, call).await,
            "file_list" => self.invoke_file_list(ctx, call).await,
            "file_write" => self.invoke_file_write(ctx, call).await,
            "file_append" => self.invoke_file_append(ctx, call).await,
            "file_move" => self.invoke_file_move(ctx, call).await,
            "file_delete" => self.invoke_file_delete(ctx, call).await,
            "subagent" => self.invoke_subagent(ctx, call).await,
            other => ToolResult::err(call.call_id, format!("tool {other} has no dispatcher")),
        }
    }

    async fn invoke_exec(&self, ctx: &ToolCtx, call: ToolCall) -> ToolResult {
        let req: ExecRequest = match parse_args(&call.arguments) {
            Ok(r) => r,
            Err(e) => return bad_args(call.call_id, e),
        };
        let sink = ctx
            .stream_sink
            .clone()
            .map(|sink| (sink, call.call_id.clone()));
        let resp = exec::exec(&ctx.process_manager, req, sink).await;
        to_result(call.call_id, &resp, false)
    }

    async fn invoke_process(&self, ctx: &ToolCtx, call: ToolCall) -> ToolResult {
        let req: ProcessRequest = match parse_args(&call.arguments) {
            Ok(r) => r,
            Err(e) => return bad_args(call.call_id, e),
        };
        let resp = process::handle_process(&ctx.process_manager, req).await;
        let is_error = !resp.success;
        to_result(call.call_id, &resp, is_error)
    }

    async fn invoke_file_read(&self, ctx: &ToolCtx, call: ToolCall) -> ToolResult {
        let req: FileReadRequest = match parse_args(&call.arguments) {
            Ok(r) => r,
            Err(e) => return bad_args(call.call_id, e),
        };
        match file_ops::file_read(&ctx.workspace_root, req).await {
            Ok(v) => to_result(call.call_id, &v, false),
            Err(e) => ToolResult::err(call.call_id, e),
        }
    }

    async fn invoke_file_list(&self, ctx: &ToolCtx, call: ToolCall) -> ToolResult {
        let req: FileListRequest = match parse_args(&call.arguments) {
            Ok(r) => r,
            Err(e) => return bad_args(call.call_id, e),
        };
        match file_ops::file_list(&ctx.workspace_root, req).await {
            Ok(v) => to_result(call.call_id, &v, false),
            Err(e) => ToolResult::err(call.call_id, e),
        }
    }

    async fn invoke_file_write(&self, ctx: &ToolCtx, call: ToolCall) -> ToolResult {
        let req: FileWriteRequest = match parse_args(&call.arguments) {
            Ok(r) => r,
            Err(e) => return bad_args(call.call_id, e),
        };
        match file_ops::file_write(&ctx.workspace_root, req).await {
            Ok(v) => to_result(call.call_id, &v, false),
            Err(e) => ToolResult::err(call.call_id, e),
        }
    }

    async fn invoke_file_append(&self, ctx: &ToolCtx, call: ToolCall) -> ToolResult {
        let req: FileAppendRequest = match parse_args(&call.arguments) {
            Ok(r) => r,
            Err(e) => return bad_args(call.call_id, e),
        };
        match file_ops::file_append(&ctx.workspace_root, req).await {
            Ok(v) => to_result(call.call_id, &v, false),
            Err(e) => ToolResult::err(call.call_id, e),
        }
    }

    async fn invoke_file_move(&self, ctx: &ToolCtx, call: ToolCall) -> ToolResult {
        let req: FileMoveRequest = match parse_args(&call.arguments) {
            Ok(r) => r,
            Err(e) => return bad_args(call.call_id, e),
        };
        match file_ops::file_move(&ctx.workspace_root, req).await {
            Ok(v) => to_result(call.call_id, &v, false),
            Err(e) => ToolResult::err(call.call_id, e),
        }
    }

    async fn invoke_file_delete(&self, ctx: &ToolCtx, call: ToolCall) -> ToolResult {
        let req: FileDeleteRequest = match parse_args(&call.arguments) {
            Ok(r) => r,
            Err(e) => return bad_args(call.call_id, e),
        };
        match file_ops::file_delete(&ctx.workspace_root, req).await {
            Ok(v) => to_result(call.call_id, &v, false),
            Err(e) => ToolResult::err(call.call_id, e),
        }
    }

    async fn invoke_subagent(&self, ctx: &ToolCtx, call: ToolCall) -> ToolResult {
        let Some(runner) = self.subagent_runner.read().clone() else {
            return ToolResult::err(call.call_id, "subagent dispatch is not configured");
        };
        let task: String = match call.arguments.get("task").and_then(Value::as_str) {
            Some(t) => t.to_string(),
            None => return bad_args(call.call_id, "missing \"task\" argument".into()),
        };
        let iteration_cap = call
            .arguments
            .get("iteration_cap")
            .and_then(Value::as_u64)
            .map(|v| v as u32);
        let token_cap = call.arguments.get("token_cap").and_then(Value::as_u64);

        let req = SubagentRequest {
            parent_task_id: ctx.task_id.clone(),
            session_id: ctx.session_id.clone(),
            task_text: task,
            iteration_cap,
            token_cap,
        };
        match runner.run_subagent(req).await {
            Ok(outcome) => ToolResult::ok(
                call.call_id,
                format!(
                    "[subagent task={}] {}",
                    outcome.child_task_id, outcome.summary
                ),
            ),
            Err(e) => ToolResult::err(call.call_id, e),
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, String> {
    serde_json::from_value(args.clone()).map_err(|e| format!("invalid arguments: {e}"))
}

fn bad_args(call_id: String, message: String) -> ToolResult {
    ToolResult::err(call_id, message)
}

fn to_result(call_id: String, value: &impl serde::Serialize, error: bool) -> ToolResult {
    let json = serde_json::to_value(value).unwrap_or(Value::Null);
    let content = serde_json::to_string(&json).unwrap_or_default();
    ToolResult {
        call_id,
        content,
        metadata: json,
        error,
    }
}
