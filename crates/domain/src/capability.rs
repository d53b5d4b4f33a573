use serde::{Deserialize, Serialize};

/// A named role a task's LLM calls are routed under (`[llm.roles]` in
/// config). The engine always calls the LLM adapter for a role, never for a
/// bare provider id, so swapping models per role never touches engine code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Planner,
    Executor,
    Summarizer,
    Embedder,
}

/// How a provider accepts tool-calling requests, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSupport {
    /// No tool-calling support; tool definitions must be folded into the prompt.
    None,
    /// Native tool-calling with loosely-validated arguments.
    Native,
    /// Native tool-calling with strict JSON-schema argument validation.
    StrictJson,
}

/// What a given provider/model combination is known to support. Adapters
/// build this once at construction time from static knowledge of the
/// provider's API, not from a runtime capability probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCapabilities {
    pub supports_tools: ToolSupport,
    pub supports_streaming: bool,
    pub supports_json_mode: bool,
    pub supports_vision: bool,
    /// Maximum context window in tokens, if known.
    pub context_window_tokens: Option<u32>,
    /// Maximum completion length in tokens, if known.
    pub max_output_tokens: Option<u32>,
}

impl LlmCapabilities {
    /// Whether the model accepts tool definitions at all.
    pub fn can_call_tools(&self) -> bool {
        !matches!(self.supports_tools, ToolSupport::None)
    }
}
