use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Internal tool call format (provider-agnostic).
/// Every adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
    /// Dispatch-time metadata, not sent to the model: what the tool reads,
    /// writes, and whether it is safe to run unattended. Drives preset
    /// filtering in the tool registry.
    #[serde(default)]
    pub capability: ToolCapability,
}

/// What a tool consumes/produces and how risky it is to run. Populated by
/// the registry at registration time, one record per tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCapability {
    /// Inputs this tool reads, e.g. `["filesystem"]`, `["network"]`.
    #[serde(default)]
    pub consumes: Vec<String>,
    /// Outputs this tool produces, e.g. `["filesystem"]`, `["process"]`.
    #[serde(default)]
    pub produces: Vec<String>,
    /// Whether the tool emits incremental `tool_call_stream` events while
    /// running rather than a single result at completion.
    #[serde(default)]
    pub streams: bool,
    /// Whether invoking this tool has effects outside the conversation
    /// (writes a file, runs a process, calls a remote API). Used to decide
    /// which tools a `safe`/`read-only` preset excludes.
    #[serde(default)]
    pub side_effects: bool,
}

/// The outcome of dispatching a single [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    /// Text handed back to the model as the tool's observation.
    pub content: String,
    /// Free-form structured detail (exit code, byte counts, ...), not shown
    /// to the model but available to the event stream and transcript.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Set when the tool failed; `content` still carries a human-readable
    /// explanation so the model can react to it.
    #[serde(default)]
    pub error: bool,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            metadata: serde_json::Value::Null,
            error: false,
        }
    }

    pub fn err(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            metadata: serde_json::Value::Null,
            error: true,
        }
    }
}

/// A message in the conversation (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    /// Where this message originated in the prompt envelope. Used by the
    /// context manager to decide what can be compressed or dropped under
    /// budget pressure without touching the other sections.
    #[serde(default)]
    pub source: MessageSource,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// The envelope section a message belongs to: `[system_prompt] ⊕
/// [compression_summary?] ⊕ [older messages] ⊕ [new_user_input] ⊕
/// [rag_preload]`. The context manager orders and budgets sections by this
/// tag rather than by scanning content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    #[default]
    SystemPrompt,
    UserHistory,
    RagPreload,
    CompressionSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(rename = "image")]
    Image {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
            source: MessageSource::SystemPrompt,
            timestamp: Utc::now(),
        }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            source: MessageSource::UserHistory,
            timestamp: Utc::now(),
        }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            source: MessageSource::UserHistory,
            timestamp: Utc::now(),
        }
    }
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![ContentPart::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error: false,
            }]),
            source: MessageSource::UserHistory,
            timestamp: Utc::now(),
        }
    }
    /// A RAG preload message, injected ahead of `new_user_input` in the
    /// envelope but never subject to compression.
    pub fn rag_preload(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
            source: MessageSource::RagPreload,
            timestamp: Utc::now(),
        }
    }
    /// A synthesized summary standing in for compacted older turns.
    pub fn compression_summary(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
            source: MessageSource::CompressionSummary,
            timestamp: Utc::now(),
        }
    }
}

impl MessageContent {
    /// Extract the plain-text content (first text part, or the full text).
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// Extract and join all text content, returning an owned String.
    ///
    /// For `Text` variant, returns the string directly.
    /// For `Parts` variant, joins all `Text` parts with `"\n"`.
    /// Non-text parts (ToolUse, ToolResult, Image) are skipped.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_all_text_from_text_variant() {
        let content = MessageContent::Text("hello world".into());
        assert_eq!(content.extract_all_text(), "hello world");
    }

    #[test]
    fn extract_all_text_from_parts_joins_with_newline() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text { text: "line one".into() },
            ContentPart::ToolUse {
                id: "c1".into(),
                name: "exec".into(),
                input: serde_json::json!({}),
            },
            ContentPart::Text { text: "line two".into() },
        ]);
        assert_eq!(content.extract_all_text(), "line one\nline two");
    }

    #[test]
    fn extract_all_text_empty_parts() {
        let content = MessageContent::Parts(vec![]);
        assert_eq!(content.extract_all_text(), "");
    }
}
