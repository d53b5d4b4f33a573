use serde::{Deserialize, Serialize};

/// Error taxonomy shared across every crate. Each variant maps to exactly one
/// HTTP status via [`Error::status_code`] and one wire code via
/// [`Error::code`], so the gateway never has to re-derive either from a
/// string message.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("llm transient: {0}")]
    LlmTransient(String),

    #[error("llm permanent: {0}")]
    LlmPermanent(String),

    #[error("tool error: {0}")]
    ToolError(String),

    #[error("tool call could not be parsed: {0}")]
    ToolParse(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timed out: {0}")]
    TimedOut(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("internal: {0}")]
    Internal(String),

    // ── Provider-adapter-layer variants ─────────────────────────────
    // Kept distinct from the taxonomy above because adapters (sa-providers)
    // need to tell a malformed request (`Http`) apart from an upstream 5xx
    // (`Provider`) apart from a credential problem (`Auth`) when deciding
    // whether to retry or fail the whole request. They still fold into the
    // taxonomy via `code()`/`status_code()` below.
    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

/// Wire-stable error code, used as the `code` field of an API error body and
/// as the discriminant carried in `error` SSE events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Conflict,
    Unauthorized,
    Forbidden,
    Busy,
    LlmTransient,
    LlmPermanent,
    ToolError,
    ToolParse,
    Cancelled,
    TimedOut,
    Internal,
}

impl Error {
    /// The taxonomy bucket this error belongs to.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Validation(_) => ErrorCode::Validation,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::Conflict(_) => ErrorCode::Conflict,
            Error::Unauthorized(_) => ErrorCode::Unauthorized,
            Error::Forbidden(_) => ErrorCode::Forbidden,
            Error::Busy(_) => ErrorCode::Busy,
            Error::LlmTransient(_) => ErrorCode::LlmTransient,
            Error::LlmPermanent(_) => ErrorCode::LlmPermanent,
            Error::ToolError(_) => ErrorCode::ToolError,
            Error::ToolParse(_) => ErrorCode::ToolParse,
            Error::Cancelled => ErrorCode::Cancelled,
            Error::TimedOut(_) => ErrorCode::TimedOut,
            Error::Io(_) | Error::Json(_) | Error::Config(_) | Error::Internal(_) => {
                ErrorCode::Internal
            }
            Error::Http(_) => ErrorCode::Validation,
            Error::Timeout(_) => ErrorCode::TimedOut,
            Error::Provider { .. } => ErrorCode::LlmTransient,
            Error::Auth(_) => ErrorCode::Unauthorized,
            Error::Other(_) => ErrorCode::Internal,
        }
    }

    /// The HTTP status this error should be reported as.
    pub fn status_code(&self) -> u16 {
        match self.code() {
            ErrorCode::Validation => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::Conflict => 409,
            ErrorCode::Busy => 429,
            ErrorCode::Cancelled => 499,
            ErrorCode::TimedOut => 504,
            ErrorCode::LlmTransient => 502,
            ErrorCode::LlmPermanent => 502,
            ErrorCode::ToolError | ErrorCode::ToolParse => 502,
            ErrorCode::Internal => 500,
        }
    }

    /// Whether retrying the same operation without intervention might
    /// succeed (transient upstream failure, not a logic error).
    pub fn is_retryable(&self) -> bool {
        matches!(self.code(), ErrorCode::LlmTransient | ErrorCode::Busy)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
