//! Built-in tools for the agent execution platform.
//!
//! Implements the exec/process tool pair and workspace-constrained file
//! operations, and the registry that filters them by preset and dispatches
//! `ToolCall`s against them.

pub mod exec;
pub mod file_ops;
pub mod manager;
pub mod process;
pub mod registry;
pub mod subagent;

pub use manager::ProcessManager;
pub use registry::{Preset, StreamSink, ToolCtx, ToolRegistry};
pub use subagent::{SubagentOutcome, SubagentRequest, SubagentRunner};
