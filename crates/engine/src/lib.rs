//! ReAct Execution Engine: the think/act/observe loop that drives every
//! task (and every subagent, recursively) to completion, cooperative
//! cancellation, and termination policy.

pub mod cancel;
pub mod react;
pub mod services;
pub mod subagent;

pub use cancel::CancelMap;
pub use react::{run_task, RunTaskOutcome, RunTaskRequest};
pub use services::EngineServices;
pub use subagent::EngineSubagentRunner;
