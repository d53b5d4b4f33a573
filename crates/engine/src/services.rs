//! Shared services one execution engine instance drives every task
//! through — top-level and subagent alike. Constructed once at startup by
//! the gateway and handed around as `Arc<EngineServices>`.

use std::path::PathBuf;
use std::sync::Arc;

use sa_broadcaster::Broadcaster;
use sa_domain::config::{CompactionConfig, ContextConfig};
use sa_providers::LlmRouter;
use sa_sessions::SessionStore;
use sa_tools::{ProcessManager, ToolRegistry};

pub struct EngineServices {
    pub sessions: Arc<SessionStore>,
    pub broadcaster: Arc<Broadcaster>,
    pub tools: Arc<ToolRegistry>,
    pub router: Arc<LlmRouter>,
    pub process_manager: Arc<ProcessManager>,
    pub context: ContextConfig,
    pub compaction: CompactionConfig,
    /// Root directory file tools are sandboxed under. Each session gets its
    /// own subdirectory: `workspace_root.join(session_id)`.
    pub workspace_root: PathBuf,
}

impl EngineServices {
    pub fn session_workspace(&self, session_id: &str) -> PathBuf {
        self.workspace_root.join(session_id)
    }
}
