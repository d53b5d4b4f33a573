use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task defaults (spec.md §6 env vars / §5 timeouts)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Defaults applied to a task when the submit request omits the field.
/// Overridable via `AGENT_ITERATION_CAP` / `AGENT_TASK_TIMEOUT` /
/// `AGENT_TOOL_PRESET`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefaultsConfig {
    /// Maximum ReAct iterations before a task stops with `iteration_cap`.
    #[serde(default = "d_iteration_cap")]
    pub iteration_cap: u32,
    /// Wall-clock timeout in seconds before a task stops with `timed_out`.
    #[serde(default = "d_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Tool preset applied when the request omits `tool_preset`.
    #[serde(default = "d_tool_preset")]
    pub tool_preset: String,
    /// Agent preset applied when the request omits `agent_preset`.
    #[serde(default = "d_agent_preset")]
    pub agent_preset: String,
    /// Per-engine concurrency cap for intra-iteration tool dispatch.
    #[serde(default = "d_tool_concurrency")]
    pub tool_concurrency: usize,
}

impl Default for TaskDefaultsConfig {
    fn default() -> Self {
        Self {
            iteration_cap: d_iteration_cap(),
            task_timeout_secs: d_timeout_secs(),
            tool_preset: d_tool_preset(),
            agent_preset: d_agent_preset(),
            tool_concurrency: d_tool_concurrency(),
        }
    }
}

impl TaskDefaultsConfig {
    /// Overlay environment-variable overrides onto a loaded config, matching
    /// spec.md §6's recognized-options table.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("AGENT_ITERATION_CAP") {
            if let Ok(n) = v.parse() {
                self.iteration_cap = n;
            }
        }
        if let Ok(v) = std::env::var("AGENT_TASK_TIMEOUT") {
            if let Ok(n) = v.parse() {
                self.task_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("AGENT_TOOL_PRESET") {
            self.tool_preset = v;
        }
    }
}

fn d_iteration_cap() -> u32 {
    25
}
fn d_timeout_secs() -> u64 {
    1800
}
fn d_tool_preset() -> String {
    "safe".into()
}
fn d_agent_preset() -> String {
    "default".into()
}
fn d_tool_concurrency() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = TaskDefaultsConfig::default();
        assert_eq!(cfg.iteration_cap, 25);
        assert_eq!(cfg.task_timeout_secs, 1800);
        assert_eq!(cfg.tool_preset, "safe");
        assert_eq!(cfg.tool_concurrency, 4);
    }

    #[test]
    fn env_override_iteration_cap() {
        std::env::set_var("AGENT_ITERATION_CAP", "7");
        let mut cfg = TaskDefaultsConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.iteration_cap, 7);
        std::env::remove_var("AGENT_ITERATION_CAP");
    }

    #[test]
    fn env_override_ignored_when_unset() {
        std::env::remove_var("AGENT_TOOL_PRESET");
        let mut cfg = TaskDefaultsConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.tool_preset, "safe");
    }
}
