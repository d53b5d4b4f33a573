use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sub-agent (subagent tool) definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for a named subagent the `agent.run` tool may delegate to.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    /// Tool allow/deny policy applied to the child task.
    #[serde(default)]
    pub tool_policy: ToolPolicy,
    /// Role->model overrides for this agent (falls back to `[llm.roles]`).
    #[serde(default)]
    pub models: HashMap<String, String>,
    /// Fan-out / recursion limits.
    #[serde(default)]
    pub limits: AgentLimits,
}

/// Hard ceilings on subagent fan-out to prevent runaway trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLimits {
    /// Maximum lineage depth (parent task = 1, its child = 2, ...).
    #[serde(default = "d_3")]
    pub max_depth: u32,
    /// Maximum number of `agent.run` calls within a single parent iteration.
    #[serde(default = "d_5")]
    pub max_children_per_turn: u32,
    /// Iteration cap passed down to the child task.
    #[serde(default = "d_10")]
    pub max_iterations: u32,
    /// Wall-clock timeout for the child task (milliseconds).
    #[serde(default = "d_30000")]
    pub max_duration_ms: u64,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_children_per_turn: 5,
            max_iterations: 10,
            max_duration_ms: 30_000,
        }
    }
}

/// Tool allow/deny policy — prefix-based matching, deny takes precedence.
///
/// Backs both named explicit-list presets (spec.md §4.5) and per-agent tool
/// restriction.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolPolicy {
    /// Tool name prefixes this policy allows. Empty or `["*"]` = unrestricted.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Tool name prefixes this policy denies (checked before `allow`).
    #[serde(default)]
    pub deny: Vec<String>,
}

impl ToolPolicy {
    /// Whether `tool_name` is permitted by this policy. Case-insensitive;
    /// prefixes match on `.`-separated segments (`"memory"` blocks
    /// `"memory.search"`).
    pub fn allows(&self, tool_name: &str) -> bool {
        let name = tool_name.to_ascii_lowercase();

        for d in &self.deny {
            let d_lower = d.to_ascii_lowercase();
            if d_lower == "*" || name == d_lower || name.starts_with(&format!("{d_lower}.")) {
                return false;
            }
        }
        if self.allow.is_empty() || self.allow.iter().any(|a| a == "*") {
            return true;
        }
        self.allow.iter().any(|a| {
            let a_lower = a.to_ascii_lowercase();
            name == a_lower || name.starts_with(&format!("{a_lower}."))
        })
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_3() -> u32 {
    3
}
fn d_5() -> u32 {
    5
}
fn d_10() -> u32 {
    10
}
fn d_30000() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_policy_allows_all() {
        let policy = ToolPolicy::default();
        assert!(policy.allows("exec"));
        assert!(policy.allows("agent.run"));
    }

    #[test]
    fn allow_restricts_to_listed_prefixes() {
        let policy = ToolPolicy {
            allow: vec!["fs".into(), "web".into()],
            deny: vec![],
        };
        assert!(policy.allows("fs.read"));
        assert!(policy.allows("web"));
        assert!(!policy.allows("exec"));
    }

    #[test]
    fn deny_takes_precedence_over_allow() {
        let policy = ToolPolicy {
            allow: vec!["*".into()],
            deny: vec!["exec".into()],
        };
        assert!(!policy.allows("exec"));
        assert!(policy.allows("fs.read"));
    }

    #[test]
    fn deny_star_blocks_everything() {
        let policy = ToolPolicy {
            allow: vec!["fs".into()],
            deny: vec!["*".into()],
        };
        assert!(!policy.allows("fs.read"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let policy = ToolPolicy {
            allow: vec!["Fs".into()],
            deny: vec![],
        };
        assert!(policy.allows("FS.READ"));
    }

    #[test]
    fn agent_limits_defaults() {
        let limits = AgentLimits::default();
        assert_eq!(limits.max_depth, 3);
        assert_eq!(limits.max_children_per_turn, 5);
        assert_eq!(limits.max_duration_ms, 30_000);
    }
}
