use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt envelope token budgets (spec.md §4.2)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token-budget split for the four envelope sections. The shares sum to
/// 1.0 of `total_tokens`; each section is independently subject to
/// compaction once its occupancy crosses the compaction trigger ratio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Total token budget for the composed prompt.
    #[serde(default = "d_total")]
    pub total_tokens: usize,
    /// Share reserved for system + static content.
    #[serde(default = "d_system_share")]
    pub system_static_share: f64,
    /// Share reserved for dynamic conversation history.
    #[serde(default = "d_dynamic_share")]
    pub dynamic_share: f64,
    /// Share reserved for metadata (tool schemas, summaries).
    #[serde(default = "d_meta_share")]
    pub meta_share: f64,
    /// Headroom share left unallocated as a safety margin.
    #[serde(default = "d_headroom_share")]
    pub headroom_share: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            total_tokens: d_total(),
            system_static_share: d_system_share(),
            dynamic_share: d_dynamic_share(),
            meta_share: d_meta_share(),
            headroom_share: d_headroom_share(),
        }
    }
}

impl ContextConfig {
    /// Token budget for the system+static section.
    pub fn system_static_budget(&self) -> usize {
        (self.total_tokens as f64 * self.system_static_share) as usize
    }

    /// Token budget for the dynamic (conversation history) section.
    pub fn dynamic_budget(&self) -> usize {
        (self.total_tokens as f64 * self.dynamic_share) as usize
    }

    /// Token budget for the meta section.
    pub fn meta_budget(&self) -> usize {
        (self.total_tokens as f64 * self.meta_share) as usize
    }

    /// Token budget reserved as headroom (never allocated to content).
    pub fn headroom_budget(&self) -> usize {
        (self.total_tokens as f64 * self.headroom_share) as usize
    }
}

fn d_total() -> usize {
    128_000
}
fn d_system_share() -> f64 {
    0.25
}
fn d_dynamic_share() -> f64 {
    0.55
}
fn d_meta_share() -> f64 {
    0.10
}
fn d_headroom_share() -> f64 {
    0.10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shares_sum_to_one() {
        let cfg = ContextConfig::default();
        let sum = cfg.system_static_share + cfg.dynamic_share + cfg.meta_share + cfg.headroom_share;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn budgets_scale_with_total() {
        let cfg = ContextConfig {
            total_tokens: 1000,
            ..ContextConfig::default()
        };
        assert_eq!(cfg.system_static_budget(), 250);
        assert_eq!(cfg.dynamic_budget(), 550);
        assert_eq!(cfg.meta_budget(), 100);
        assert_eq!(cfg.headroom_budget(), 100);
    }
}
