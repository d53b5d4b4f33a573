use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compaction collapses old conversation history into a structured summary
/// so a context section doesn't overflow its token budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Enable automatic compaction when a section crosses `trigger_ratio`
    /// of its token budget.
    #[serde(default = "d_true")]
    pub auto: bool,
    /// Fraction of a section's token budget that triggers compaction
    /// (spec.md §4.2: 80%).
    #[serde(default = "d_trigger")]
    pub trigger_ratio: f64,
    /// Number of most-recent user turns kept verbatim; the single most
    /// recent one is always preserved byte-identically (spec.md §8 #5).
    #[serde(default = "d_keep")]
    pub keep_last_turns: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            auto: true,
            trigger_ratio: d_trigger(),
            keep_last_turns: d_keep(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_trigger() -> f64 {
    0.8
}
fn d_keep() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_trigger() {
        let cfg = CompactionConfig::default();
        assert!(cfg.auto);
        assert!((cfg.trigger_ratio - 0.8).abs() < 1e-9);
        assert_eq!(cfg.keep_last_turns, 1);
    }

    #[test]
    fn deserialize_missing_fields_uses_defaults() {
        let cfg: CompactionConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.auto);
    }
}
