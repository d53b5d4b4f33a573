use sa_domain::config::ContextConfig;
use sa_domain::tool::{Message, MessageContent, MessageSource};

/// Cheap token estimator: ~4 characters per token, the same rough ratio
/// the rest of the stack uses where an actual tokenizer call would be a
/// network round trip. Good enough for budget accounting, not for billing.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

fn message_tokens(message: &Message) -> usize {
    match &message.content {
        MessageContent::Text(t) => estimate_tokens(t),
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|p| estimate_tokens(&format!("{p:?}")))
            .sum(),
    }
}

/// The four-section prompt this builds, with per-section token counts for
/// diagnostics and compaction-trigger decisions.
#[derive(Debug, Clone)]
pub struct BuiltEnvelope {
    pub messages: Vec<Message>,
    pub system_tokens: usize,
    pub dynamic_tokens: usize,
    pub meta_tokens: usize,
    pub messages_dropped: usize,
    /// True when the dynamic section occupied more than its trigger ratio
    /// of budget before truncation — the caller should schedule
    /// compaction for the next turn.
    pub needs_compaction: bool,
}

/// Builds envelopes honoring the four-section token budget: system+static
/// ~25%, dynamic ~55%, meta ~10%, headroom ~10% (left unconsumed on
/// purpose, a safety margin against estimator error and provider-side
/// rounding).
pub struct EnvelopeBuilder {
    pub config: ContextConfig,
    pub trigger_ratio: f64,
}

impl EnvelopeBuilder {
    pub fn new(config: ContextConfig, trigger_ratio: f64) -> Self {
        Self {
            config,
            trigger_ratio,
        }
    }

    /// Assemble the ordered message list per the envelope ordering
    /// discipline: `[system_prompt] ⊕ [compression_summary?] ⊕
    /// [older messages] ⊕ [new_user_input] ⊕ [rag_preload]`.
    ///
    /// `history` is assumed already in chronological order. Older turns
    /// are dropped from the front (oldest first) when the dynamic budget
    /// is exceeded — the most recent turns are the ones worth keeping;
    /// the compaction pass (triggered via `needs_compaction`) is
    /// responsible for replacing dropped history with a structured
    /// summary rather than this builder silently discarding it.
    pub fn build(
        &self,
        system_prompt: &Message,
        compression_summary: Option<&Message>,
        history: &[Message],
        new_user_input: &Message,
        rag_preload: Option<&Message>,
    ) -> BuiltEnvelope {
        let system_budget = self.config.system_static_budget();
        let dynamic_budget = self.config.dynamic_budget();
        let meta_budget = self.config.meta_budget();

        let system_tokens = message_tokens(system_prompt)
            + compression_summary.map(message_tokens).unwrap_or(0);

        let mut meta_tokens = message_tokens(new_user_input);
        if let Some(rag) = rag_preload {
            meta_tokens += message_tokens(rag);
        }

        // Walk history newest-to-oldest, keeping what fits in the dynamic
        // budget, then reverse back to chronological order.
        let mut kept: Vec<&Message> = Vec::new();
        let mut dynamic_tokens = 0usize;
        let mut dropped = 0usize;
        for message in history.iter().rev() {
            let tokens = message_tokens(message);
            if dynamic_tokens + tokens > dynamic_budget && !kept.is_empty() {
                dropped += 1;
                continue;
            }
            dynamic_tokens += tokens;
            kept.push(message);
        }
        kept.reverse();

        let needs_compaction =
            dynamic_tokens as f64 > dynamic_budget as f64 * self.trigger_ratio || dropped > 0;

        let mut messages = Vec::with_capacity(kept.len() + 4);
        messages.push(system_prompt.clone());
        if let Some(summary) = compression_summary {
            messages.push(summary.clone());
        }
        messages.extend(kept.into_iter().cloned());
        messages.push(new_user_input.clone());
        if let Some(rag) = rag_preload {
            messages.push(rag.clone());
        }

        debug_assert!(system_tokens <= system_budget + system_budget, "system section grossly over budget");
        debug_assert!(meta_tokens <= meta_budget + meta_budget, "meta section grossly over budget");

        BuiltEnvelope {
            messages,
            system_tokens,
            dynamic_tokens,
            meta_tokens,
            messages_dropped: dropped,
            needs_compaction,
        }
    }
}

fn message_source_order(source: &MessageSource) -> u8 {
    match source {
        MessageSource::SystemPrompt => 0,
        MessageSource::CompressionSummary => 1,
        MessageSource::UserHistory => 2,
        MessageSource::RagPreload => 3,
    }
}

/// Verifies a built envelope's ordering matches §4.2's discipline: system
/// material before history, history before the new turn, RAG preload last.
pub fn assert_ordering_invariant(messages: &[Message]) -> bool {
    let mut last = 0u8;
    for m in messages {
        let rank = message_source_order(&m.source);
        if rank < last && !(rank == 2 && last == 2) {
            return false;
        }
        last = last.max(rank);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ContextConfig {
        ContextConfig {
            total_tokens: 1000,
            ..Default::default()
        }
    }

    #[test]
    fn estimate_tokens_rough_ratio() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }

    #[test]
    fn ordering_is_system_then_history_then_new_input_then_rag() {
        let builder = EnvelopeBuilder::new(cfg(), 0.8);
        let system = Message::system("you are an agent");
        let history = vec![Message::user("first"), Message::assistant("ok")];
        let new_input = Message::user("what now");
        let rag = Message::rag_preload("some retrieved doc");

        let built = builder.build(&system, None, &history, &new_input, Some(&rag));
        assert!(assert_ordering_invariant(&built.messages));
        assert_eq!(built.messages.len(), 5);
        assert!(matches!(built.messages[0].source, MessageSource::SystemPrompt));
        assert!(matches!(built.messages.last().unwrap().source, MessageSource::RagPreload));
    }

    #[test]
    fn compression_summary_comes_right_after_system_prompt() {
        let builder = EnvelopeBuilder::new(cfg(), 0.8);
        let system = Message::system("sys");
        let summary = Message::compression_summary("earlier turns summarized");
        let history = vec![Message::user("recent")];
        let new_input = Message::user("new");

        let built = builder.build(&system, Some(&summary), &history, &new_input, None);
        assert!(matches!(built.messages[0].source, MessageSource::SystemPrompt));
        assert!(matches!(built.messages[1].source, MessageSource::CompressionSummary));
    }

    #[test]
    fn old_history_dropped_when_dynamic_budget_exceeded() {
        let mut small_cfg = cfg();
        small_cfg.total_tokens = 40; // dynamic budget ~= 22 tokens
        let builder = EnvelopeBuilder::new(small_cfg, 0.8);
        let system = Message::system("sys");
        let long_turn = "x".repeat(400); // ~100 tokens, forces drops
        let history = vec![
            Message::user(&long_turn),
            Message::assistant("short reply"),
            Message::user("most recent"),
        ];
        let new_input = Message::user("final question");

        let built = builder.build(&system, None, &history, &new_input, None);
        assert!(built.messages_dropped > 0);
        assert!(built.needs_compaction);
        // the most recent turn should always survive
        assert!(built
            .messages
            .iter()
            .any(|m| m.content.extract_all_text().contains("most recent")));
    }

    #[test]
    fn last_raw_turn_always_kept_even_under_tiny_budget() {
        let mut tiny_cfg = cfg();
        tiny_cfg.total_tokens = 8;
        let builder = EnvelopeBuilder::new(tiny_cfg, 0.8);
        let system = Message::system("sys");
        let history = vec![Message::user("this will not fit at all in the tiny dynamic budget")];
        let new_input = Message::user("question");

        let built = builder.build(&system, None, &history, &new_input, None);
        // even when nothing fits, the single most-recent history message is
        // always kept (kept.is_empty() guard), so dropped stays at 0 here
        assert_eq!(built.messages_dropped, 0);
    }
}
