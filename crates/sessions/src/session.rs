use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sa_domain::tool::Message;

/// Monotonic counter guaranteeing uniqueness even when two sessions are
/// minted within the same millisecond on the same thread.
static SEQ: AtomicU64 = AtomicU64::new(0);

/// Generates a session id of the shape `{monotonic_millis}-{random_hex}`,
/// per the data model's supplement note: combine monotonic time with a
/// random suffix of at least 64 bits rather than a bare `Uuid::new_v4()`,
/// so ids sort roughly chronologically while remaining collision-free
/// under concurrent creation.
pub fn generate_session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let random: u64 = rand_u64() ^ seq;
    format!("{millis:x}-{random:016x}")
}

/// A lightweight xorshift generator seeded from the address of a stack
/// value and the current time; good enough for a uniqueness suffix, not a
/// cryptographic requirement.
fn rand_u64() -> u64 {
    let marker = 0u8;
    let addr = &marker as *const u8 as u64;
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let mut x = addr ^ (nanos << 17) ^ 0x9E3779B97F4A7C15;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

/// A session: an ordered message history plus bookkeeping, held behind a
/// per-session lock in [`crate::store::SessionStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    /// Cumulative prompt+completion tokens billed across every task run
    /// against this session.
    pub total_tokens: u64,
    /// Running count of tasks created for this session, for diagnostics.
    pub task_count: u64,
}

impl Session {
    pub fn new(session_id: String) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            total_tokens: 0,
            task_count: 0,
        }
    }

    pub fn append(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
        self.updated_at = Utc::now();
    }

    pub fn record_usage(&mut self, tokens: u64) {
        self.total_tokens += tokens;
        self.updated_at = Utc::now();
    }

    /// Atomically replace the messages before `cutoff` with a single
    /// compression-summary message, per spec.md §4.2's "one atomic message
    /// list substitution". `cutoff` is clamped to the current length so a
    /// stale cutoff (computed against an older message count) never panics.
    pub fn apply_compaction(&mut self, cutoff: usize, summary: Message) {
        let cutoff = cutoff.min(self.messages.len());
        let mut replaced = Vec::with_capacity(self.messages.len() - cutoff + 1);
        replaced.push(summary);
        replaced.extend(self.messages.drain(cutoff..));
        self.messages = replaced;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_under_rapid_generation() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..2000 {
            let id = generate_session_id();
            assert!(seen.insert(id), "duplicate session id generated");
        }
    }

    #[test]
    fn session_id_shape() {
        let id = generate_session_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 2);
        assert!(u128::from_str_radix(parts[0], 16).is_ok());
        assert!(u64::from_str_radix(parts[1], 16).is_ok());
    }

    #[test]
    fn append_updates_timestamp() {
        let mut s = Session::new("s1".into());
        let before = s.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        s.append(vec![Message::user("hi")]);
        assert!(s.updated_at >= before);
        assert_eq!(s.messages.len(), 1);
    }
}
