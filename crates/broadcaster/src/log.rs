use std::collections::HashMap;

use parking_lot::RwLock;

use sa_domain::event::Event;

/// Canonical, append-only per-session event log. Every published event is
/// recorded here before fan-out to subscribers, with a sequence number
/// monotonic within the session — this is what `Last-Event-ID` replay
/// reads from, independent of which subscribers happened to be connected
/// when the event was published.
#[derive(Default)]
pub struct EventLog {
    sessions: RwLock<HashMap<String, Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and return its assigned sequence number.
    pub fn append(&self, event: Event) -> u64 {
        let mut sessions = self.sessions.write();
        let log = sessions.entry(event.session_id.clone()).or_default();
        let seq = event.seq;
        log.push(event);
        seq
    }

    /// Every event recorded for `session_id` with `seq > after`, in order.
    /// Passing `after = 0` returns the full log.
    pub fn events_after(&self, session_id: &str, after: u64) -> Vec<Event> {
        self.sessions
            .read()
            .get(session_id)
            .map(|log| log.iter().filter(|e| e.seq > after).cloned().collect())
            .unwrap_or_default()
    }

    pub fn last_seq(&self, session_id: &str) -> u64 {
        self.sessions
            .read()
            .get(session_id)
            .and_then(|log| log.last())
            .map(|e| e.seq)
            .unwrap_or(0)
    }

    pub fn drop_session(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::event::EventPayload;

    fn ev(session_id: &str, seq: u64) -> Event {
        Event {
            seq,
            session_id: session_id.to_string(),
            task_id: "t1".into(),
            parent_task_id: None,
            timestamp: chrono::Utc::now(),
            payload: EventPayload::Thinking {
                iteration: 1,
                delta: "x".into(),
            },
        }
    }

    #[test]
    fn events_after_filters_and_orders() {
        let log = EventLog::new();
        log.append(ev("s1", 1));
        log.append(ev("s1", 2));
        log.append(ev("s1", 3));
        let after = log.events_after("s1", 1);
        assert_eq!(after.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn sessions_are_isolated() {
        let log = EventLog::new();
        log.append(ev("s1", 1));
        log.append(ev("s2", 1));
        assert_eq!(log.events_after("s1", 0).len(), 1);
        assert_eq!(log.events_after("s2", 0).len(), 1);
    }

    #[test]
    fn unknown_session_returns_empty() {
        let log = EventLog::new();
        assert!(log.events_after("nope", 0).is_empty());
    }

    #[test]
    fn last_seq_tracks_highest_appended() {
        let log = EventLog::new();
        log.append(ev("s1", 1));
        log.append(ev("s1", 5));
        assert_eq!(log.last_seq("s1"), 5);
        assert_eq!(log.last_seq("unknown"), 0);
    }
}
