//! SSE Event Broadcaster: session-scoped pub/sub over the execution
//! engine's event stream, backed by a canonical per-session [`EventLog`]
//! supporting `Last-Event-ID` replay, and per-subscriber bounded queues
//! that drop the oldest event on overflow.

mod log;
mod queue;

pub use log::EventLog;
pub use queue::SubscriberQueue;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use sa_domain::event::{Event, EventPayload};

/// Interval between synthetic heartbeat events sent on every live
/// subscription to keep intermediaries (load balancers, browsers) from
/// closing an idle SSE connection.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

struct SessionChannel {
    next_seq: AtomicU64,
    subscribers: RwLock<Vec<Arc<SubscriberQueue>>>,
}

impl SessionChannel {
    fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(1),
            subscribers: RwLock::new(Vec::new()),
        }
    }
}

/// Session-scoped event broadcaster. One instance is shared across the
/// gateway; the Task Coordinator registers `(task_id, session_id)` before
/// spawning a task's worker, and the engine publishes every ReAct-loop
/// event through here rather than holding its own channel.
pub struct Broadcaster {
    log: EventLog,
    channels: RwLock<HashMap<String, Arc<SessionChannel>>>,
    /// `task_id -> session_id`, so a subagent's engine (which only knows
    /// its own `task_id`) can publish without re-deriving the session.
    task_sessions: RwLock<HashMap<String, String>>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            log: EventLog::new(),
            channels: RwLock::new(HashMap::new()),
            task_sessions: RwLock::new(HashMap::new()),
        }
    }

    fn channel_for(&self, session_id: &str) -> Arc<SessionChannel> {
        if let Some(existing) = self.channels.read().get(session_id) {
            return existing.clone();
        }
        let mut channels = self.channels.write();
        channels
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(SessionChannel::new()))
            .clone()
    }

    /// Register a task under a session before the worker starts, so that
    /// a publish racing the worker's first event can never be dropped for
    /// lack of a known mapping (spec.md §4.1's ordering requirement).
    pub fn register_task(&self, task_id: &str, session_id: &str) {
        self.task_sessions
            .write()
            .insert(task_id.to_string(), session_id.to_string());
        self.channel_for(session_id);
    }

    pub fn unregister_task(&self, task_id: &str) {
        self.task_sessions.write().remove(task_id);
    }

    /// Publish a payload under `task_id`'s registered session, assigning
    /// the next sequence number and fanning out to every live subscriber.
    /// Returns the assigned event, or `None` if `task_id` was never
    /// registered (a logic error upstream; the caller should treat this
    /// as non-fatal and log).
    pub fn publish(
        &self,
        task_id: &str,
        parent_task_id: Option<&str>,
        payload: EventPayload,
    ) -> Option<Event> {
        let session_id = self.task_sessions.read().get(task_id).cloned()?;
        let channel = self.channel_for(&session_id);
        let seq = channel.next_seq.fetch_add(1, Ordering::SeqCst);
        let mut event = Event::new(seq, session_id, task_id, payload);
        if let Some(parent) = parent_task_id {
            event = event.with_parent(parent);
        }
        self.log.append(event.clone());
        for subscriber in channel.subscribers.read().iter() {
            subscriber.push(event.clone());
        }
        Some(event)
    }

    /// Subscribe to a session's live events, replaying everything after
    /// `last_event_id` from the canonical log first. The replay and the
    /// point at which live events start appending to the subscriber's
    /// queue are atomic with respect to each other: the subscriber is
    /// registered (and therefore starts buffering live events) *before*
    /// the replay snapshot is read, so no event can fall in the gap
    /// between "replay cut-off" and "live feed starts" — at worst the
    /// subscriber sees a duplicate, never a gap, and callers are expected
    /// to dedupe on `seq` if that matters to them.
    pub fn subscribe(&self, session_id: &str, last_event_id: u64) -> Subscription {
        let channel = self.channel_for(session_id);
        let queue = SubscriberQueue::new();
        channel.subscribers.write().push(queue.clone());

        let replay = self.log.events_after(session_id, last_event_id);
        Subscription {
            replay,
            queue,
            channel,
        }
    }

    pub fn last_seq(&self, session_id: &str) -> u64 {
        self.log.last_seq(session_id)
    }

    pub fn drop_session(&self, session_id: &str) {
        self.channels.write().remove(session_id);
        self.log.drop_session(session_id);
    }
}

/// A live subscription: the replay backlog to drain first, then the
/// queue to poll for anything published afterward.
pub struct Subscription {
    pub replay: Vec<Event>,
    queue: Arc<SubscriberQueue>,
    channel: Arc<SessionChannel>,
}

impl Subscription {
    pub async fn recv(&self) -> Option<Event> {
        self.queue.recv().await
    }

    pub fn unsubscribe(&self) {
        self.channel
            .subscribers
            .write()
            .retain(|s| !Arc::ptr_eq(s, &self.queue));
        self.queue.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(summary: &str) -> EventPayload {
        EventPayload::TaskAnalysis {
            summary: summary.to_string(),
            action: None,
        }
    }

    #[test]
    fn publish_without_registration_is_a_noop() {
        let b = Broadcaster::new();
        assert!(b.publish("unknown-task", None, analysis("x")).is_none());
    }

    #[test]
    fn publish_assigns_monotonic_sequence_per_session() {
        let b = Broadcaster::new();
        b.register_task("t1", "s1");
        let e1 = b.publish("t1", None, analysis("one")).unwrap();
        let e2 = b.publish("t1", None, analysis("two")).unwrap();
        assert_eq!(e1.seq, 1);
        assert_eq!(e2.seq, 2);
    }

    #[test]
    fn sessions_are_isolated() {
        let b = Broadcaster::new();
        b.register_task("t1", "s1");
        b.register_task("t2", "s2");
        b.publish("t1", None, analysis("a")).unwrap();
        b.publish("t2", None, analysis("b")).unwrap();
        assert_eq!(b.last_seq("s1"), 1);
        assert_eq!(b.last_seq("s2"), 1);
    }

    #[tokio::test]
    async fn subscriber_receives_published_events_live() {
        let b = Broadcaster::new();
        b.register_task("t1", "s1");
        let sub = b.subscribe("s1", 0);
        b.publish("t1", None, analysis("hello")).unwrap();
        let got = sub.recv().await.unwrap();
        assert!(matches!(got.payload, EventPayload::TaskAnalysis { .. }));
    }

    #[tokio::test]
    async fn replay_returns_events_after_last_event_id() {
        let b = Broadcaster::new();
        b.register_task("t1", "s1");
        b.publish("t1", None, analysis("one")).unwrap();
        b.publish("t1", None, analysis("two")).unwrap();
        b.publish("t1", None, analysis("three")).unwrap();

        let sub = b.subscribe("s1", 1);
        assert_eq!(sub.replay.len(), 2);
        assert_eq!(sub.replay[0].seq, 2);
        assert_eq!(sub.replay[1].seq, 3);
    }

    #[tokio::test]
    async fn replay_then_live_handoff_has_no_gap() {
        let b = Broadcaster::new();
        b.register_task("t1", "s1");
        b.publish("t1", None, analysis("one")).unwrap();

        let sub = b.subscribe("s1", 0);
        assert_eq!(sub.replay.len(), 1);

        // Published after subscription started: must still arrive live.
        b.publish("t1", None, analysis("two")).unwrap();
        let got = sub.recv().await.unwrap();
        assert_eq!(got.seq, 2);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_every_event() {
        let b = Broadcaster::new();
        b.register_task("t1", "s1");
        let sub_a = b.subscribe("s1", 0);
        let sub_b = b.subscribe("s1", 0);
        b.publish("t1", None, analysis("x")).unwrap();
        assert_eq!(sub_a.recv().await.unwrap().seq, 1);
        assert_eq!(sub_b.recv().await.unwrap().seq, 1);
    }

    #[test]
    fn unsubscribe_on_drop_stops_further_delivery() {
        let b = Broadcaster::new();
        b.register_task("t1", "s1");
        {
            let _sub = b.subscribe("s1", 0);
            assert_eq!(b.channel_for("s1").subscribers.read().len(), 1);
        }
        assert_eq!(b.channel_for("s1").subscribers.read().len(), 0);
    }

    #[test]
    fn parent_task_id_propagated_to_published_event() {
        let b = Broadcaster::new();
        b.register_task("child", "s1");
        let event = b.publish("child", Some("parent"), analysis("sub")).unwrap();
        assert_eq!(event.parent_task_id.as_deref(), Some("parent"));
    }
}
