use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use sa_domain::event::Event;

const SUBSCRIBER_QUEUE_CAP: usize = 100;

/// A per-subscriber bounded queue that drops the **oldest** buffered event
/// when full, rather than the newest. `tokio::sync::broadcast::Sender`
/// drops newest-on-lag (it overwrites the ring buffer's tail), which is
/// backwards for a slow SSE client: it should see its history trimmed,
/// not get its most recent events silently skipped while starving on
/// stale ones. A `VecDeque` behind a lock gives us the direction we need.
pub struct SubscriberQueue {
    inner: Mutex<VecDeque<Event>>,
    notify: Notify,
    closed: Mutex<bool>,
}

impl SubscriberQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::with_capacity(SUBSCRIBER_QUEUE_CAP)),
            notify: Notify::new(),
            closed: Mutex::new(false),
        })
    }

    /// Push an event, dropping the oldest buffered one if the queue is at
    /// capacity. Returns the number of events dropped (0 or 1).
    pub fn push(&self, event: Event) -> usize {
        let mut dropped = 0;
        let mut queue = self.inner.lock();
        if queue.len() >= SUBSCRIBER_QUEUE_CAP {
            queue.pop_front();
            dropped = 1;
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_waiters();
        dropped
    }

    /// Wait for and pop the next event, or `None` once the queue has been
    /// closed and drained.
    pub async fn recv(&self) -> Option<Event> {
        loop {
            {
                let mut queue = self.inner.lock();
                if let Some(event) = queue.pop_front() {
                    return Some(event);
                }
                if *self.closed.lock() {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        *self.closed.lock() = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::event::EventPayload;

    fn ev(seq: u64) -> Event {
        Event::new(seq, "s1", "t1", EventPayload::IterationStart { iteration: seq as u32 })
    }

    #[tokio::test]
    async fn push_then_recv_in_order() {
        let q = SubscriberQueue::new();
        q.push(ev(1));
        q.push(ev(2));
        assert_eq!(q.recv().await.unwrap().seq, 1);
        assert_eq!(q.recv().await.unwrap().seq, 2);
    }

    #[test]
    fn overflow_drops_oldest_not_newest() {
        let q = SubscriberQueue::new();
        for i in 0..SUBSCRIBER_QUEUE_CAP + 5 {
            q.push(ev(i as u64));
        }
        assert_eq!(q.len(), SUBSCRIBER_QUEUE_CAP);
        let queue = q.inner.lock();
        // oldest entries (0..5) should have been evicted; the newest
        // (SUBSCRIBER_QUEUE_CAP + 4) must still be present.
        assert_eq!(queue.back().unwrap().seq, (SUBSCRIBER_QUEUE_CAP + 4) as u64);
        assert!(queue.front().unwrap().seq >= 5);
    }

    #[tokio::test]
    async fn recv_returns_none_after_close_and_drain() {
        let q = SubscriberQueue::new();
        q.push(ev(1));
        q.close();
        assert_eq!(q.recv().await.unwrap().seq, 1);
        assert!(q.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_blocks_until_push() {
        let q = SubscriberQueue::new();
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.recv().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        q.push(ev(42));
        let got = handle.await.unwrap();
        assert_eq!(got.unwrap().seq, 42);
    }
}
