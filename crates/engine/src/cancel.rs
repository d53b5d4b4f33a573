//! Per-task cancellation bookkeeping.
//!
//! A registry of [`CancelHandle`]s keyed by task id, shared between the
//! Task Coordinator (which flips a handle from the `/cancel` endpoint or
//! when a task's wall-clock timeout elapses) and the engine (which checks
//! its own handle at every suspension point: before each LLM call, before
//! and after each tool dispatch, and between iterations).

use std::collections::HashMap;

use parking_lot::RwLock;

use sa_domain::task::CancelHandle;

#[derive(Default)]
pub struct CancelMap {
    handles: RwLock<HashMap<String, CancelHandle>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh handle for `task_id`, replacing any stale entry
    /// left over from a previous task that reused the same id (should
    /// not happen in practice, but registration must never silently
    /// share a handle across two different runs).
    pub fn register(&self, task_id: &str) -> CancelHandle {
        let handle = CancelHandle::new();
        self.handles
            .write()
            .insert(task_id.to_string(), handle.clone());
        handle
    }

    pub fn get(&self, task_id: &str) -> Option<CancelHandle> {
        self.handles.read().get(task_id).cloned()
    }

    /// Request cancellation of a running task. Returns `false` if the task
    /// is not known (already finished, or never registered) so the caller
    /// can distinguish "no-op, already done" from "cancellation requested".
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.handles.read().get(task_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the bookkeeping for a finished task.
    pub fn remove(&self, task_id: &str) {
        self.handles.write().remove(task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_unknown_task_is_noop() {
        let map = CancelMap::new();
        assert!(!map.cancel("nope"));
    }

    #[test]
    fn register_then_cancel_marks_the_shared_handle() {
        let map = CancelMap::new();
        let handle = map.register("t1");
        assert!(!handle.is_cancelled());
        assert!(map.cancel("t1"));
        assert!(handle.is_cancelled());
    }

    #[test]
    fn remove_forgets_the_task() {
        let map = CancelMap::new();
        map.register("t1");
        map.remove("t1");
        assert!(!map.cancel("t1"));
        assert!(map.get("t1").is_none());
    }
}
