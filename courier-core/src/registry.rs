// ABOUTME: The relay's shared mutable state: active runs, pending fresh-session flags,
// ABOUTME: last-inbound times. One registry per process; locks are never held across await.

use courier_agent::{RunHandle, StopMode};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Chat-keyed relay state. Constructed once at startup and shared by the
/// poller, the command handlers, and the run driver.
#[derive(Debug, Default)]
pub struct Registry {
    active: Mutex<HashMap<String, Arc<RunHandle>>>,
    pending_new_session: Mutex<HashSet<String>>,
    last_inbound_at: Mutex<HashMap<String, i64>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handle for a starting run. At most one run exists per
    /// chat; the queue guarantees the previous one has ended.
    pub fn begin_run(&self, chat_id: &str, handle: Arc<RunHandle>) {
        self.active
            .lock()
            .expect("active lock poisoned")
            .insert(chat_id.to_string(), handle);
    }

    pub fn end_run(&self, chat_id: &str) {
        self.active
            .lock()
            .expect("active lock poisoned")
            .remove(chat_id);
    }

    pub fn active_run(&self, chat_id: &str) -> Option<Arc<RunHandle>> {
        self.active
            .lock()
            .expect("active lock poisoned")
            .get(chat_id)
            .cloned()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().expect("active lock poisoned").len()
    }

    /// Whether a chat currently has a live agent process.
    pub fn is_running(&self, chat_id: &str) -> bool {
        self.active_run(chat_id).is_some_and(|h| h.has_child())
    }

    /// User-initiated stop of a chat's run. Returns `false` when there was
    /// nothing to stop.
    pub fn stop_chat(&self, chat_id: &str) -> bool {
        match self.active_run(chat_id) {
            Some(handle) => {
                handle.stop(StopMode::User);
                true
            }
            None => false,
        }
    }

    /// Mark that the chat's next message should start a fresh session.
    pub fn mark_new_session(&self, chat_id: &str) {
        self.pending_new_session
            .lock()
            .expect("pending lock poisoned")
            .insert(chat_id.to_string());
    }

    /// Consume the one-shot fresh-session flag.
    pub fn take_new_session(&self, chat_id: &str) -> bool {
        self.pending_new_session
            .lock()
            .expect("pending lock poisoned")
            .remove(chat_id)
    }

    pub fn last_inbound_at(&self, chat_id: &str) -> Option<i64> {
        self.last_inbound_at
            .lock()
            .expect("last-inbound lock poisoned")
            .get(chat_id)
            .copied()
    }

    pub fn set_last_inbound_at(&self, chat_id: &str, timestamp_secs: i64) {
        self.last_inbound_at
            .lock()
            .expect("last-inbound lock poisoned")
            .insert(chat_id.to_string(), timestamp_secs);
    }

    /// Shutdown-mode stop of every active run. Returns the handles that
    /// still had a live child, for the caller's force-kill sweep after the
    /// grace period.
    pub fn stop_all_for_shutdown(&self) -> Vec<Arc<RunHandle>> {
        let handles: Vec<Arc<RunHandle>> = self
            .active
            .lock()
            .expect("active lock poisoned")
            .values()
            .cloned()
            .collect();
        for handle in &handles {
            handle.stop(StopMode::Shutdown);
        }
        handles.into_iter().filter(|h| h.has_child()).collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_begin_and_end_run() {
        let registry = Registry::new();
        assert!(registry.active_run("a").is_none());
        assert_eq!(registry.active_count(), 0);

        registry.begin_run("a", Arc::new(RunHandle::new()));
        assert!(registry.active_run("a").is_some());
        assert_eq!(registry.active_count(), 1);
        assert!(!registry.is_running("a"), "no child process registered yet");

        registry.end_run("a");
        assert!(registry.active_run("a").is_none());
    }

    #[tokio::test]
    async fn test_stop_chat_without_run_is_noop() {
        let registry = Registry::new();
        assert!(!registry.stop_chat("a"));
    }

    #[tokio::test]
    async fn test_stop_chat_marks_handle_stopped() {
        let registry = Registry::new();
        let handle = Arc::new(RunHandle::new());
        registry.begin_run("a", Arc::clone(&handle));
        assert!(registry.stop_chat("a"));
        assert!(handle.is_stopped());
    }

    #[test]
    fn test_new_session_flag_is_one_shot() {
        let registry = Registry::new();
        assert!(!registry.take_new_session("a"));
        registry.mark_new_session("a");
        assert!(registry.take_new_session("a"));
        assert!(!registry.take_new_session("a"));
    }

    #[test]
    fn test_new_session_flag_is_per_chat() {
        let registry = Registry::new();
        registry.mark_new_session("a");
        assert!(!registry.take_new_session("b"));
        assert!(registry.take_new_session("a"));
    }

    #[test]
    fn test_last_inbound_tracking() {
        let registry = Registry::new();
        assert!(registry.last_inbound_at("a").is_none());
        registry.set_last_inbound_at("a", 1_000);
        assert_eq!(registry.last_inbound_at("a"), Some(1_000));
        registry.set_last_inbound_at("a", 2_000);
        assert_eq!(registry.last_inbound_at("a"), Some(2_000));
    }

    #[tokio::test]
    async fn test_shutdown_stops_every_run() {
        let registry = Registry::new();
        let a = Arc::new(RunHandle::new());
        let b = Arc::new(RunHandle::new());
        registry.begin_run("a", Arc::clone(&a));
        registry.begin_run("b", Arc::clone(&b));

        let survivors = registry.stop_all_for_shutdown();
        assert!(a.is_stopped());
        assert!(b.is_stopped());
        // Neither run had a live child, so nothing needs the kill sweep.
        assert!(survivors.is_empty());
    }
}
