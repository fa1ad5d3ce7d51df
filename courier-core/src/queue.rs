// ABOUTME: Per-chat FIFO execution lanes built as a chain of continuation futures.
// ABOUTME: Enqueue order is execution order within a chat; chats never block each other.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct LaneTail {
    ticket: u64,
    done: watch::Receiver<bool>,
}

#[derive(Default)]
struct QueueInner {
    next_ticket: u64,
    tails: HashMap<String, LaneTail>,
}

/// Per-key serialization: at most one task per chat runs at a time, in
/// submission order, while different chats proceed fully concurrently.
///
/// The tail swap happens synchronously inside `enqueue`, so calling it from
/// a single dispatch loop pins execution order to arrival order even though
/// the tasks themselves are spawned. Idle lanes are removed as soon as their
/// last task finishes.
#[derive(Clone, Default)]
pub struct ChatQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl ChatQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue work for a chat. The returned handle resolves once the task
    /// has run to completion.
    pub fn enqueue<F>(&self, chat_id: &str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (done_tx, done_rx) = watch::channel(false);
        let (ticket, previous) = {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            inner.next_ticket += 1;
            let ticket = inner.next_ticket;
            let previous = inner.tails.insert(
                chat_id.to_string(),
                LaneTail {
                    ticket,
                    done: done_rx,
                },
            );
            (ticket, previous)
        };

        let inner = Arc::clone(&self.inner);
        let chat = chat_id.to_string();
        tokio::spawn(async move {
            if let Some(mut previous) = previous {
                // Wait for our predecessor in this lane. A closed channel
                // means the predecessor is gone; treat that as done.
                while !*previous.done.borrow() {
                    if previous.done.changed().await.is_err() {
                        break;
                    }
                }
            }

            task.await;
            let _ = done_tx.send(true);

            let mut inner = inner.lock().expect("queue lock poisoned");
            if inner.tails.get(&chat).is_some_and(|t| t.ticket == ticket) {
                inner.tails.remove(&chat);
            }
        })
    }

    /// Number of chats with queued or running work.
    pub fn active_lanes(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").tails.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_single_task_runs() {
        let queue = ChatQueue::new();
        let (tx, rx) = oneshot::channel();
        queue.enqueue("a", async move {
            let _ = tx.send(42);
        });
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_tasks_for_one_chat_run_in_enqueue_order() {
        let queue = ChatQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();

        for i in 0..20u32 {
            let log = Arc::clone(&log);
            handles.push(queue.enqueue("a", async move {
                // Later tasks sleeping less would expose ordering violations.
                tokio::time::sleep(Duration::from_millis(u64::from(20 - i) % 5)).await;
                log.lock().unwrap().push(i);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let order = log.lock().unwrap().clone();
        assert_eq!(order, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_chats_do_not_block_each_other() {
        let queue = ChatQueue::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<()>();

        // Chat "a" is blocked until we release it.
        queue.enqueue("a", async move {
            let _ = release_rx.await;
            let _ = done_tx.send(());
        });

        // Chat "b" must complete while "a" is still blocked.
        let b = queue.enqueue("b", async {});
        tokio::time::timeout(Duration::from_secs(1), b)
            .await
            .expect("chat b was head-of-line blocked by chat a")
            .unwrap();

        let _ = release_tx.send(());
        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_second_task_waits_for_first() {
        let queue = ChatQueue::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let running = Arc::new(Mutex::new(0u32));
        let peak = Arc::new(Mutex::new(0u32));

        let r1 = Arc::clone(&running);
        let p1 = Arc::clone(&peak);
        queue.enqueue("a", async move {
            {
                let mut r = r1.lock().unwrap();
                *r += 1;
                let mut p = p1.lock().unwrap();
                *p = (*p).max(*r);
            }
            let _ = release_rx.await;
            *r1.lock().unwrap() -= 1;
        });

        let r2 = Arc::clone(&running);
        let p2 = Arc::clone(&peak);
        let second = queue.enqueue("a", async move {
            {
                let mut r = r2.lock().unwrap();
                *r += 1;
                let mut p = p2.lock().unwrap();
                *p = (*p).max(*r);
            }
            *r2.lock().unwrap() -= 1;
        });

        // Give the second task a chance to (incorrectly) start early.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = release_tx.send(());
        second.await.unwrap();

        assert_eq!(*peak.lock().unwrap(), 1, "tasks overlapped within one chat");
    }

    #[tokio::test]
    async fn test_idle_lanes_are_removed() {
        let queue = ChatQueue::new();
        let mut handles = Vec::new();
        for chat in ["a", "b", "c"] {
            handles.push(queue.enqueue(chat, async {}));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(queue.active_lanes(), 0);
    }

    #[tokio::test]
    async fn test_lane_survives_while_work_is_queued() {
        let queue = ChatQueue::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        queue.enqueue("a", async move {
            let _ = release_rx.await;
        });
        let tail = queue.enqueue("a", async {});
        assert_eq!(queue.active_lanes(), 1);

        let _ = release_tx.send(());
        tail.await.unwrap();
        assert_eq!(queue.active_lanes(), 0);
    }
}
