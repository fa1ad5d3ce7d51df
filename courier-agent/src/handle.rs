// ABOUTME: Shared control handle for one active agent run.
// ABOUTME: Carries the stop flag, the live child's pid, and the heartbeat task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Grace period between the termination signal and the forced kill.
pub const FORCE_KILL_DELAY: Duration = Duration::from_secs(3);

/// Who asked the run to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// A user stopped this one run; escalate to a forced kill after the
    /// grace delay if the process hasn't exited.
    User,
    /// The whole service is shutting down; the caller performs a single
    /// global sweep after its own grace period instead of per-run timers.
    Shutdown,
}

/// Control handle for one active backend run.
///
/// Owned by the registry for the lifetime of the run; at most one exists per
/// chat at any instant. The runner registers the spawned child's pid here so
/// an external stop request can target it, and clears it on settlement.
#[derive(Debug, Default)]
pub struct RunHandle {
    stopped: AtomicBool,
    child_pid: Mutex<Option<u32>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl RunHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Pid of the live child process, if one is currently running.
    pub fn child_pid(&self) -> Option<u32> {
        *self.child_pid.lock().expect("child_pid lock poisoned")
    }

    pub fn has_child(&self) -> bool {
        self.child_pid().is_some()
    }

    pub(crate) fn register_child(&self, pid: u32) {
        *self.child_pid.lock().expect("child_pid lock poisoned") = Some(pid);
    }

    /// Clear the pid slot, but only if it still belongs to `pid`.
    pub(crate) fn clear_child(&self, pid: u32) {
        let mut slot = self.child_pid.lock().expect("child_pid lock poisoned");
        if *slot == Some(pid) {
            *slot = None;
        }
    }

    /// Attach the typing-heartbeat task so stop/finish can cancel it.
    pub fn set_heartbeat(&self, task: JoinHandle<()>) {
        let mut slot = self.heartbeat.lock().expect("heartbeat lock poisoned");
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    pub fn cancel_heartbeat(&self) {
        if let Some(task) = self
            .heartbeat
            .lock()
            .expect("heartbeat lock poisoned")
            .take()
        {
            task.abort();
        }
    }

    /// Mark the run stopped, cancel the heartbeat, and signal the child if
    /// one is live. In [`StopMode::User`] a detached escalation task sends a
    /// forced kill after [`FORCE_KILL_DELAY`]; the task never keeps the
    /// service alive on its own.
    pub fn stop(self: &Arc<Self>, mode: StopMode) {
        self.stopped.store(true, Ordering::SeqCst);
        self.cancel_heartbeat();

        let Some(pid) = self.child_pid() else {
            return;
        };
        tracing::info!(pid, ?mode, "terminating agent process");
        terminate(pid);

        if mode == StopMode::User {
            let handle = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(FORCE_KILL_DELAY).await;
                if handle.child_pid() == Some(pid) {
                    tracing::warn!(pid, "agent ignored termination, forcing kill");
                    force_kill_pid(pid);
                }
            });
        }
    }

    /// Forced kill for the shutdown sweep. No-op when the child already
    /// exited.
    pub fn force_kill(&self) {
        if let Some(pid) = self.child_pid() {
            force_kill_pid(pid);
        }
    }
}

/// Ask the process to terminate (SIGTERM).
pub(crate) fn terminate(pid: u32) {
    send_signal(pid, SIG_TERMINATE);
}

/// Kill the process outright (SIGKILL).
pub(crate) fn force_kill_pid(pid: u32) {
    send_signal(pid, SIG_KILL);
}

#[cfg(unix)]
const SIG_TERMINATE: i32 = libc::SIGTERM;
#[cfg(unix)]
const SIG_KILL: i32 = libc::SIGKILL;
#[cfg(not(unix))]
const SIG_TERMINATE: i32 = 15;
#[cfg(not(unix))]
const SIG_KILL: i32 = 9;

#[cfg(unix)]
fn send_signal(pid: u32, signal: i32) {
    // SAFETY: pid was obtained from our own Child handle; kill(2) on an
    // owned subprocess is safe. A failure usually means the process is
    // already gone, which is fine.
    let ret = unsafe { libc::kill(pid as i32, signal) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        tracing::debug!(pid, signal, error = %err, "kill failed (process likely exited)");
    }
}

#[cfg(not(unix))]
fn send_signal(pid: u32, signal: i32) {
    tracing::warn!(pid, signal, "signal-based termination unsupported on this platform");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_handle_is_idle() {
        let handle = RunHandle::new();
        assert!(!handle.is_stopped());
        assert!(handle.child_pid().is_none());
        assert!(!handle.has_child());
    }

    #[test]
    fn test_clear_child_only_clears_matching_pid() {
        let handle = RunHandle::new();
        handle.register_child(100);
        handle.clear_child(200);
        assert_eq!(handle.child_pid(), Some(100));
        handle.clear_child(100);
        assert!(handle.child_pid().is_none());
    }

    #[tokio::test]
    async fn test_stop_without_child_marks_stopped() {
        let handle = Arc::new(RunHandle::new());
        handle.stop(StopMode::User);
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_stop_cancels_heartbeat() {
        let handle = Arc::new(RunHandle::new());
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(600)).await;
        });
        handle.set_heartbeat(task);
        handle.stop(StopMode::Shutdown);

        let slot = handle.heartbeat.lock().unwrap();
        assert!(slot.is_none());
    }

    #[tokio::test]
    async fn test_replacing_heartbeat_aborts_previous() {
        let handle = RunHandle::new();
        let first = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(600)).await;
        });
        handle.set_heartbeat(first);
        let second = tokio::spawn(async {});
        handle.set_heartbeat(second);
        // The first task was aborted when the second was attached.
        handle.cancel_heartbeat();
    }
}
