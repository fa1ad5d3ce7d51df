// ABOUTME: Ephemeral status message for one run: deferred creation, coalesced edits.
// ABOUTME: A run faster than the creation delay never creates (or deletes) a message.

use crate::traits::{ChatApi, SendOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long a run must last before the status message is created at all.
/// Keeps fast runs from flashing a message into the chat.
pub const PROGRESS_MESSAGE_DELAY: Duration = Duration::from_millis(1500);

const INITIAL_TEXT: &str = "✨ Working…";

/// Renders one periodically-updated status message per run.
///
/// All platform calls happen on a single worker task, so edits are naturally
/// serialized; queued updates are coalesced to the latest text and an edit
/// is skipped when the text hasn't changed. `finish` waits for pending edits
/// and then deletes the message if one was ever created.
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<String>,
    worker: JoinHandle<()>,
}

impl ProgressReporter {
    pub fn start<A: ChatApi>(api: Arc<A>, chat_id: String, delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(progress_worker(api, chat_id, delay, rx));
        Self { tx, worker }
    }

    /// Set the desired status text. Never blocks; the worker applies it.
    pub fn update(&self, text: impl Into<String>) {
        let _ = self.tx.send(text.into());
    }

    /// Flush pending edits and delete the status message, if any.
    pub async fn finish(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "progress worker did not finish cleanly");
        }
    }
}

async fn progress_worker<A: ChatApi>(
    api: Arc<A>,
    chat_id: String,
    delay: Duration,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    let mut desired = INITIAL_TEXT.to_string();

    // Collect updates until the creation delay elapses. If the run finishes
    // first, the message is never created and there is nothing to delete.
    let create_at = tokio::time::sleep(delay);
    tokio::pin!(create_at);
    loop {
        tokio::select! {
            _ = &mut create_at => break,
            next = rx.recv() => match next {
                Some(text) => desired = text,
                None => return,
            }
        }
    }

    let message_id = match api
        .send_message(&chat_id, &desired, SendOptions::silent_plain())
        .await
    {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "failed sending progress message");
            // Drain silently so update() calls stay cheap until the run ends.
            while rx.recv().await.is_some() {}
            return;
        }
    };
    let mut last_sent = desired.clone();

    while let Some(text) = rx.recv().await {
        desired = text;
        // Coalesce any backlog down to the latest desired text.
        while let Ok(newer) = rx.try_recv() {
            desired = newer;
        }
        if desired == last_sent {
            continue;
        }
        match api.edit_message(&chat_id, message_id, &desired).await {
            // NotModified means the platform already shows this text.
            Ok(_) => last_sent = desired.clone(),
            Err(e) => tracing::error!(error = %e, "failed updating progress message"),
        }
    }

    if let Err(e) = api.delete_message(&chat_id, message_id).await {
        tracing::error!(error = %e, "failed deleting progress message");
    }
}

// =============================================================================
// Tests
// =============================================================================
