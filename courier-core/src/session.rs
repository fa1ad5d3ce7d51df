// ABOUTME: Per-chat session directories and the continue-vs-fresh decision.
// ABOUTME: The agent writes its own session files; we only look at the newest one.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Extension of the session files the agent writes.
pub const SESSION_FILE_EXT: &str = "jsonl";

/// Maps chat identities to durable working directories under one root.
#[derive(Debug, Clone)]
pub struct SessionDirectory {
    root: PathBuf,
}

/// The most recently modified session file in a chat's directory.
#[derive(Debug, Clone)]
pub struct SessionFile {
    pub name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl SessionFile {
    /// Local-time modification stamp for status display.
    pub fn modified_local(&self) -> String {
        chrono::DateTime::<chrono::Local>::from(self.modified)
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }
}

impl SessionDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for one chat, created on first use.
    pub fn chat_dir(&self, chat_id: &str) -> Result<PathBuf> {
        let dir = self.root.join(chat_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed creating session dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Newest session file for a chat by modification time, if any.
    pub fn latest_session(&self, chat_id: &str) -> Option<SessionFile> {
        let dir = self.root.join(chat_id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(dir = %dir.display(), error = %e, "failed listing sessions");
                }
                return None;
            }
        };

        let mut latest: Option<SessionFile> = None;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SESSION_FILE_EXT) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            if latest.as_ref().is_none_or(|l| modified > l.modified) {
                latest = Some(SessionFile {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path,
                    modified,
                });
            }
        }
        latest
    }
}

/// Decides whether a new turn continues the previous agent context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContinuationPolicy {
    /// Idle gap after which a non-quote message starts a fresh session.
    /// `None` disables the idle reset.
    pub idle_timeout: Option<Duration>,
}

impl ContinuationPolicy {
    /// `true` means continue the previous session.
    ///
    /// A quote-reply always continues, regardless of elapsed time or a
    /// pending fresh-session request. Otherwise a one-shot fresh-session
    /// flag or an expired idle window starts over.
    pub fn decide(
        &self,
        is_quote_reply: bool,
        force_new: bool,
        last_inbound_at: Option<i64>,
        now_secs: i64,
    ) -> bool {
        if is_quote_reply {
            return true;
        }
        if force_new {
            return false;
        }
        let idle_expired = match (self.idle_timeout, last_inbound_at) {
            (Some(timeout), Some(last)) => {
                now_secs >= last && (now_secs - last) as u64 >= timeout.as_secs()
            }
            _ => false,
        };
        !idle_expired
    }
}

// =============================================================================
// Tests
// =============================================================================
