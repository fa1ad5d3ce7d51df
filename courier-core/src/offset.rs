// ABOUTME: Durable cursor into the inbound update stream, stored as one plain integer.
// ABOUTME: Never decreases; written synchronously before an update is dispatched.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Persisted high-water mark of accepted update ids.
///
/// A crash after the write can at worst resend the in-flight update on
/// restart, never skip one.
#[derive(Debug)]
pub struct OffsetStore {
    path: PathBuf,
    current: AtomicU64,
}

impl OffsetStore {
    /// Open (or initialize) the store. A missing or unparsable file reads
    /// as zero.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        let current = match std::fs::read_to_string(&path) {
            Ok(raw) => raw.trim().parse::<u64>().unwrap_or(0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(e).with_context(|| format!("failed reading {}", path.display()));
            }
        };
        Ok(Self {
            path,
            current: AtomicU64::new(current),
        })
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Advance to `update_id` if it is ahead of the cursor, persisting the
    /// new value before returning. Duplicate or lower ids are no-ops.
    /// Returns whether the cursor moved.
    pub fn advance(&self, update_id: u64) -> Result<bool> {
        if update_id <= self.current.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.current.store(update_id, Ordering::SeqCst);
        std::fs::write(&self.path, update_id.to_string())
            .with_context(|| format!("failed writing {}", self.path.display()))?;
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// =============================================================================
// Tests
// =============================================================================
