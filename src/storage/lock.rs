//! Cross-invocation mutual exclusion.
//!
//! Presence of `.graft/lock` means "held". The file is created with
//! `create_new` so only one invocation can win, and holds a JSON
//! [`LockHolder`]. Acquisition never waits: if another live process holds the
//! lock the caller gets [`GraftError::LockHeld`] and may retry later.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GraftError, Result};

/// Information about the current lock holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    /// Process ID holding the lock
    pub pid: u32,
    /// When the lock was acquired
    pub acquired_at: DateTime<Utc>,
    /// Hostname of the lock holder
    pub hostname: String,
    /// Operation that took the lock (e.g. "apply")
    pub operation: String,
}

impl LockHolder {
    fn current(operation: &str) -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now(),
            hostname: current_hostname(),
            operation: operation.to_string(),
        }
    }

    fn describe(&self) -> String {
        format!(
            "pid {} on {} ({}) since {}",
            self.pid,
            self.hostname,
            self.operation,
            self.acquired_at.to_rfc3339()
        )
    }
}

fn current_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Whether the holder's process is known to be gone.
///
/// Only answerable for holders on this host with a `/proc` filesystem.
fn holder_is_dead(holder: &LockHolder) -> Option<bool> {
    if holder.hostname != current_hostname() {
        return None;
    }
    #[cfg(target_os = "linux")]
    {
        let proc_path = format!("/proc/{}", holder.pid);
        Some(!Path::new(&proc_path).exists())
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Scoped project lock. Released when dropped.
#[derive(Debug)]
pub struct ProjectLock {
    path: PathBuf,
    holder: LockHolder,
}

impl ProjectLock {
    /// Acquire the lock at `path` for `operation`.
    ///
    /// A lock left behind by a dead process, or one older than `stale_after`
    /// when liveness cannot be checked, is broken once and re-acquired.
    pub fn acquire(path: &Path, operation: &str, stale_after: Duration) -> Result<Self> {
        match Self::try_create(path, operation)? {
            Some(lock) => Ok(lock),
            None => {
                let holder = Self::status(path)?;
                if Self::is_stale(path, holder.as_ref(), stale_after) {
                    warn!(
                        path = %path.display(),
                        holder = holder.as_ref().map_or_else(|| "unreadable".to_string(), LockHolder::describe),
                        "breaking stale lock"
                    );
                    Self::break_lock(path)?;
                    if let Some(lock) = Self::try_create(path, operation)? {
                        return Ok(lock);
                    }
                }
                let described = Self::status(path)?
                    .map_or_else(|| "an unknown process".to_string(), |h| h.describe());
                Err(GraftError::LockHeld { holder: described })
            }
        }
    }

    fn try_create(path: &Path, operation: &str) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let holder = LockHolder::current(operation);
        let holder_json = serde_json::to_vec(&holder)?;
        file.write_all(&holder_json)?;
        file.sync_all()?;
        debug!(path = %path.display(), operation, "acquired project lock");
        Ok(Some(Self {
            path: path.to_path_buf(),
            holder,
        }))
    }

    fn is_stale(path: &Path, holder: Option<&LockHolder>, stale_after: Duration) -> bool {
        if let Some(holder) = holder {
            if let Some(dead) = holder_is_dead(holder) {
                return dead;
            }
        }
        if stale_after.is_zero() {
            return false;
        }
        let age = holder.map_or_else(
            || {
                fs::metadata(path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.elapsed().ok())
                    .unwrap_or_default()
            },
            |h| (Utc::now() - h.acquired_at).to_std().unwrap_or_default(),
        );
        age > stale_after
    }

    /// Current holder, if the lock file exists and is readable.
    pub fn status(path: &Path) -> Result<Option<LockHolder>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_str(&content).ok())
    }

    /// Whether the lock file is present.
    #[must_use]
    pub fn is_held(path: &Path) -> bool {
        path.exists()
    }

    /// Forcefully remove the lock file.
    pub fn break_lock(path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    #[must_use]
    pub const fn holder(&self) -> &LockHolder {
        &self.holder
    }

    /// Release explicitly. Equivalent to dropping the guard.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("Failed to release lock: {}", e);
        }
        debug!(path = %self.path.display(), "released project lock");
    }
}
