//! Conflict resolution for an apply that stopped on merge conflicts.
//!
//! The stopped apply leaves conflict markers in the working tree, keeps its
//! backup and records a [`PendingApply`]. `continue` finishes the apply once
//! the markers are gone; `abort` restores the pre-apply tree.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::SkillPackage;
use crate::engine::{ApplyOutcome, Engine};
use crate::error::{GraftError, Result};
use crate::merge::has_conflict_markers;
use crate::utils::fs::{atomic_write, remove_dir_if_exists, remove_file_if_exists};

/// Record of an apply waiting on conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApply {
    pub skill: String,
    pub version: String,
    pub conflicts: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingApply {
    pub(crate) fn new(package: &SkillPackage, conflicts: Vec<String>) -> Self {
        Self {
            skill: package.name().to_string(),
            version: package.version().to_string(),
            conflicts,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn save(&self, path: &Path) -> Result<()> {
        atomic_write(path, serde_yaml::to_string(self)?.as_bytes())
    }

    /// Load the record, `None` when no apply is pending.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(Some(serde_yaml::from_str(&raw)?))
    }
}

/// What `resolve_abort` undid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbortReport {
    pub skill: String,
    /// Files put back from the backup.
    pub restored: usize,
}

impl Engine {
    /// The pending apply, if any.
    pub fn pending_apply(&self) -> Result<Option<PendingApply>> {
        PendingApply::load(&self.layout.pending_file())
    }

    /// Finish the pending apply after the user resolved every conflict.
    pub fn resolve_continue(&self) -> Result<ApplyOutcome> {
        let mut state = self.read_state()?;
        let pending = self.pending_apply()?.ok_or(GraftError::NoPendingOperation)?;

        let mut unresolved = Vec::new();
        for rel in &pending.conflicts {
            if let Some(content) = self.read_project(rel)? {
                if has_conflict_markers(&content) {
                    unresolved.push(rel.clone());
                }
            }
        }
        if !unresolved.is_empty() {
            return Err(GraftError::UnresolvedConflicts(unresolved));
        }

        let package = self.cached_package(&pending.skill)?;
        let _lock = self.lock("resolve")?;
        info!(skill = %pending.skill, "conflicts resolved, finishing apply");
        let outcome = ApplyOutcome::for_package(&package);
        self.finish_apply(&package, &mut state, outcome)
    }

    /// Drop the pending apply and restore the tree it started from.
    pub fn resolve_abort(&self) -> Result<AbortReport> {
        let state = self.read_state()?;
        let pending = self.pending_apply()?.ok_or(GraftError::NoPendingOperation)?;
        let _lock = self.lock("resolve")?;

        let restored = if self.backup.exists() {
            let restored = self.backup.restore(&self.resolver)?;
            self.backup.clear()?;
            restored
        } else {
            0
        };
        remove_file_if_exists(self.layout.pending_file())?;
        if !state.is_applied(&pending.skill) {
            remove_dir_if_exists(self.layout.skill_cache(&pending.skill))?;
        }

        info!(skill = %pending.skill, restored, "pending apply aborted");
        Ok(AbortReport {
            skill: pending.skill,
            restored,
        })
    }
}
