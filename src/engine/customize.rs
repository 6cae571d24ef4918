//! Customize sessions: capture ad-hoc edits to tracked files as a patch.
//!
//! `start` snapshots every tracked file (hash plus content) under
//! `.graft/custom/pending/`. `commit` diffs the tree against that snapshot,
//! stores a multi-file patch as `.graft/custom/NNN-<slug>.patch` and records
//! it in the state. `abort` drops the snapshot and touches nothing else.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::{GraftError, Result};
use crate::merge::{FileChange, render_patch};
use crate::storage::CustomModification;
use crate::utils::fs::{
    atomic_write, read_bytes_optional, remove_dir_if_exists, remove_file_if_exists,
    write_with_parents,
};

const SLUG_MAX: usize = 40;

/// Marker for an active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomizeSession {
    pub id: String,
    pub description: String,
    pub started_at: DateTime<Utc>,
    /// Tracked path -> hash at session start.
    pub files: BTreeMap<String, String>,
}

impl CustomizeSession {
    fn load(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(Some(serde_yaml::from_str(&raw)?))
    }
}

/// Result of `commit_customize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub description: String,
    /// Project-relative patch location, `None` when nothing changed.
    pub patch_file: Option<String>,
    pub files_modified: Vec<String>,
    /// Changed files left out of the patch because they are not text.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

impl Engine {
    /// The active session, if any.
    pub fn customize_session(&self) -> Result<Option<CustomizeSession>> {
        CustomizeSession::load(&self.layout.customize_marker())
    }

    /// Begin a session.
    pub fn start_customize(&self, description: &str) -> Result<CustomizeSession> {
        let state = self.read_state()?;
        self.ensure_no_pending()?;
        if self.customize_session()?.is_some() {
            return Err(GraftError::CustomizeActive);
        }
        let description = description.trim();
        if description.is_empty() {
            return Err(GraftError::ValidationFailed(
                "customization description must not be empty".to_string(),
            ));
        }

        let _lock = self.lock_unchanged("customize", &state)?;
        if self.customize_session()?.is_some() {
            return Err(GraftError::CustomizeActive);
        }
        let snapshot_dir = self.layout.customize_snapshot_dir();
        remove_dir_if_exists(&snapshot_dir)?;

        let mut files = BTreeMap::new();
        for rel in self.tracked_files()? {
            if let Some(content) = self.read_project_bytes(&rel)? {
                files.insert(rel.clone(), crate::storage::hash_bytes(&content));
                write_with_parents(snapshot_dir.join(&rel), &content)?;
            }
        }

        let session = CustomizeSession {
            id: Uuid::new_v4().to_string(),
            description: description.to_string(),
            started_at: Utc::now(),
            files,
        };
        atomic_write(
            self.layout.customize_marker(),
            serde_yaml::to_string(&session)?.as_bytes(),
        )?;
        info!(id = %session.id, files = session.files.len(), "customize session started");
        Ok(session)
    }

    /// Record every change made since `start_customize` as one patch.
    pub fn commit_customize(&self) -> Result<CommitReport> {
        let session = self.customize_session()?.ok_or(GraftError::CustomizeNotActive)?;
        let mut state = self.read_state()?;
        let _lock = self.lock_unchanged("customize", &state)?;
        let snapshot_dir = self.layout.customize_snapshot_dir();

        let mut paths: BTreeSet<String> = session.files.keys().cloned().collect();
        paths.extend(self.tracked_files()?);

        let mut changes = Vec::new();
        let mut skipped = Vec::new();
        for rel in &paths {
            let before_hash = session.files.get(rel).map(String::as_str);
            let after_hash = self.hash_project(rel)?;
            if before_hash == after_hash.as_deref() {
                continue;
            }
            let before = read_bytes_optional(snapshot_dir.join(rel))?;
            let after = self.read_project_bytes(rel)?;
            match (as_text(before), as_text(after)) {
                (Ok(before), Ok(after)) => changes.push(FileChange {
                    path: rel.clone(),
                    before,
                    after,
                }),
                _ => {
                    warn!(path = %rel, "skipping non-text file in customization");
                    skipped.push(rel.clone());
                }
            }
        }

        let mut report = CommitReport {
            description: session.description.clone(),
            patch_file: None,
            files_modified: changes.iter().map(|c| c.path.clone()).collect(),
            skipped,
        };

        if !changes.is_empty() {
            let number = state.custom_modifications.len() + 1;
            let name = format!("{number:03}-{}.patch", slugify(&session.description));
            let patch_path = self.layout.custom_dir().join(&name);
            atomic_write(&patch_path, render_patch(&changes).as_bytes())?;

            // Replays reset these files to the base, so it needs their
            // pre-session content. Files a skill produced stay out of it.
            let produced: BTreeSet<String> = state.tracked_paths().into_iter().collect();
            for change in &changes {
                if let Some(before) = &change.before {
                    if !produced.contains(&change.path) && !self.base.has(&change.path) {
                        self.base.write_entry(&change.path, before.as_bytes())?;
                    }
                }
            }

            let patch_file = format!("{}/custom/{name}", super::GRAFT_DIR);
            state.record_custom_modification(CustomModification {
                description: session.description.clone(),
                applied_at: Utc::now(),
                files_modified: report.files_modified.clone(),
                patch_file: patch_file.clone(),
            });
            self.write_state(&state)?;
            info!(patch = %patch_file, files = report.files_modified.len(), "customization recorded");
            report.patch_file = Some(patch_file);
        } else {
            info!("customize session ended with no changes");
        }

        self.clear_session()?;
        Ok(report)
    }

    /// Drop the active session without touching files or state.
    pub fn abort_customize(&self) -> Result<CustomizeSession> {
        let session = self.customize_session()?.ok_or(GraftError::CustomizeNotActive)?;
        let _lock = self.lock("customize")?;
        self.clear_session()?;
        info!(id = %session.id, "customize session aborted");
        Ok(session)
    }

    fn clear_session(&self) -> Result<()> {
        remove_dir_if_exists(self.layout.customize_snapshot_dir())?;
        remove_file_if_exists(self.layout.customize_marker())?;
        Ok(())
    }
}

fn as_text(content: Option<Vec<u8>>) -> std::result::Result<Option<String>, ()> {
    content
        .map(|bytes| String::from_utf8(bytes).map_err(|_| ()))
        .transpose()
}

/// Lowercase, dash-separated file name fragment.
fn slugify(description: &str) -> String {
    let mut slug = String::new();
    for ch in description.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
        if slug.len() >= SLUG_MAX {
            break;
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "customization".to_string()
    } else {
        slug.to_string()
    }
}
