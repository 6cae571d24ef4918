//! Read-only view of a project: the applied stack, drift against the hashes
//! recorded at application time, and any operation in flight.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;

use crate::engine::{Engine, PendingApply};
use crate::error::Result;
use crate::storage::{CustomModification, LockHolder, ProjectLock};

/// How a recorded file compares with its recorded hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Clean,
    Modified,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    pub path: String,
    pub state: FileState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillStatus {
    pub name: String,
    pub version: String,
    pub applied_at: DateTime<Utc>,
    pub files: Vec<FileStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub core_version: String,
    pub schema_version: String,
    pub skills: Vec<SkillStatus>,
    pub custom_modifications: Vec<CustomModification>,
    /// Description of the active customize session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customize_session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_apply: Option<PendingApply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_holder: Option<LockHolder>,
}

impl StatusReport {
    /// Recorded paths whose content no longer matches, deduplicated.
    #[must_use]
    pub fn drifted(&self) -> Vec<&str> {
        self.skills
            .iter()
            .flat_map(|s| s.files.iter())
            .filter(|f| f.state != FileState::Clean)
            .map(|f| f.path.as_str())
            .sorted_unstable()
            .dedup()
            .collect()
    }
}

impl Engine {
    /// Summarize the project state.
    pub fn status(&self) -> Result<StatusReport> {
        let state = self.read_state()?;

        let mut skills = Vec::with_capacity(state.applied_skills.len());
        for applied in &state.applied_skills {
            let mut files = Vec::with_capacity(applied.file_hashes.len());
            for path in applied.file_hashes.keys() {
                let expected = state.last_recorded_hash(path);
                let file_state = match self.hash_project(path)? {
                    None => FileState::Missing,
                    Some(actual) if Some(actual.as_str()) == expected => FileState::Clean,
                    Some(_) => FileState::Modified,
                };
                files.push(FileStatus {
                    path: path.clone(),
                    state: file_state,
                });
            }
            skills.push(SkillStatus {
                name: applied.name.clone(),
                version: applied.version.clone(),
                applied_at: applied.applied_at,
                files,
            });
        }

        Ok(StatusReport {
            core_version: state.core_version,
            schema_version: state.schema_version,
            skills,
            custom_modifications: state.custom_modifications,
            customize_session: self.customize_session()?.map(|s| s.description),
            pending_apply: self.pending_apply()?,
            lock_holder: ProjectLock::status(&self.layout.lock_file())?,
        })
    }
}
