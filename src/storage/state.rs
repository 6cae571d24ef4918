//! The persistent state ledger.
//!
//! One YAML document records the core version, the ordered list of applied
//! skills with per-path hashes, recorded customizations and the path remap
//! table. All persistence goes through a [`StateStore`] so pipelines can be
//! exercised against an in-memory double.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GraftError, Result};
use crate::utils::fs::atomic_write;

/// Schema version written by this build.
pub const SCHEMA_VERSION: &str = "0.1.0";

/// One skill in the applied stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedSkill {
    pub name: String,
    pub version: String,
    pub applied_at: DateTime<Utc>,
    /// Touched path -> sha256 of its content right after application.
    #[serde(default)]
    pub file_hashes: BTreeMap<String, String>,
}

/// A user edit captured by a customize session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomModification {
    pub description: String,
    pub applied_at: DateTime<Utc>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    /// Patch location relative to the project root.
    pub patch_file: String,
}

/// The whole state document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub schema_version: String,
    pub core_version: String,
    #[serde(default)]
    pub applied_skills: Vec<AppliedSkill>,
    #[serde(default)]
    pub custom_modifications: Vec<CustomModification>,
    #[serde(default)]
    pub path_remap: BTreeMap<String, String>,
}

impl StateRecord {
    /// A fresh record for a newly initialized project.
    #[must_use]
    pub fn new(core_version: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            core_version: core_version.into(),
            applied_skills: Vec::new(),
            custom_modifications: Vec::new(),
            path_remap: BTreeMap::new(),
        }
    }

    /// Reject records written by a newer, incompatible schema.
    ///
    /// Records sharing the supported major version (or minor, pre-1.0) are
    /// accepted even if their patch level differs.
    pub fn check_compatible(&self) -> Result<()> {
        let incompatible = || GraftError::IncompatibleSchema {
            found: self.schema_version.clone(),
            supported: SCHEMA_VERSION.to_string(),
        };
        let found = Version::parse(&self.schema_version).map_err(|_| incompatible())?;
        let supported = Version::parse(SCHEMA_VERSION).map_err(|_| incompatible())?;
        let compatible = if supported.major == 0 {
            found.major == 0 && found.minor == supported.minor
        } else {
            found.major == supported.major
        };
        if compatible && found <= supported {
            Ok(())
        } else {
            Err(incompatible())
        }
    }

    /// Append or update an applied skill entry, preserving stack position.
    pub fn record_application(
        &mut self,
        name: &str,
        version: &str,
        file_hashes: BTreeMap<String, String>,
    ) {
        let applied_at = Utc::now();
        if let Some(existing) = self.applied_skills.iter_mut().find(|s| s.name == name) {
            existing.version = version.to_string();
            existing.applied_at = applied_at;
            existing.file_hashes = file_hashes;
        } else {
            self.applied_skills.push(AppliedSkill {
                name: name.to_string(),
                version: version.to_string(),
                applied_at,
                file_hashes,
            });
        }
    }

    /// Append a customization entry.
    pub fn record_custom_modification(&mut self, entry: CustomModification) {
        self.custom_modifications.push(entry);
    }

    #[must_use]
    pub fn is_applied(&self, name: &str) -> bool {
        self.applied_skills.iter().any(|s| s.name == name)
    }

    #[must_use]
    pub fn skill(&self, name: &str) -> Option<&AppliedSkill> {
        self.applied_skills.iter().find(|s| s.name == name)
    }

    /// Names of applied skills in application order.
    #[must_use]
    pub fn applied_names(&self) -> Vec<String> {
        self.applied_skills.iter().map(|s| s.name.clone()).collect()
    }

    /// Hash recorded for `path` by the most recent skill that touched it.
    #[must_use]
    pub fn last_recorded_hash(&self, path: &str) -> Option<&str> {
        self.applied_skills
            .iter()
            .rev()
            .find_map(|s| s.file_hashes.get(path).map(String::as_str))
    }

    /// Every path any applied skill recorded.
    #[must_use]
    pub fn tracked_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .applied_skills
            .iter()
            .flat_map(|s| s.file_hashes.keys().cloned())
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

/// Persistence contract for the state record.
pub trait StateStore {
    /// Whether a record has been written.
    fn exists(&self) -> bool;

    /// Read and schema-check the record.
    fn read(&self) -> Result<StateRecord>;

    /// Atomically replace the record.
    fn write(&self, record: &StateRecord) -> Result<()>;
}

/// YAML file store at `.graft/state.yaml`.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn read(&self) -> Result<StateRecord> {
        if !self.exists() {
            let root = self
                .path
                .parent()
                .and_then(Path::parent)
                .unwrap_or(&self.path);
            return Err(GraftError::NotInitialized(root.to_path_buf()));
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let record: StateRecord = serde_yaml::from_str(&raw)?;
        record.check_compatible()?;
        Ok(record)
    }

    fn write(&self, record: &StateRecord) -> Result<()> {
        let raw = serde_yaml::to_string(record)?;
        atomic_write(&self.path, raw.as_bytes())?;
        debug!(path = %self.path.display(), "state written");
        Ok(())
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    record: RefCell<Option<StateRecord>>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_record(record: StateRecord) -> Self {
        Self {
            record: RefCell::new(Some(record)),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn exists(&self) -> bool {
        self.record.borrow().is_some()
    }

    fn read(&self) -> Result<StateRecord> {
        let record = self
            .record
            .borrow()
            .clone()
            .ok_or_else(|| GraftError::NotInitialized(PathBuf::from("<memory>")))?;
        record.check_compatible()?;
        Ok(record)
    }

    fn write(&self, record: &StateRecord) -> Result<()> {
        *self.record.borrow_mut() = Some(record.clone());
        Ok(())
    }
}

impl<T: StateStore + ?Sized> StateStore for std::rc::Rc<T> {
    fn exists(&self) -> bool {
        (**self).exists()
    }

    fn read(&self) -> Result<StateRecord> {
        (**self).read()
    }

    fn write(&self, record: &StateRecord) -> Result<()> {
        (**self).write(record)
    }
}
