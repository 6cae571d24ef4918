//! Pre-mutation backups.
//!
//! Before a pipeline touches project files it copies each one into
//! `.graft/backup/files/` and records whether the path existed at all. A
//! restore puts every existing file back (verifying its hash) and deletes
//! paths that did not exist before, which undoes adds as well as edits.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GraftError, Result};
use crate::security::PathResolver;
use crate::storage::hash::{compute_hash, hash_bytes};
use crate::utils::fs::{
    atomic_write, copy_with_parents, ensure_dir, prune_empty_parents, remove_dir_if_exists,
    remove_file_if_exists, write_with_parents,
};

const MANIFEST_FILE: &str = "manifest.yaml";
const FILES_DIR: &str = "files";

/// One backed-up path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub path: String,
    pub existed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Index of a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub operation: String,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<BackupEntry>,
}

impl BackupManifest {
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.entries.iter().any(|e| e.path == path)
    }
}

/// The backup area under `.graft/backup`.
#[derive(Debug, Clone)]
pub struct BackupArea {
    dir: PathBuf,
}

impl BackupArea {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.dir.join(MANIFEST_FILE).is_file()
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    fn stored_path(&self, rel: &str) -> PathBuf {
        self.dir.join(FILES_DIR).join(rel)
    }

    /// Start a fresh backup covering `paths`.
    pub fn create<S: AsRef<str>>(
        &self,
        resolver: &PathResolver,
        operation: &str,
        paths: &[S],
    ) -> Result<BackupManifest> {
        self.clear()?;
        ensure_dir(self.dir.join(FILES_DIR))?;
        let mut manifest = BackupManifest {
            operation: operation.to_string(),
            created_at: Utc::now(),
            entries: Vec::new(),
        };
        self.add_entries(resolver, &mut manifest, paths)?;
        self.save(&manifest)?;
        info!(operation, files = manifest.entries.len(), "backup created");
        Ok(manifest)
    }

    /// Add more paths to the current backup. Already-covered paths keep
    /// their original content.
    pub fn extend<S: AsRef<str>>(&self, resolver: &PathResolver, paths: &[S]) -> Result<()> {
        let mut manifest = self
            .load()?
            .ok_or_else(|| GraftError::BackupCorrupted("no backup in progress".into()))?;
        self.add_entries(resolver, &mut manifest, paths)?;
        self.save(&manifest)
    }

    fn add_entries<S: AsRef<str>>(
        &self,
        resolver: &PathResolver,
        manifest: &mut BackupManifest,
        paths: &[S],
    ) -> Result<()> {
        for rel in paths {
            let rel = rel.as_ref();
            if manifest.contains(rel) {
                continue;
            }
            let live = resolver.resolve(rel)?;
            let entry = if live.is_file() {
                copy_with_parents(&live, self.stored_path(rel))?;
                BackupEntry {
                    path: rel.to_string(),
                    existed: true,
                    hash: Some(compute_hash(&live)?),
                }
            } else {
                BackupEntry {
                    path: rel.to_string(),
                    existed: false,
                    hash: None,
                }
            };
            debug!(path = rel, existed = entry.existed, "backed up");
            manifest.entries.push(entry);
        }
        Ok(())
    }

    fn save(&self, manifest: &BackupManifest) -> Result<()> {
        atomic_write(self.manifest_path(), serde_yaml::to_string(manifest)?.as_bytes())
    }

    /// Load the backup index if one exists.
    pub fn load(&self) -> Result<Option<BackupManifest>> {
        if !self.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(self.manifest_path())?;
        Ok(Some(serde_yaml::from_str(&raw)?))
    }

    /// Put every backed-up path back the way it was.
    pub fn restore(&self, resolver: &PathResolver) -> Result<usize> {
        let manifest = self
            .load()?
            .ok_or_else(|| GraftError::BackupCorrupted("no backup to restore".into()))?;
        for entry in &manifest.entries {
            let live = resolver.resolve(&entry.path)?;
            if entry.existed {
                let content = std::fs::read(self.stored_path(&entry.path))?;
                if let Some(expected) = &entry.hash {
                    if &hash_bytes(&content) != expected {
                        return Err(GraftError::BackupCorrupted(format!(
                            "hash mismatch for {}",
                            entry.path
                        )));
                    }
                }
                write_with_parents(&live, &content)?;
            } else if remove_file_if_exists(&live)? {
                prune_empty_parents(&live, resolver.root());
            }
        }
        info!(operation = %manifest.operation, files = manifest.entries.len(), "backup restored");
        Ok(manifest.entries.len())
    }

    /// Restore only the listed paths, leaving the rest of the backup intact.
    pub fn restore_paths<S: AsRef<str>>(&self, resolver: &PathResolver, paths: &[S]) -> Result<()> {
        let manifest = self
            .load()?
            .ok_or_else(|| GraftError::BackupCorrupted("no backup to restore".into()))?;
        for rel in paths {
            let rel = rel.as_ref();
            let Some(entry) = manifest.entries.iter().find(|e| e.path == rel) else {
                continue;
            };
            let live = resolver.resolve(rel)?;
            if entry.existed {
                copy_with_parents(self.stored_path(rel), &live)?;
            } else if remove_file_if_exists(&live)? {
                prune_empty_parents(&live, resolver.root());
            }
        }
        Ok(())
    }

    /// Discard the backup.
    pub fn clear(&self) -> Result<()> {
        remove_dir_if_exists(&self.dir)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathResolver, BackupArea) {
        let temp = TempDir::new().unwrap();
        let resolver = PathResolver::new(temp.path()).unwrap();
        let area = BackupArea::new(temp.path().join(".graft/backup"));
        (temp, resolver, area)
    }

    #[test]
    fn test_restore_undoes_edits_and_adds() {
        let (temp, resolver, area) = setup();
        fs::write(temp.path().join("a.txt"), "original").unwrap();

        area.create(&resolver, "apply", &["a.txt", "new/b.txt"]).unwrap();
        fs::write(temp.path().join("a.txt"), "changed").unwrap();
        write_with_parents(temp.path().join("new/b.txt"), b"added").unwrap();

        area.restore(&resolver).unwrap();
        assert_eq!(fs::read_to_string(temp.path().join("a.txt")).unwrap(), "original");
        assert!(!temp.path().join("new/b.txt").exists());
        assert!(!temp.path().join("new").exists());
    }

    #[test]
    fn test_restore_recreates_deleted_file() {
        let (temp, resolver, area) = setup();
        fs::write(temp.path().join("gone.txt"), "keep me").unwrap();
        area.create(&resolver, "apply", &["gone.txt"]).unwrap();
        fs::remove_file(temp.path().join("gone.txt")).unwrap();

        area.restore(&resolver).unwrap();
        assert_eq!(fs::read_to_string(temp.path().join("gone.txt")).unwrap(), "keep me");
    }

    #[test]
    fn test_extend_keeps_first_copy() {
        let (temp, resolver, area) = setup();
        fs::write(temp.path().join("a.txt"), "v1").unwrap();
        area.create(&resolver, "update", &["a.txt"]).unwrap();
        fs::write(temp.path().join("a.txt"), "v2").unwrap();
        area.extend(&resolver, &["a.txt", "b.txt"]).unwrap();

        let manifest = area.load().unwrap().unwrap();
        assert_eq!(manifest.entries.len(), 2);
        area.restore(&resolver).unwrap();
        assert_eq!(fs::read_to_string(temp.path().join("a.txt")).unwrap(), "v1");
    }

    #[test]
    fn test_corrupted_backup_detected() {
        let (temp, resolver, area) = setup();
        fs::write(temp.path().join("a.txt"), "original").unwrap();
        area.create(&resolver, "apply", &["a.txt"]).unwrap();
        fs::write(area.dir().join("files/a.txt"), "tampered").unwrap();

        assert!(matches!(
            area.restore(&resolver),
            Err(GraftError::BackupCorrupted(_))
        ));
    }

    #[test]
    fn test_backup_rejects_escaping_path() {
        let (_temp, resolver, area) = setup();
        assert!(matches!(
            area.create(&resolver, "apply", &["../evil"]),
            Err(GraftError::PathSafety(_))
        ));
    }

    #[test]
    fn test_clear_removes_area() {
        let (temp, resolver, area) = setup();
        fs::write(temp.path().join("a.txt"), "x").unwrap();
        area.create(&resolver, "apply", &["a.txt"]).unwrap();
        assert!(area.exists());
        area.clear().unwrap();
        assert!(!area.exists());
    }
}
