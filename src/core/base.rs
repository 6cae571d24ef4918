//! The base snapshot: frozen common ancestors for three-way merges.
//!
//! `.graft/base/` mirrors tracked project paths as they were before any
//! skill touched them. Entries are only written by `init`, by
//! capture-on-first-touch, and wholesale by a core update. Files that no
//! skill found pre-existing never get an entry.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;
use crate::security::PathResolver;
use crate::utils::fs::{
    copy_with_parents, list_files, read_optional, remove_dir_if_exists, remove_file_if_exists,
    write_with_parents,
};

#[derive(Debug, Clone)]
pub struct BaseSnapshot {
    dir: PathBuf,
}

impl BaseSnapshot {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for(&self, rel: &str) -> PathBuf {
        self.dir.join(rel)
    }

    #[must_use]
    pub fn has(&self, rel: &str) -> bool {
        self.path_for(rel).is_file()
    }

    pub fn read(&self, rel: &str) -> Result<Option<String>> {
        read_optional(self.path_for(rel))
    }

    pub fn read_bytes(&self, rel: &str) -> Result<Option<Vec<u8>>> {
        crate::utils::fs::read_bytes_optional(self.path_for(rel))
    }

    /// Capture the current project file as its ancestor if none exists yet.
    ///
    /// Returns whether a new entry was written. Missing project files are
    /// left without an entry.
    pub fn ensure_captured(&self, resolver: &PathResolver, rel: &str) -> Result<bool> {
        if self.has(rel) {
            return Ok(false);
        }
        let live = resolver.resolve(rel)?;
        if !live.is_file() {
            return Ok(false);
        }
        copy_with_parents(&live, self.path_for(rel))?;
        debug!(path = rel, "captured base entry on first touch");
        Ok(true)
    }

    /// Capture a list of project files, replacing existing entries.
    pub fn capture_files(&self, resolver: &PathResolver, files: &[String]) -> Result<usize> {
        let mut captured = 0;
        for rel in files {
            let live = resolver.resolve(rel)?;
            if live.is_file() {
                copy_with_parents(&live, self.path_for(rel))?;
                captured += 1;
            }
        }
        info!(files = captured, "base snapshot captured");
        Ok(captured)
    }

    /// Write one entry from bytes.
    pub fn write_entry(&self, rel: &str, content: &[u8]) -> Result<()> {
        write_with_parents(self.path_for(rel), content)
    }

    pub fn remove_entry(&self, rel: &str) -> Result<()> {
        remove_file_if_exists(self.path_for(rel))?;
        Ok(())
    }

    /// All entries, sorted.
    pub fn entries(&self) -> Result<Vec<String>> {
        list_files(&self.dir)
    }

    /// Replace this snapshot with the content of `staged`, consuming it.
    pub fn swap_in(&self, staged: &Self) -> Result<()> {
        remove_dir_if_exists(&self.dir)?;
        if let Some(parent) = self.dir.parent() {
            fs::create_dir_all(parent)?;
        }
        if staged.dir.is_dir() {
            fs::rename(&staged.dir, &self.dir)?;
        } else {
            fs::create_dir_all(&self.dir)?;
        }
        info!(dir = %self.dir.display(), "base snapshot refreshed");
        Ok(())
    }

    /// Replace the whole snapshot with a copy of `new_tree`.
    pub fn refresh(&self, new_tree: &Path) -> Result<()> {
        let staged = Self::new(self.dir.with_extension("next"));
        remove_dir_if_exists(staged.dir())?;
        fs::create_dir_all(staged.dir())?;
        for rel in list_files(new_tree)? {
            copy_with_parents(new_tree.join(&rel), staged.path_for(&rel))?;
        }
        self.swap_in(&staged)
    }
}
