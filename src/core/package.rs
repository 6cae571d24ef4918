//! Skill packages on disk.
//!
//! ```text
//! <package>/
//!   manifest.yaml
//!   add/<path>      literal content for every `adds` entry
//!   modify/<path>   literal content for every `modifies` entry
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::manifest::SkillManifest;
use crate::error::{GraftError, Result};
use crate::utils::fs::{copy_tree, remove_dir_if_exists};

pub const MANIFEST_FILE: &str = "manifest.yaml";
const ADD_DIR: &str = "add";
const MODIFY_DIR: &str = "modify";

/// A loaded, validated skill package.
#[derive(Debug, Clone)]
pub struct SkillPackage {
    dir: PathBuf,
    pub manifest: SkillManifest,
}

impl SkillPackage {
    /// Load the package rooted at `dir`.
    ///
    /// Fails if the manifest is missing or invalid, or if any declared
    /// content file is absent.
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(GraftError::PackageNotFound(dir.to_path_buf()));
        }
        let raw = fs::read_to_string(&manifest_path)?;
        let manifest = SkillManifest::from_yaml_str(&raw)?;

        for path in &manifest.adds {
            if !dir.join(ADD_DIR).join(path).is_file() {
                return Err(GraftError::InvalidManifest(format!(
                    "{}: add/{path} is missing",
                    manifest.skill
                )));
            }
        }
        for path in &manifest.modifies {
            if !dir.join(MODIFY_DIR).join(path).is_file() {
                return Err(GraftError::InvalidManifest(format!(
                    "{}: modify/{path} is missing",
                    manifest.skill
                )));
            }
        }
        debug!(skill = %manifest.skill, dir = %dir.display(), "loaded skill package");
        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.manifest.skill
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn add_content_path(&self, rel: &str) -> PathBuf {
        self.dir.join(ADD_DIR).join(rel)
    }

    #[must_use]
    pub fn modify_content_path(&self, rel: &str) -> PathBuf {
        self.dir.join(MODIFY_DIR).join(rel)
    }

    /// Authored replacement content for a `modifies` path.
    pub fn read_modify(&self, rel: &str) -> Result<String> {
        Ok(fs::read_to_string(self.modify_content_path(rel))?)
    }

    /// Copy the whole package to `dest`, replacing anything there.
    pub fn copy_to(&self, dest: &Path) -> Result<Self> {
        if dest == self.dir {
            return Ok(self.clone());
        }
        remove_dir_if_exists(dest)?;
        copy_tree(&self.dir, dest)?;
        Ok(Self {
            dir: dest.to_path_buf(),
            manifest: self.manifest.clone(),
        })
    }
}
