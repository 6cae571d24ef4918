//! Pipelines over one project: init, apply, uninstall, update and customize.
//!
//! An [`Engine`] owns the project layout, the loaded [`Config`] and the two
//! injected collaborators every pipeline goes through: the [`StateStore`]
//! and the [`ProcessRunner`]. Each mutating operation takes the project lock
//! for its whole duration.

pub mod apply;
pub mod customize;
pub mod replay;
pub mod resolve;
pub mod runner;
pub mod status;
pub mod uninstall;
pub mod update;

pub use apply::ApplyOutcome;
pub use customize::{CommitReport, CustomizeSession};
pub use replay::SkillReplayResult;
pub use resolve::{AbortReport, PendingApply};
pub use runner::{CommandOutcome, ProcessRunner, ScriptedRunner, ShellRunner};
pub use status::{FileState, FileStatus, SkillStatus, StatusReport};
pub use uninstall::UninstallOutcome;
pub use update::{Migration, MigrationRename, UpdateOutcome, UpdatePreview};

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use glob::Pattern;
use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::Config;
use crate::core::{BaseSnapshot, SkillManifest, SkillPackage, StructuredEdits};
use crate::error::{GraftError, Result};
use crate::security::{PathResolver, normalize_relative};
use crate::storage::hash::hash_optional;
use crate::storage::{BackupArea, FileStateStore, ProjectLock, StateRecord, StateStore};
use crate::utils::fs::{
    ensure_dir, prune_empty_parents, read_optional, remove_file_if_exists, to_slash,
    write_with_parents,
};

/// Name of the engine's private directory under the project root.
pub const GRAFT_DIR: &str = ".graft";

/// Fixed locations under `.graft/`.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn graft_dir(&self) -> PathBuf {
        self.root.join(GRAFT_DIR)
    }

    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.graft_dir().join("state.yaml")
    }

    #[must_use]
    pub fn base_dir(&self) -> PathBuf {
        self.graft_dir().join("base")
    }

    /// Where a core update stages the next base snapshot.
    #[must_use]
    pub fn staged_base_dir(&self) -> PathBuf {
        self.graft_dir().join("base.next")
    }

    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.graft_dir().join("backup")
    }

    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.graft_dir().join("lock")
    }

    #[must_use]
    pub fn custom_dir(&self) -> PathBuf {
        self.graft_dir().join("custom")
    }

    #[must_use]
    pub fn customize_marker(&self) -> PathBuf {
        self.custom_dir().join("pending.yaml")
    }

    #[must_use]
    pub fn customize_snapshot_dir(&self) -> PathBuf {
        self.custom_dir().join("pending")
    }

    #[must_use]
    pub fn pending_file(&self) -> PathBuf {
        self.graft_dir().join("pending.yaml")
    }

    #[must_use]
    pub fn skills_dir(&self) -> PathBuf {
        self.graft_dir().join("skills")
    }

    #[must_use]
    pub fn skill_cache(&self, name: &str) -> PathBuf {
        self.skills_dir().join(name)
    }

    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.graft_dir().join("config.toml")
    }
}

/// Result of `init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub core_version: String,
    pub files_captured: usize,
}

pub struct Engine {
    layout: Layout,
    config: Config,
    resolver: PathResolver,
    base: BaseSnapshot,
    backup: BackupArea,
    store: Box<dyn StateStore>,
    runner: Box<dyn ProcessRunner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root", &self.layout.root)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Open the project at `root` with the file-backed state store and a
    /// shell runner configured from `config`.
    pub fn open(root: &Path, config: Config) -> Result<Self> {
        let resolver = PathResolver::new(root)?;
        let layout = Layout::new(resolver.root());
        let store = Box::new(FileStateStore::new(layout.state_file()));
        let runner = Box::new(ShellRunner::new(
            config.commands.shell.clone(),
            config.commands.timeout(),
        ));
        Ok(Self::assemble(resolver, layout, config, store, runner))
    }

    /// Open the project with caller-supplied collaborators.
    pub fn with_parts(
        root: &Path,
        config: Config,
        store: Box<dyn StateStore>,
        runner: Box<dyn ProcessRunner>,
    ) -> Result<Self> {
        let resolver = PathResolver::new(root)?;
        let layout = Layout::new(resolver.root());
        Ok(Self::assemble(resolver, layout, config, store, runner))
    }

    fn assemble(
        resolver: PathResolver,
        layout: Layout,
        config: Config,
        store: Box<dyn StateStore>,
        runner: Box<dyn ProcessRunner>,
    ) -> Self {
        Self {
            base: BaseSnapshot::new(layout.base_dir()),
            backup: BackupArea::new(layout.backup_dir()),
            layout,
            config,
            resolver,
            store,
            runner,
        }
    }

    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    #[must_use]
    pub const fn base(&self) -> &BaseSnapshot {
        &self.base
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.store.exists()
    }

    /// Read the state record. Unsafe remap entries are dropped, not fatal.
    pub fn read_state(&self) -> Result<StateRecord> {
        let mut record = self.store.read()?;
        record.path_remap = self.resolver.sanitize_remap(&record.path_remap);
        Ok(record)
    }

    pub(crate) fn write_state(&self, record: &StateRecord) -> Result<()> {
        self.store.write(record)
    }

    /// Initialize the project: capture every tracked file into the base
    /// snapshot and write an empty state record.
    pub fn init(&self, core_version: &str) -> Result<InitReport> {
        if self.store.exists() {
            return Err(GraftError::AlreadyInitialized(self.layout.root.clone()));
        }
        let core_version = core_version.trim();
        if core_version.is_empty() {
            return Err(GraftError::ValidationFailed(
                "core version must not be empty".to_string(),
            ));
        }

        let _lock = self.lock("init")?;
        ensure_dir(self.layout.base_dir())?;
        ensure_dir(self.layout.custom_dir())?;
        ensure_dir(self.layout.skills_dir())?;

        let files = self.tracked_files()?;
        let files_captured = self.base.capture_files(&self.resolver, &files)?;
        self.store.write(&StateRecord::new(core_version))?;

        info!(core_version, files = files_captured, "project initialized");
        Ok(InitReport {
            core_version: core_version.to_string(),
            files_captured,
        })
    }

    /// Every tracked project file, relative and sorted.
    ///
    /// Walks the configured include roots and skips anything matching an
    /// exclude pattern. `.graft/` is never tracked.
    pub fn tracked_files(&self) -> Result<Vec<String>> {
        let excludes = self.exclude_patterns()?;
        let root = self.resolver.root();
        let mut files = BTreeSet::new();

        for include in &self.config.tracking.include {
            let include = normalize_relative(include);
            let start = if include.is_empty() || include == "." {
                root.to_path_buf()
            } else {
                self.resolver.resolve(&include)?
            };
            if !start.exists() {
                debug!(include = %include, "tracking root does not exist");
                continue;
            }

            let walker = WalkDir::new(&start)
                .follow_links(false)
                .into_iter()
                .filter_entry(|entry| {
                    entry
                        .path()
                        .strip_prefix(root)
                        .map_or(true, |rel| !is_excluded(&to_slash(rel), &excludes))
                });
            for entry in walker {
                let entry = entry.map_err(std::io::Error::from)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Ok(rel) = entry.path().strip_prefix(root) {
                    files.insert(to_slash(rel));
                }
            }
        }
        Ok(files.into_iter().collect())
    }

    fn exclude_patterns(&self) -> Result<Vec<Pattern>> {
        self.config
            .tracking
            .exclude
            .iter()
            .map(|raw| {
                Pattern::new(raw).map_err(|err| {
                    GraftError::Config(format!("invalid tracking exclude `{raw}`: {err}"))
                })
            })
            .collect()
    }

    /// Whether a project-relative path is outside tracking.
    pub(crate) fn is_excluded(&self, rel: &str) -> Result<bool> {
        Ok(is_excluded(rel, &self.exclude_patterns()?))
    }

    pub(crate) fn lock(&self, operation: &str) -> Result<ProjectLock> {
        ProjectLock::acquire(
            &self.layout.lock_file(),
            operation,
            self.config.lock.stale_after(),
        )
    }

    /// Take the lock for a mutation planned against `seen`.
    ///
    /// Fails with `StateChanged` when another invocation rewrote the state
    /// between the preflight read and the acquisition, and with
    /// `PendingOperation` when it left a stopped apply behind.
    pub(crate) fn lock_unchanged(&self, operation: &str, seen: &StateRecord) -> Result<ProjectLock> {
        let lock = self.lock(operation)?;
        if self.read_state()? != *seen {
            return Err(GraftError::StateChanged {
                operation: operation.to_string(),
            });
        }
        self.ensure_no_pending()?;
        Ok(lock)
    }

    pub(crate) fn ensure_no_pending(&self) -> Result<()> {
        match PendingApply::load(&self.layout.pending_file())? {
            Some(pending) => Err(GraftError::PendingOperation(format!(
                "apply of '{}' stopped on conflicts in {}",
                pending.skill,
                pending.conflicts.join(", ")
            ))),
            None => Ok(()),
        }
    }

    pub(crate) fn ensure_no_customize(&self) -> Result<()> {
        if self.layout.customize_marker().is_file() {
            Err(GraftError::CustomizeActive)
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Project file access (always through the resolver)
    // =========================================================================

    pub(crate) fn read_project(&self, rel: &str) -> Result<Option<String>> {
        read_optional(self.resolver.resolve(rel)?)
    }

    pub(crate) fn read_project_bytes(&self, rel: &str) -> Result<Option<Vec<u8>>> {
        crate::utils::fs::read_bytes_optional(self.resolver.resolve(rel)?)
    }

    pub(crate) fn write_project(&self, rel: &str, content: &[u8]) -> Result<()> {
        write_with_parents(self.resolver.resolve(rel)?, content)
    }

    pub(crate) fn remove_project(&self, rel: &str) -> Result<bool> {
        let live = self.resolver.resolve(rel)?;
        let removed = remove_file_if_exists(&live)?;
        if removed {
            prune_empty_parents(&live, self.resolver.root());
        }
        Ok(removed)
    }

    pub(crate) fn hash_project(&self, rel: &str) -> Result<Option<String>> {
        hash_optional(&self.resolver.resolve(rel)?)
    }

    /// Hashes of the given paths that currently exist.
    pub(crate) fn hash_paths<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a String>,
    ) -> Result<BTreeMap<String, String>> {
        let mut hashes = BTreeMap::new();
        for rel in paths {
            if let Some(hash) = self.hash_project(rel)? {
                hashes.insert(rel.clone(), hash);
            }
        }
        Ok(hashes)
    }

    // =========================================================================
    // Skills and commands
    // =========================================================================

    /// The cached package of an applied (or pending) skill.
    pub(crate) fn cached_package(&self, name: &str) -> Result<SkillPackage> {
        SkillPackage::load(&self.layout.skill_cache(name))
    }

    /// Cached packages of every applied skill, in application order.
    pub(crate) fn applied_packages(&self, state: &StateRecord) -> Result<Vec<SkillPackage>> {
        state
            .applied_skills
            .iter()
            .map(|skill| self.cached_package(&skill.name))
            .collect()
    }

    /// Paths a manifest writes, after remapping.
    pub(crate) fn touched_for(
        &self,
        manifest: &SkillManifest,
        remap: &BTreeMap<String, String>,
    ) -> Vec<String> {
        let mut paths: Vec<String> = manifest
            .touched_paths()
            .iter()
            .map(|rel| self.resolver.remap(rel, remap).to_string())
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// Shared manifest files a set of structured edits writes.
    pub(crate) fn structured_paths(&self, edits: &StructuredEdits) -> Vec<String> {
        let cfg = &self.config.structured;
        let mut paths = Vec::new();
        if !edits.dependency_additions.is_empty() {
            paths.push(cfg.dependency_file.clone());
        }
        if !edits.env_additions.is_empty() {
            paths.push(cfg.env_file.clone());
        }
        if !edits.service_additions.is_empty() {
            paths.push(cfg.services_file.clone());
        }
        paths
    }

    /// Every path a skill's commit records a hash for.
    pub(crate) fn recorded_paths(
        &self,
        manifest: &SkillManifest,
        remap: &BTreeMap<String, String>,
    ) -> Vec<String> {
        let mut paths = self.touched_for(manifest, remap);
        paths.extend(self.structured_paths(&manifest.structured));
        paths.sort();
        paths.dedup();
        paths
    }

    pub(crate) fn run_command(&self, command: &str) -> Result<CommandOutcome> {
        info!(command, "running command");
        self.runner.run(command, self.resolver.root())
    }

    /// Run `command` and turn a non-zero exit or timeout into an error.
    pub(crate) fn run_checked(&self, command: &str, purpose: &str) -> Result<()> {
        let outcome = self.run_command(command)?;
        if outcome.success() {
            debug!(command, purpose, "command succeeded");
            Ok(())
        } else {
            Err(GraftError::CommandFailed {
                command: command.to_string(),
                reason: format!("{purpose} {}", outcome.describe()),
            })
        }
    }
}

fn is_excluded(rel: &str, patterns: &[Pattern]) -> bool {
    if rel.is_empty() {
        return false;
    }
    if rel == GRAFT_DIR || rel.starts_with(&format!("{GRAFT_DIR}/")) {
        return true;
    }
    patterns.iter().any(|pattern| {
        pattern.matches(rel) || rel.split('/').any(|component| pattern.matches(component))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ProjectFixture;

    #[test]
    fn test_init_captures_tracked_tree() {
        let fixture = ProjectFixture::new();
        fixture.write("src/app.txt", "app\n");
        fixture.write("README.md", "readme\n");
        fixture.write("node_modules/dep/index.js", "ignored\n");
        fixture.write(".git/HEAD", "ref\n");

        let engine = fixture.engine();
        let report = engine.init("1.0.0").unwrap();
        assert_eq!(report.files_captured, 2);

        let state = engine.read_state().unwrap();
        assert!(state.applied_skills.is_empty());
        assert_eq!(state.core_version, "1.0.0");
        assert_eq!(
            engine.base().entries().unwrap(),
            vec!["README.md", "src/app.txt"]
        );
    }

    #[test]
    fn test_init_twice_fails() {
        let fixture = ProjectFixture::new();
        let engine = fixture.init("1.0.0");
        assert!(matches!(
            engine.init("1.0.0"),
            Err(GraftError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_init_rejects_blank_version() {
        let fixture = ProjectFixture::new();
        assert!(fixture.engine().init("  ").is_err());
    }

    #[test]
    fn test_read_state_requires_init() {
        let fixture = ProjectFixture::new();
        assert!(matches!(
            fixture.engine().read_state(),
            Err(GraftError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_read_state_drops_unsafe_remap_entries() {
        let fixture = ProjectFixture::new();
        let engine = fixture.init("1.0.0");
        let mut state = engine.read_state().unwrap();
        state.path_remap.insert("a.txt".into(), "b.txt".into());
        state.path_remap.insert("c.txt".into(), "../escape.txt".into());
        engine.write_state(&state).unwrap();

        let loaded = engine.read_state().unwrap();
        assert_eq!(loaded.path_remap.len(), 1);
        assert_eq!(loaded.path_remap.get("a.txt").map(String::as_str), Some("b.txt"));
    }

    #[test]
    fn test_lock_unchanged_rejects_state_rewritten_before_acquire() {
        let fixture = ProjectFixture::new();
        let engine = fixture.init("1.0.0");
        let seen = engine.read_state().unwrap();

        let mut newer = seen.clone();
        newer.core_version = "1.1.0".to_string();
        engine.write_state(&newer).unwrap();

        assert!(matches!(
            engine.lock_unchanged("apply", &seen),
            Err(GraftError::StateChanged { .. })
        ));
        assert!(!ProjectLock::is_held(&engine.layout().lock_file()));

        let guard = engine.lock_unchanged("apply", &newer).unwrap();
        assert!(ProjectLock::is_held(&engine.layout().lock_file()));
        drop(guard);
    }

    #[test]
    fn test_exclude_matches_components_and_paths() {
        let patterns = vec![
            Pattern::new("target").unwrap(),
            Pattern::new("*.log").unwrap(),
            Pattern::new("docs/drafts/*").unwrap(),
        ];
        assert!(is_excluded("target/debug/app", &patterns));
        assert!(is_excluded("src/server.log", &patterns));
        assert!(is_excluded("docs/drafts/one.md", &patterns));
        assert!(is_excluded(".graft/state.yaml", &patterns));
        assert!(!is_excluded("src/main.rs", &patterns));
        assert!(!is_excluded("", &patterns));
    }
}
