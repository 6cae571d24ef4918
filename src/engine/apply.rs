//! The apply pipeline.
//!
//! preflight -> drift check -> lock -> backup -> file ops -> adds -> merges
//! -> structured merges -> install -> post-apply -> test gate -> commit.
//!
//! Everything before the backup is side-effect free and reports problems as
//! errors. Once files may have changed, failures are reported as an
//! unsuccessful [`ApplyOutcome`] after the backup has been restored. Merge
//! conflicts keep the backup and leave a pending record for `resolve`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use semver::Version;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::{BaseSnapshot, FileOp, ModifyBase, SkillManifest, SkillPackage, StructuredEdits};
use crate::engine::Engine;
use crate::engine::resolve::PendingApply;
use crate::error::{GraftError, Result};
use crate::merge::merge3;
use crate::merge::structured::{merge_dependencies, merge_env, merge_services};
use crate::storage::StateRecord;
use crate::utils::fs::{copy_with_parents, prune_empty_parents, read_optional, remove_dir_if_exists, remove_file_if_exists};

/// What `apply` (or `resolve continue`) produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    pub success: bool,
    pub skill: String,
    pub version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Modified paths that changed since a skill last wrote them.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub drift: Vec<String>,
    /// The backup was kept because conflicts await resolution.
    pub backup_pending: bool,
}

impl ApplyOutcome {
    pub(crate) fn for_package(package: &SkillPackage) -> Self {
        Self {
            skill: package.name().to_string(),
            version: package.version().to_string(),
            ..Self::default()
        }
    }
}

/// Snapshot that skill content was authored against, when it differs from
/// the base files are reset to (a core update).
#[derive(Clone, Copy)]
pub(crate) struct AncestorSource<'a> {
    pub snapshot: &'a BaseSnapshot,
    /// Current path -> path in `snapshot`, for files renamed since.
    pub aliases: &'a BTreeMap<String, String>,
}

impl AncestorSource<'_> {
    fn read(&self, dest: &str) -> Result<Option<String>> {
        let key = self.aliases.get(dest).map_or(dest, String::as_str);
        self.snapshot.read(key)
    }
}

/// Per-operation bookkeeping shared by consecutive skill bodies.
pub(crate) struct BodyContext<'a> {
    pub base: &'a BaseSnapshot,
    pub ancestors: Option<AncestorSource<'a>>,
    pub remap: &'a BTreeMap<String, String>,
    /// Paths written by skills earlier in this operation or the stack.
    pub produced: BTreeSet<String>,
}

impl<'a> BodyContext<'a> {
    pub(crate) fn new(base: &'a BaseSnapshot, remap: &'a BTreeMap<String, String>) -> Self {
        Self {
            base,
            ancestors: None,
            remap,
            produced: BTreeSet::new(),
        }
    }
}

/// File-level result of one skill body.
#[derive(Debug, Default)]
pub(crate) struct BodyOutcome {
    pub conflicts: Vec<String>,
}

impl Engine {
    /// Apply the skill package at `package_dir`.
    pub fn apply(&self, package_dir: &std::path::Path) -> Result<ApplyOutcome> {
        let package = SkillPackage::load(package_dir)?;
        self.apply_package(&package)
    }

    /// Apply an already loaded package.
    pub fn apply_package(&self, package: &SkillPackage) -> Result<ApplyOutcome> {
        let mut state = self.read_state()?;
        self.ensure_no_customize()?;
        self.ensure_no_pending()?;
        self.preflight(&package.manifest, &state)?;

        let mut outcome = ApplyOutcome::for_package(package);
        outcome.drift = self.detect_drift(&package.manifest, &state)?;

        let _lock = self.lock_unchanged("apply", &state)?;
        self.ensure_no_customize()?;
        let backup_paths = self.recorded_paths(&package.manifest, &state.path_remap);
        self.backup.create(
            &self.resolver,
            &format!("apply {}", package.name()),
            &backup_paths,
        )?;

        let mut ctx = BodyContext::new(&self.base, &state.path_remap);
        ctx.produced.extend(state.tracked_paths());
        let body = match self.apply_body(package, &mut ctx) {
            Ok(body) => body,
            Err(err) => return self.roll_back(outcome, &err),
        };

        if !body.conflicts.is_empty() {
            package.copy_to(&self.layout.skill_cache(package.name()))?;
            PendingApply::new(package, body.conflicts.clone()).save(&self.layout.pending_file())?;
            warn!(
                skill = package.name(),
                files = ?body.conflicts,
                "merge conflicts; resolve them and run `graft resolve continue`, or `graft resolve abort`"
            );
            outcome.conflicts = body.conflicts;
            outcome.backup_pending = true;
            return Ok(outcome);
        }

        self.finish_apply(package, &mut state, outcome)
    }

    /// Steps after a clean merge: structured merges, commands, test gate and
    /// commit. Used directly by apply and by `resolve continue`.
    pub(crate) fn finish_apply(
        &self,
        package: &SkillPackage,
        state: &mut StateRecord,
        outcome: ApplyOutcome,
    ) -> Result<ApplyOutcome> {
        if let Err(err) = self.run_finishing_steps(package) {
            return self.roll_back(outcome, &err);
        }

        let recorded = self.recorded_paths(&package.manifest, &state.path_remap);
        let hashes = self.hash_paths(&recorded)?;
        state.record_application(package.name(), package.version(), hashes);
        package.copy_to(&self.layout.skill_cache(package.name()))?;
        self.write_state(state)?;
        self.backup.clear()?;
        remove_file_if_exists(self.layout.pending_file())?;

        info!(skill = package.name(), version = package.version(), "skill applied");
        Ok(ApplyOutcome {
            success: true,
            backup_pending: false,
            ..outcome
        })
    }

    fn run_finishing_steps(&self, package: &SkillPackage) -> Result<()> {
        let manifest = &package.manifest;
        if self.apply_structured(&manifest.structured, &self.base)? {
            self.run_install()?;
        }
        for command in &manifest.post_apply {
            self.run_checked(command, "post-apply")?;
        }
        if let Some(test) = &manifest.test {
            self.run_checked(test, "test")?;
        }
        Ok(())
    }

    /// Restore the backup and report `err` as a failed outcome.
    fn roll_back(&self, outcome: ApplyOutcome, err: &GraftError) -> Result<ApplyOutcome> {
        warn!(skill = %outcome.skill, error = %err, "apply failed, restoring backup");
        self.backup.restore(&self.resolver)?;
        self.backup.clear()?;
        if remove_file_if_exists(self.layout.pending_file())? {
            remove_dir_if_exists(self.layout.skill_cache(&outcome.skill))?;
        }
        Ok(ApplyOutcome {
            success: false,
            error: Some(err.to_string()),
            backup_pending: false,
            ..outcome
        })
    }

    fn preflight(&self, manifest: &SkillManifest, state: &StateRecord) -> Result<()> {
        let skill = &manifest.skill;
        if state.is_applied(skill) {
            return Err(GraftError::SkillAlreadyApplied(skill.clone()));
        }
        for dependency in &manifest.depends {
            if !state.is_applied(dependency) {
                return Err(GraftError::MissingDependency {
                    skill: skill.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
        for conflict in &manifest.conflicts {
            if state.is_applied(conflict) {
                return Err(GraftError::ConflictingSkill {
                    skill: skill.clone(),
                    conflicts_with: conflict.clone(),
                });
            }
        }
        for applied in &state.applied_skills {
            if let Ok(cached) = self.cached_package(&applied.name) {
                if cached.manifest.conflicts.contains(skill) {
                    return Err(GraftError::ConflictingSkill {
                        skill: skill.clone(),
                        conflicts_with: applied.name.clone(),
                    });
                }
            }
        }
        for base in manifest.modify_base.values() {
            if let ModifyBase::Skill(other) = base {
                if !state.is_applied(other) {
                    return Err(GraftError::MissingDependency {
                        skill: skill.clone(),
                        dependency: other.clone(),
                    });
                }
            }
        }
        check_engine_version(manifest)?;
        if let Some(core) = &manifest.core_version {
            if core != &state.core_version {
                warn!(
                    skill = %skill,
                    authored_for = %core,
                    core_version = %state.core_version,
                    "skill was authored against a different core version"
                );
            }
        }
        Ok(())
    }

    /// Modified paths whose content differs from the last recorded hash.
    fn detect_drift(&self, manifest: &SkillManifest, state: &StateRecord) -> Result<Vec<String>> {
        let mut drift = Vec::new();
        for rel in &manifest.modifies {
            let dest = self.resolver.remap(rel, &state.path_remap);
            let Some(recorded) = state.last_recorded_hash(dest) else {
                continue;
            };
            let current = self.hash_project(dest)?;
            if current.as_deref() != Some(recorded) {
                warn!(path = dest, "drift: file changed since a skill last wrote it");
                drift.push(dest.to_string());
            }
        }
        Ok(drift)
    }

    /// File operations, adds and merges for one skill.
    ///
    /// Conflicts are collected across every modified file; the caller
    /// decides what to do with them.
    pub(crate) fn apply_body(
        &self,
        package: &SkillPackage,
        ctx: &mut BodyContext<'_>,
    ) -> Result<BodyOutcome> {
        let manifest = &package.manifest;
        let mut outcome = BodyOutcome::default();
        let mut written = Vec::new();

        for op in &manifest.file_ops {
            self.run_file_op(op, ctx)?;
        }

        for rel in &manifest.adds {
            let dest = self.resolver.remap(rel, ctx.remap).to_string();
            let target = self.resolver.resolve(&dest)?;
            if !ctx.produced.contains(&dest) && ctx.base.ensure_captured(&self.resolver, &dest)? {
                warn!(skill = package.name(), path = %dest, "add replaces an untracked file; kept its content in the base");
            }
            copy_with_parents(package.add_content_path(rel), &target)?;
            debug!(skill = package.name(), path = %dest, "added");
            written.push(dest);
        }

        for rel in &manifest.modifies {
            let dest = self.resolver.remap(rel, ctx.remap).to_string();
            let incoming = package.read_modify(rel)?;
            let Some(current) = self.read_project(&dest)? else {
                self.write_project(&dest, incoming.as_bytes())?;
                debug!(skill = package.name(), path = %dest, "target absent, adopted skill content");
                written.push(dest);
                continue;
            };

            let ancestor = self.merge_ancestor(package, rel, &dest, &current, ctx)?;
            let result = merge3(&current, &ancestor, &incoming, package.name());
            self.write_project(&dest, result.content().as_bytes())?;
            if result.is_conflict() {
                warn!(skill = package.name(), path = %dest, "merge conflict");
                outcome.conflicts.push(dest.clone());
            } else {
                debug!(skill = package.name(), path = %dest, "merged");
            }
            written.push(dest);
        }

        ctx.produced.extend(written);
        Ok(outcome)
    }

    fn merge_ancestor(
        &self,
        package: &SkillPackage,
        rel: &str,
        dest: &str,
        current: &str,
        ctx: &BodyContext<'_>,
    ) -> Result<String> {
        match package.manifest.modify_base.get(rel) {
            Some(ModifyBase::Accumulated) => return Ok(current.to_string()),
            Some(ModifyBase::Skill(other)) => {
                let content = self
                    .cached_package(other)
                    .and_then(|cached| read_optional(cached.modify_content_path(rel)))?;
                match content {
                    Some(content) => return Ok(content),
                    None => warn!(
                        skill = package.name(),
                        path = rel,
                        base_skill = %other,
                        "modify_base skill has no content for this path, using base snapshot"
                    ),
                }
            }
            None => {}
        }

        if let Some(source) = ctx.ancestors {
            if let Some(content) = source.read(dest)? {
                return Ok(content);
            }
        }
        if let Some(content) = ctx.base.read(dest)? {
            return Ok(content);
        }
        if ctx.produced.contains(dest) {
            // Add-only file from an earlier skill: merge against itself.
            return Ok(current.to_string());
        }
        ctx.base.ensure_captured(&self.resolver, dest)?;
        Ok(ctx.base.read(dest)?.unwrap_or_else(|| current.to_string()))
    }

    fn run_file_op(&self, op: &FileOp, ctx: &mut BodyContext<'_>) -> Result<()> {
        match op {
            FileOp::Rename { from, to } | FileOp::Move { from, to } => {
                let from = self.resolver.remap(from, ctx.remap).to_string();
                let to = self.resolver.remap(to, ctx.remap).to_string();
                let source = self.resolver.resolve(&from)?;
                let target = self.resolver.resolve(&to)?;
                if !source.is_file() {
                    return Err(GraftError::ValidationFailed(format!(
                        "cannot move {from}: file does not exist"
                    )));
                }
                if target.exists() {
                    return Err(GraftError::ValidationFailed(format!(
                        "cannot move {from} to {to}: target exists"
                    )));
                }
                ctx.base.ensure_captured(&self.resolver, &from)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(&source, &target)?;
                prune_empty_parents(&source, self.resolver.root());
                debug!(from = %from, to = %to, "moved");
                ctx.produced.insert(to);
            }
            FileOp::Delete { path } => {
                let path = self.resolver.remap(path, ctx.remap).to_string();
                ctx.base.ensure_captured(&self.resolver, &path)?;
                if self.remove_project(&path)? {
                    debug!(path = %path, "deleted");
                } else {
                    warn!(path = %path, "delete: file already absent");
                }
            }
        }
        Ok(())
    }

    /// Apply structured edits once. Returns whether dependency entries
    /// changed, which calls for the install command.
    pub(crate) fn apply_structured(
        &self,
        edits: &StructuredEdits,
        base: &BaseSnapshot,
    ) -> Result<bool> {
        let cfg = &self.config.structured;
        let mut dependencies_changed = false;

        if !edits.dependency_additions.is_empty() {
            base.ensure_captured(&self.resolver, &cfg.dependency_file)?;
            let existing = self.read_project(&cfg.dependency_file)?;
            let merged = merge_dependencies(
                existing.as_deref(),
                &cfg.dependency_key,
                &edits.dependency_additions,
            )?;
            if !merged.changed.is_empty() {
                self.write_project(&cfg.dependency_file, merged.content.as_bytes())?;
                info!(file = %cfg.dependency_file, added = ?merged.changed, "dependencies merged");
                dependencies_changed = true;
            }
        }

        if !edits.env_additions.is_empty() {
            base.ensure_captured(&self.resolver, &cfg.env_file)?;
            let existing = self.read_project(&cfg.env_file)?.unwrap_or_default();
            let (content, appended) = merge_env(&existing, &edits.env_additions);
            if !appended.is_empty() {
                self.write_project(&cfg.env_file, content.as_bytes())?;
                info!(file = %cfg.env_file, lines = appended.len(), "environment template extended");
            }
        }

        if !edits.service_additions.is_empty() {
            base.ensure_captured(&self.resolver, &cfg.services_file)?;
            let existing = self.read_project(&cfg.services_file)?;
            let content =
                merge_services(existing.as_deref(), &cfg.services_key, &edits.service_additions)?;
            self.write_project(&cfg.services_file, content.as_bytes())?;
            info!(file = %cfg.services_file, services = edits.service_additions.len(), "services merged");
        }

        Ok(dependencies_changed)
    }

    pub(crate) fn run_install(&self) -> Result<()> {
        match self.config.structured.install() {
            Some(command) => self.run_checked(command, "install"),
            None => {
                debug!("dependency install disabled");
                Ok(())
            }
        }
    }
}

fn check_engine_version(manifest: &SkillManifest) -> Result<()> {
    let Some(required) = &manifest.min_engine_version else {
        return Ok(());
    };
    let current = Version::parse(crate::VERSION)
        .map_err(|err| GraftError::Internal(format!("engine version: {err}")))?;
    let wanted = Version::parse(required)
        .map_err(|err| GraftError::InvalidManifest(format!("min_engine_version: {err}")))?;
    if current < wanted {
        return Err(GraftError::EngineTooOld {
            skill: manifest.skill.clone(),
            required: required.clone(),
            current: crate::VERSION.to_string(),
        });
    }
    Ok(())
}
