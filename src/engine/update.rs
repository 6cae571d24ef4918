//! Core updates: rebase the project and its skill stack onto a new core.
//!
//! 1. Migrations from the new core's `.graft-migrations.yaml` move renamed
//!    files and extend the path remap table.
//! 2. Files no skill touches are merged three ways: current against
//!    old base -> new core. Any conflict aborts the update with a restore.
//! 3. The new core is staged as the next base snapshot, skill-touched files
//!    are reset to it and the stack is replayed with failures isolated. Skill
//!    content still merges against the old base it was authored on.
//! 4. Customizations are re-applied, the staged base replaces the old one
//!    and the recorded core version is bumped.
//!
//! Local edits to skill-touched files are diffed against what the stack
//! produced on the old base before anything moves, and re-applied as a
//! patch once the replay is done. Edits that no longer apply are reported
//! in `patch_warnings`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::{BaseSnapshot, SkillPackage};
use crate::engine::Engine;
use crate::engine::apply::AncestorSource;
use crate::engine::replay::{FileSnapshot, ReplayMode, SkillReplayResult};
use crate::error::{GraftError, Result};
use crate::merge::patch::render_section;
use crate::merge::structured::aggregate;
use crate::merge::{FileChange, merge3, parse_patch};
use crate::storage::StateRecord;
use crate::utils::fs::{
    copy_with_parents, list_files, prune_empty_parents, read_bytes_optional, remove_dir_if_exists,
};

/// Migration list shipped at the root of a new core tree.
pub const MIGRATIONS_FILE: &str = ".graft-migrations.yaml";

/// One entry of the migration list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Migration {
    /// Core version that introduced the change.
    pub version: String,
    #[serde(default)]
    pub renames: Vec<MigrationRename>,
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationRename {
    pub from: String,
    pub to: String,
}

/// What an update would change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdatePreview {
    pub current_version: String,
    pub target_version: String,
    /// Paths added, removed or changed between the old base and the new core.
    pub changed_files: Vec<String>,
    /// Changed paths that a skill touches or that drifted locally.
    pub risk_files: Vec<String>,
    /// Versions of the migrations that would run.
    pub migrations: Vec<String>,
}

/// What `apply_update` produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub success: bool,
    pub previous_version: String,
    pub version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub core_conflicts: Vec<String>,
    pub skills: Vec<SkillReplayResult>,
    /// Skills removed from the stack because they no longer reapply.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropped: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub migrations: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patch_warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

enum UpdateStage {
    CoreConflicts(Vec<String>),
    Replayed {
        results: Vec<SkillReplayResult>,
        dropped: BTreeSet<String>,
        patch_warnings: Vec<String>,
        next: Box<StateRecord>,
    },
}

/// Local edits to skill-touched files, taken before an update moves them.
#[derive(Debug, Default)]
struct LocalEdits {
    changes: Vec<FileChange>,
    warnings: Vec<String>,
}

impl Engine {
    /// Describe the effect of updating to the core tree at `new_core`.
    pub fn preview_update(&self, new_core: &Path, version: &str) -> Result<UpdatePreview> {
        let state = self.read_state()?;
        let migrations = self.pending_migrations(new_core, &state.core_version, version)?;
        let core_files = self.core_files(new_core)?;
        let old_files: BTreeSet<String> = self.base.entries()?.into_iter().collect();

        let mut skill_paths: BTreeSet<String> = state.tracked_paths().into_iter().collect();
        for applied in &state.applied_skills {
            if let Ok(package) = self.cached_package(&applied.name) {
                skill_paths.extend(self.recorded_paths(&package.manifest, &state.path_remap));
            }
        }

        let mut changed_files = Vec::new();
        let mut risk_files = Vec::new();
        for rel in old_files.union(&core_files) {
            let old = self.base.read_bytes(rel)?;
            let new = read_bytes_optional(new_core.join(rel))?;
            if old == new {
                continue;
            }
            changed_files.push(rel.clone());
            let drifted = self.read_project_bytes(rel)? != old;
            if skill_paths.contains(rel) || drifted {
                risk_files.push(rel.clone());
            }
        }

        Ok(UpdatePreview {
            current_version: state.core_version,
            target_version: version.to_string(),
            changed_files,
            risk_files,
            migrations: migrations.into_iter().map(|m| m.version).collect(),
        })
    }

    /// Rebase the project onto the core tree at `new_core`.
    pub fn apply_update(&self, new_core: &Path, version: &str) -> Result<UpdateOutcome> {
        let state = self.read_state()?;
        self.ensure_no_customize()?;
        self.ensure_no_pending()?;
        let version = version.trim();
        if version.is_empty() {
            return Err(GraftError::ValidationFailed(
                "target version must not be empty".to_string(),
            ));
        }
        warn_if_downgrade(&state.core_version, version);

        let migrations = self.pending_migrations(new_core, &state.core_version, version)?;
        for migration in &migrations {
            for rename in &migration.renames {
                self.resolver.validate_remap_entry(&rename.from, &rename.to)?;
            }
        }
        let packages = self.applied_packages(&state)?;

        let _lock = self.lock_unchanged("update", &state)?;
        self.ensure_no_customize()?;

        let mut remap = state.path_remap.clone();
        for rename in migrations.iter().flat_map(|m| &m.renames) {
            record_rename(&mut remap, &rename.from, &rename.to);
        }

        let core_files = self.core_files(new_core)?;
        let old_files: BTreeSet<String> = self.base.entries()?.into_iter().collect();
        let mut touched = self.replay_touched_set(&state, &packages, &state.path_remap);
        touched.extend(self.replay_touched_set(&state, &packages, &remap));

        let renamed: Vec<String> = migrations
            .iter()
            .flat_map(|m| &m.renames)
            .flat_map(|r| [r.from.clone(), r.to.clone()])
            .collect();
        let mut backup_paths: BTreeSet<&String> = old_files.iter().chain(&core_files).collect();
        backup_paths.extend(&touched);
        backup_paths.extend(&renamed);
        let backup_paths: Vec<&String> = backup_paths.into_iter().collect();
        self.backup
            .create(&self.resolver, &format!("update to {version}"), &backup_paths)?;

        let staged = BaseSnapshot::new(self.layout.staged_base_dir());
        let mut outcome = UpdateOutcome {
            previous_version: state.core_version.clone(),
            version: version.to_string(),
            migrations: migrations.iter().map(|m| m.version.clone()).collect(),
            ..UpdateOutcome::default()
        };

        let plan = UpdatePlan {
            new_core,
            version,
            migrations: &migrations,
            core_files: &core_files,
            old_files: &old_files,
            touched: &touched,
            packages: &packages,
            remap: &remap,
        };
        let stage = self.run_update(&plan, &staged, &state);

        match stage {
            Ok(UpdateStage::Replayed {
                results,
                dropped,
                patch_warnings,
                next,
            }) => {
                self.base.swap_in(&staged)?;
                self.write_state(&next)?;
                for name in &dropped {
                    remove_dir_if_exists(self.layout.skill_cache(name))?;
                }
                self.backup.clear()?;

                info!(
                    from = %outcome.previous_version,
                    to = version,
                    dropped = dropped.len(),
                    "core updated"
                );
                outcome.success = true;
                outcome.skills = results;
                outcome.dropped = dropped.into_iter().collect();
                outcome.patch_warnings = patch_warnings;
                Ok(outcome)
            }
            Ok(UpdateStage::CoreConflicts(conflicts)) => {
                warn!(files = ?conflicts, "core merge conflicts, update aborted");
                self.abandon_update(&staged)?;
                outcome.error = Some(format!(
                    "core merge produced conflicts in {}",
                    conflicts.join(", ")
                ));
                outcome.core_conflicts = conflicts;
                Ok(outcome)
            }
            Err(err) => {
                warn!(error = %err, "update failed, restoring backup");
                self.abandon_update(&staged)?;
                outcome.error = Some(err.to_string());
                Ok(outcome)
            }
        }
    }

    fn abandon_update(&self, staged: &BaseSnapshot) -> Result<()> {
        self.backup.restore(&self.resolver)?;
        self.backup.clear()?;
        remove_dir_if_exists(staged.dir())
    }

    fn run_update(
        &self,
        plan: &UpdatePlan<'_>,
        staged: &BaseSnapshot,
        state: &StateRecord,
    ) -> Result<UpdateStage> {
        let local = self.capture_local_edits(plan, state)?;

        remove_dir_if_exists(staged.dir())?;
        fs::create_dir_all(staged.dir())?;
        for rel in plan.core_files {
            copy_with_parents(plan.new_core.join(rel), staged.path_for(rel))?;
        }

        let mut ancestors: BTreeMap<String, String> = BTreeMap::new();
        for rename in plan.migrations.iter().flat_map(|m| &m.renames) {
            self.migrate_rename(&rename.from, &rename.to)?;
            ancestors.insert(rename.to.clone(), rename.from.clone());
        }

        let label = format!("core {}", plan.version);
        let mut conflicts = Vec::new();
        for rel in plan.old_files.union(plan.core_files) {
            if plan.touched.contains(rel) {
                continue;
            }
            let ancestor = ancestors.get(rel).map_or(rel.as_str(), String::as_str);
            if self.merge_core_file(rel, ancestor, plan.new_core, &label)? {
                conflicts.push(rel.clone());
            }
        }
        if !conflicts.is_empty() {
            return Ok(UpdateStage::CoreConflicts(conflicts));
        }

        for migration in plan.migrations {
            if let Some(command) = &migration.command {
                self.run_checked(command, &format!("migration {}", migration.version))?;
            }
        }

        self.reset_paths(plan.touched, staged)?;
        let authored_on = AncestorSource {
            snapshot: &self.base,
            aliases: &ancestors,
        };
        let results = self.replay_skills(
            plan.packages,
            staged,
            Some(authored_on),
            plan.remap,
            ReplayMode::Isolate,
        )?;
        let reapplied: Vec<&SkillPackage> = plan
            .packages
            .iter()
            .filter(|p| results.iter().any(|r| r.success && r.skill == p.name()))
            .collect();
        self.finish_replay(&reapplied, staged)?;
        let mut patch_warnings =
            self.replay_custom_patches(&state.custom_modifications, plan.remap);

        let dropped: BTreeSet<String> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.skill.clone())
            .collect();
        let mut next = state.clone();
        next.applied_skills.retain(|s| !dropped.contains(&s.name));
        next.core_version = plan.version.to_string();
        next.path_remap = plan.remap.clone();
        // Hashes record what the stack produced, so carried edits still
        // read as drift afterwards.
        self.rehash_skills(&mut next, &reapplied)?;

        patch_warnings.extend(local.warnings);
        patch_warnings.extend(self.reapply_local_edits(&local.changes, plan.remap));

        Ok(UpdateStage::Replayed {
            results,
            dropped,
            patch_warnings,
            next: Box::new(next),
        })
    }

    /// Diff drifted skill-touched files against what the stack produces on
    /// the old base. The live tree is left as it was found.
    fn capture_local_edits(
        &self,
        plan: &UpdatePlan<'_>,
        state: &StateRecord,
    ) -> Result<LocalEdits> {
        let mut drifted = Vec::new();
        for rel in plan.touched {
            if let Some(recorded) = state.last_recorded_hash(rel) {
                if self.hash_project(rel)?.as_deref() != Some(recorded) {
                    drifted.push(rel.clone());
                }
            }
        }
        let mut local = LocalEdits::default();
        if drifted.is_empty() {
            return Ok(local);
        }
        debug!(files = ?drifted, "capturing local edits");

        let paths: Vec<String> = plan.touched.iter().cloned().collect();
        let live = FileSnapshot::capture(self, &paths)?;
        let expected = self.reproduce_stack(plan, state, &drifted);
        live.restore(self)?;

        let expected = match expected {
            Ok(expected) => expected,
            Err(err) => {
                warn!(error = %err, "stack output could not be reproduced, local edits not carried");
                local.warnings = drifted
                    .iter()
                    .map(|rel| format!("{rel}: local edits could not be carried forward: {err}"))
                    .collect();
                return Ok(local);
            }
        };

        for (rel, produced) in expected {
            let current = self.read_project_bytes(&rel)?;
            if current == produced {
                continue;
            }
            let (Ok(before), Ok(after)) = (
                produced.map(String::from_utf8).transpose(),
                current.map(String::from_utf8).transpose(),
            ) else {
                warn!(path = %rel, "binary local edits are not carried across updates");
                local
                    .warnings
                    .push(format!("{rel}: binary local edits were not carried forward"));
                continue;
            };
            local.changes.push(FileChange {
                path: rel,
                before,
                after,
            });
        }
        info!(files = local.changes.len(), "local edits captured");
        Ok(local)
    }

    /// Rebuild the stack's output on the old base and read `paths` from it.
    fn reproduce_stack(
        &self,
        plan: &UpdatePlan<'_>,
        state: &StateRecord,
        paths: &[String],
    ) -> Result<Vec<(String, Option<Vec<u8>>)>> {
        self.reset_paths(plan.touched, &self.base)?;
        let results = self.replay_skills(
            plan.packages,
            &self.base,
            None,
            &state.path_remap,
            ReplayMode::StopOnConflict,
        )?;
        if let Some(failed) = results.iter().find(|r| !r.success) {
            return Err(GraftError::ValidationFailed(format!(
                "skill '{}' no longer reapplies on the current base",
                failed.skill
            )));
        }
        let edits = aggregate(plan.packages.iter().map(|p| &p.manifest.structured));
        self.apply_structured(&edits, &self.base)?;
        if let Some(warning) = self
            .replay_custom_patches(&state.custom_modifications, &state.path_remap)
            .into_iter()
            .next()
        {
            return Err(GraftError::ValidationFailed(warning));
        }
        paths
            .iter()
            .map(|rel| Ok((rel.clone(), self.read_project_bytes(rel)?)))
            .collect()
    }

    fn reapply_local_edits(
        &self,
        changes: &[FileChange],
        remap: &BTreeMap<String, String>,
    ) -> Vec<String> {
        let mut warnings = Vec::new();
        for change in changes {
            let dest = self.resolver.remap(&change.path, remap).to_string();
            match self.reapply_local_edit(change, &dest) {
                Ok(()) => debug!(path = %dest, "local edits carried forward"),
                Err(err) => {
                    warn!(path = %dest, error = %err, "local edits did not reapply");
                    warnings.push(format!("{dest}: local edits did not reapply: {err}"));
                }
            }
        }
        warnings
    }

    fn reapply_local_edit(&self, change: &FileChange, dest: &str) -> Result<()> {
        for section in parse_patch(&render_section(change))? {
            let current = self.read_project(dest)?;
            match section.apply_to(current.as_deref())? {
                Some(content) => self.write_project(dest, content.as_bytes())?,
                None => {
                    self.remove_project(dest)?;
                }
            }
        }
        Ok(())
    }

    fn migrate_rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.resolver.resolve(from)?;
        let target = self.resolver.resolve(to)?;
        if !source.is_file() {
            debug!(from, "migration rename: source absent");
            return Ok(());
        }
        if target.exists() {
            warn!(from, to, "migration rename: target exists, leaving source in place");
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&source, &target)?;
        prune_empty_parents(&source, self.resolver.root());
        info!(from, to, "migrated file");
        Ok(())
    }

    /// Merge one file no skill touches. Returns whether it conflicted.
    fn merge_core_file(&self, rel: &str, ancestor: &str, new_core: &Path, label: &str) -> Result<bool> {
        let old = self.base.read_bytes(ancestor)?;
        let new = read_bytes_optional(new_core.join(rel))?;
        let current = self.read_project_bytes(rel)?;

        if current == new || old == new {
            return Ok(false);
        }
        if current == old {
            match &new {
                Some(bytes) => self.write_project(rel, bytes)?,
                None => {
                    self.remove_project(rel)?;
                }
            }
            debug!(path = rel, "took core version");
            return Ok(false);
        }

        let (Some(current), Some(new)) = (current, new) else {
            warn!(path = rel, "core and local changes disagree on the file's existence, keeping local");
            return Ok(false);
        };
        let (Ok(current), Ok(new)) = (String::from_utf8(current), String::from_utf8(new)) else {
            warn!(path = rel, "binary file changed both locally and in core");
            return Ok(true);
        };
        let old = old
            .map(String::from_utf8)
            .transpose()
            .map_err(|err| GraftError::ValidationFailed(format!("{rel}: {err}")))?
            .unwrap_or_default();

        let result = merge3(&current, &old, &new, label);
        self.write_project(rel, result.content().as_bytes())?;
        Ok(result.is_conflict())
    }

    /// Files of the new core tree, excluding the migration list.
    fn core_files(&self, new_core: &Path) -> Result<BTreeSet<String>> {
        if !new_core.is_dir() {
            return Err(GraftError::NotFound(format!(
                "core tree {}",
                new_core.display()
            )));
        }
        let mut files = BTreeSet::new();
        for rel in list_files(new_core)? {
            if rel != MIGRATIONS_FILE && !self.is_excluded(&rel)? {
                files.insert(rel);
            }
        }
        Ok(files)
    }

    /// Migrations newer than `current` and not newer than `target`, in
    /// version order.
    pub(crate) fn pending_migrations(
        &self,
        new_core: &Path,
        current: &str,
        target: &str,
    ) -> Result<Vec<Migration>> {
        let path = new_core.join(MIGRATIONS_FILE);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)?;
        let listed: Vec<Migration> = serde_yaml::from_str(&raw)
            .map_err(|err| GraftError::ValidationFailed(format!("{MIGRATIONS_FILE}: {err}")))?;
        let target = parse_version(target)?;
        let current = Version::parse(current).ok();

        let mut selected = Vec::new();
        for migration in listed {
            let at = parse_version(&migration.version)?;
            let newer = current.as_ref().is_none_or(|c| at > *c);
            if newer && at <= target {
                selected.push((at, migration));
            }
        }
        selected.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(selected.into_iter().map(|(_, m)| m).collect())
    }
}

struct UpdatePlan<'a> {
    new_core: &'a Path,
    version: &'a str,
    migrations: &'a [Migration],
    core_files: &'a BTreeSet<String>,
    old_files: &'a BTreeSet<String>,
    touched: &'a BTreeSet<String>,
    packages: &'a [SkillPackage],
    remap: &'a BTreeMap<String, String>,
}

fn parse_version(raw: &str) -> Result<Version> {
    Version::parse(raw.trim())
        .map_err(|err| GraftError::ValidationFailed(format!("invalid version `{raw}`: {err}")))
}

fn warn_if_downgrade(current: &str, target: &str) {
    if let (Ok(current), Ok(target)) = (Version::parse(current), Version::parse(target)) {
        if target < current {
            warn!(%current, %target, "updating to an older core version");
        }
    }
}

/// Record `from -> to`, redirecting entries that pointed at `from`.
fn record_rename(remap: &mut BTreeMap<String, String>, from: &str, to: &str) {
    for target in remap.values_mut() {
        if target == from {
            *target = to.to_string();
        }
    }
    remap.insert(from.to_string(), to.to_string());
}
