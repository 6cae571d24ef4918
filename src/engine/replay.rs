//! Replay: reset touched files to a base snapshot and re-run skill bodies.
//!
//! Uninstall replays the retained stack against the current base and stops
//! at the first conflict. A core update replays against the staged new base
//! and isolates failures: a skill that does not reapply cleanly is undone
//! and reported, and skills depending on it are skipped.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::{BaseSnapshot, SkillPackage};
use crate::engine::Engine;
use crate::engine::apply::{AncestorSource, BodyContext};
use crate::error::Result;
use crate::merge::parse_patch;
use crate::merge::structured::aggregate;
use crate::storage::{CustomModification, StateRecord};

/// How a replay reacts to a skill that does not reapply cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplayMode {
    /// Stop at the first conflict or failure.
    StopOnConflict,
    /// Undo the failing skill and keep going.
    Isolate,
}

/// Per-skill result of a replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillReplayResult {
    pub skill: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SkillReplayResult {
    fn ok(skill: &str) -> Self {
        Self {
            skill: skill.to_string(),
            success: true,
            conflicts: Vec::new(),
            error: None,
        }
    }

    fn failed(skill: &str, conflicts: Vec<String>, error: Option<String>) -> Self {
        Self {
            skill: skill.to_string(),
            success: false,
            conflicts,
            error,
        }
    }
}

/// In-memory copy of a set of project files, used to undo one skill.
pub(crate) struct FileSnapshot {
    files: Vec<(String, Option<Vec<u8>>)>,
}

impl FileSnapshot {
    pub(crate) fn capture(engine: &Engine, paths: &[String]) -> Result<Self> {
        let files = paths
            .iter()
            .map(|rel| Ok((rel.clone(), engine.read_project_bytes(rel)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { files })
    }

    pub(crate) fn restore(&self, engine: &Engine) -> Result<()> {
        for (rel, content) in &self.files {
            match content {
                Some(bytes) => engine.write_project(rel, bytes)?,
                None => {
                    engine.remove_project(rel)?;
                }
            }
        }
        Ok(())
    }
}

impl Engine {
    /// Every path the stack or the recorded customizations touch.
    pub(crate) fn replay_touched_set(
        &self,
        state: &StateRecord,
        packages: &[SkillPackage],
        remap: &BTreeMap<String, String>,
    ) -> BTreeSet<String> {
        let mut touched: BTreeSet<String> = state.tracked_paths().into_iter().collect();
        for package in packages {
            touched.extend(self.recorded_paths(&package.manifest, remap));
        }
        for modification in &state.custom_modifications {
            touched.extend(
                modification
                    .files_modified
                    .iter()
                    .map(|rel| self.resolver.remap(rel, remap).to_string()),
            );
        }
        touched
    }

    /// Reset each path to `base`, deleting paths `base` has no entry for.
    pub(crate) fn reset_paths(&self, paths: &BTreeSet<String>, base: &BaseSnapshot) -> Result<()> {
        for rel in paths {
            match base.read_bytes(rel)? {
                Some(content) => self.write_project(rel, &content)?,
                None => {
                    if self.remove_project(rel)? {
                        debug!(path = %rel, "removed add-only file");
                    }
                }
            }
        }
        info!(files = paths.len(), "touched files reset to base");
        Ok(())
    }

    /// Re-run the file-level body of each package in order.
    pub(crate) fn replay_skills(
        &self,
        packages: &[SkillPackage],
        base: &BaseSnapshot,
        ancestors: Option<AncestorSource<'_>>,
        remap: &BTreeMap<String, String>,
        mode: ReplayMode,
    ) -> Result<Vec<SkillReplayResult>> {
        let mut ctx = BodyContext::new(base, remap);
        ctx.ancestors = ancestors;
        let mut results = Vec::new();
        let mut failed: HashSet<String> = HashSet::new();

        for package in packages {
            let name = package.name();
            if let Some(missing) = package.manifest.depends.iter().find(|d| failed.contains(*d)) {
                warn!(skill = name, dependency = %missing, "skipping replay: dependency failed");
                failed.insert(name.to_string());
                results.push(SkillReplayResult::failed(
                    name,
                    Vec::new(),
                    Some(format!("depends on '{missing}', which failed to reapply")),
                ));
                continue;
            }

            let snapshot = match mode {
                ReplayMode::Isolate => Some(FileSnapshot::capture(
                    self,
                    &self.touched_for(&package.manifest, remap),
                )?),
                ReplayMode::StopOnConflict => None,
            };
            let produced_before = ctx.produced.clone();

            let result = match self.apply_body(package, &mut ctx) {
                Ok(body) if body.conflicts.is_empty() => SkillReplayResult::ok(name),
                Ok(body) => SkillReplayResult::failed(name, body.conflicts, None),
                Err(err) if mode == ReplayMode::Isolate => {
                    SkillReplayResult::failed(name, Vec::new(), Some(err.to_string()))
                }
                Err(err) => return Err(err),
            };

            if result.success {
                debug!(skill = name, "replayed");
                results.push(result);
                continue;
            }

            warn!(skill = name, conflicts = ?result.conflicts, error = ?result.error, "skill did not reapply cleanly");
            failed.insert(name.to_string());
            results.push(result);
            match snapshot {
                Some(snapshot) => {
                    snapshot.restore(self)?;
                    ctx.produced = produced_before;
                }
                None => break,
            }
        }
        Ok(results)
    }

    /// Aggregated structured merges, install and post-apply commands for the
    /// skills that reapplied.
    pub(crate) fn finish_replay(&self, packages: &[&SkillPackage], base: &BaseSnapshot) -> Result<()> {
        let edits = aggregate(packages.iter().map(|p| &p.manifest.structured));
        if self.apply_structured(&edits, base)? {
            self.run_install()?;
        }
        for package in packages {
            for command in &package.manifest.post_apply {
                self.run_checked(command, "post-apply")?;
            }
        }
        Ok(())
    }

    /// Re-apply recorded customizations in commit order. Failures are
    /// returned as warnings.
    pub(crate) fn replay_custom_patches(
        &self,
        modifications: &[CustomModification],
        remap: &BTreeMap<String, String>,
    ) -> Vec<String> {
        let mut warnings = Vec::new();
        for modification in modifications {
            if let Err(err) = self.replay_custom_patch(modification, remap) {
                warn!(patch = %modification.patch_file, error = %err, "customization did not reapply");
                warnings.push(format!("{}: {err}", modification.patch_file));
            }
        }
        warnings
    }

    fn replay_custom_patch(
        &self,
        modification: &CustomModification,
        remap: &BTreeMap<String, String>,
    ) -> Result<()> {
        let raw = std::fs::read_to_string(self.resolver.resolve(&modification.patch_file)?)?;
        let sections = parse_patch(&raw)?;

        let mut staged = Vec::with_capacity(sections.len());
        for section in &sections {
            let dest = self.resolver.remap(&section.path, remap).to_string();
            let current = self.read_project(&dest)?;
            staged.push((dest, section.apply_to(current.as_deref())?));
        }
        for (dest, content) in staged {
            match content {
                Some(content) => self.write_project(&dest, content.as_bytes())?,
                None => {
                    self.remove_project(&dest)?;
                }
            }
        }
        debug!(patch = %modification.patch_file, "customization reapplied");
        Ok(())
    }

    /// Recompute the hashes of every retained skill from the current tree.
    pub(crate) fn rehash_skills(
        &self,
        state: &mut StateRecord,
        packages: &[&SkillPackage],
    ) -> Result<()> {
        let remap = state.path_remap.clone();
        for applied in &mut state.applied_skills {
            if let Some(package) = packages.iter().find(|p| p.name() == applied.name) {
                let paths = self.recorded_paths(&package.manifest, &remap);
                applied.file_hashes = self.hash_paths(&paths)?;
            }
        }
        Ok(())
    }
}
