//! Uninstall by replay.
//!
//! Every path the stack touches is reset to the base snapshot, then the
//! retained skills are replayed in their original order and the recorded
//! customizations are re-applied on top.

use serde::Serialize;
use tracing::{info, warn};

use crate::core::SkillPackage;
use crate::engine::Engine;
use crate::engine::replay::{ReplayMode, SkillReplayResult};
use crate::error::{GraftError, Result};
use crate::utils::fs::remove_dir_if_exists;

/// What `uninstall` produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UninstallOutcome {
    pub success: bool,
    pub skill: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Skills that were replayed, in order.
    pub replayed: Vec<String>,
    /// Customizations that no longer apply cleanly.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patch_warnings: Vec<String>,
}

impl Engine {
    /// Remove an applied skill.
    pub fn uninstall(&self, name: &str) -> Result<UninstallOutcome> {
        let mut state = self.read_state()?;
        self.ensure_no_customize()?;
        self.ensure_no_pending()?;
        if !state.is_applied(name) {
            return Err(GraftError::SkillNotApplied(name.to_string()));
        }

        let packages = self.applied_packages(&state)?;
        let dependents: Vec<String> = packages
            .iter()
            .filter(|p| p.name() != name && p.manifest.depends.iter().any(|d| d == name))
            .map(|p| p.name().to_string())
            .collect();
        if !dependents.is_empty() {
            return Err(GraftError::DependentSkills {
                skill: name.to_string(),
                dependents,
            });
        }

        let _lock = self.lock_unchanged("uninstall", &state)?;
        self.ensure_no_customize()?;
        let remap = state.path_remap.clone();
        let touched = self.replay_touched_set(&state, &packages, &remap);
        let retained: Vec<SkillPackage> = packages.into_iter().filter(|p| p.name() != name).collect();
        let touched_list: Vec<&String> = touched.iter().collect();
        self.backup
            .create(&self.resolver, &format!("uninstall {name}"), &touched_list)?;

        let mut outcome = UninstallOutcome {
            skill: name.to_string(),
            ..UninstallOutcome::default()
        };

        let replayed = self.reset_paths(&touched, &self.base).and_then(|()| {
            let results =
                self.replay_skills(&retained, &self.base, None, &remap, ReplayMode::StopOnConflict)?;
            if results.iter().all(|r| r.success) {
                let refs: Vec<&SkillPackage> = retained.iter().collect();
                self.finish_replay(&refs, &self.base)?;
            }
            Ok(results)
        });

        match replayed {
            Ok(results) => {
                if let Some(failed) = results.iter().find(|r| !r.success) {
                    return self.abort_uninstall(outcome, failed);
                }
                outcome.replayed = results.into_iter().map(|r| r.skill).collect();
            }
            Err(err) => {
                warn!(skill = name, error = %err, "uninstall failed, restoring backup");
                self.backup.restore(&self.resolver)?;
                self.backup.clear()?;
                outcome.error = Some(err.to_string());
                return Ok(outcome);
            }
        }

        outcome.patch_warnings = self.replay_custom_patches(&state.custom_modifications, &remap);

        state.applied_skills.retain(|s| s.name != name);
        let refs: Vec<&SkillPackage> = retained.iter().collect();
        self.rehash_skills(&mut state, &refs)?;
        self.write_state(&state)?;
        remove_dir_if_exists(self.layout.skill_cache(name))?;
        self.backup.clear()?;

        info!(skill = name, replayed = outcome.replayed.len(), "skill uninstalled");
        outcome.success = true;
        Ok(outcome)
    }

    fn abort_uninstall(
        &self,
        mut outcome: UninstallOutcome,
        failed: &SkillReplayResult,
    ) -> Result<UninstallOutcome> {
        warn!(
            skill = %outcome.skill,
            replaying = %failed.skill,
            conflicts = ?failed.conflicts,
            "replay stopped, restoring backup"
        );
        self.backup.restore(&self.resolver)?;
        self.backup.clear()?;
        outcome.conflicts.clone_from(&failed.conflicts);
        outcome.error = Some(match &failed.error {
            Some(error) => format!("replaying '{}' failed: {error}", failed.skill),
            None => format!("replaying '{}' produced conflicts", failed.skill),
        });
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::runner::ScriptedRunner;
    use crate::test_utils::{ProjectFixture, SkillBuilder};
    use std::rc::Rc;

    #[test]
    fn test_uninstall_only_skill_restores_base() {
        let fixture = ProjectFixture::new();
        fixture.write("src/app.txt", "one\ntwo\n");
        fixture.write("package.json", "{\"dependencies\":{\"a\":\"1\"}}\n");
        let engine = fixture.init("1.0.0");

        let skill = SkillBuilder::new("solo")
            .adds("src/solo/new.txt", "new\n")
            .modifies("src/app.txt", "one\ntwo\nthree\n")
            .dependency("b", "2")
            .build(fixture.skills_dir());
        assert!(engine.apply(&skill).unwrap().success);

        let outcome = engine.uninstall("solo").unwrap();
        assert!(outcome.success, "{outcome:?}");
        assert_eq!(fixture.read("src/app.txt"), "one\ntwo\n");
        assert_eq!(fixture.read("package.json"), "{\"dependencies\":{\"a\":\"1\"}}\n");
        assert!(!fixture.exists("src/solo"));
        assert!(engine.read_state().unwrap().applied_skills.is_empty());
        assert!(!engine.layout().skill_cache("solo").exists());
    }

    #[test]
    fn test_uninstall_mid_stack_replays_rest() {
        let fixture = ProjectFixture::new();
        fixture.write("app.txt", "a\nb\nc\nd\ne\n");
        let engine = fixture.init("1.0.0");

        let first = SkillBuilder::new("first")
            .modifies("app.txt", "A\nb\nc\nd\ne\n")
            .build(fixture.skills_dir());
        let second = SkillBuilder::new("second")
            .modifies("app.txt", "a\nb\nc\nd\nE\n")
            .adds("second.txt", "2\n")
            .build(fixture.skills_dir());
        assert!(engine.apply(&first).unwrap().success);
        assert!(engine.apply(&second).unwrap().success);
        assert_eq!(fixture.read("app.txt"), "A\nb\nc\nd\nE\n");

        let outcome = engine.uninstall("first").unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.replayed, vec!["second"]);
        assert_eq!(fixture.read("app.txt"), "a\nb\nc\nd\nE\n");
        assert_eq!(fixture.read("second.txt"), "2\n");

        let state = engine.read_state().unwrap();
        assert_eq!(state.applied_names(), vec!["second"]);
        let recorded = state.last_recorded_hash("app.txt").unwrap();
        assert_eq!(
            Some(recorded.to_string()),
            engine.hash_project("app.txt").unwrap()
        );
    }

    #[test]
    fn test_uninstall_blocked_by_dependents() {
        let fixture = ProjectFixture::new();
        let engine = fixture.init("1.0.0");
        let base = SkillBuilder::new("base").adds("base.txt", "b\n").build(fixture.skills_dir());
        let child = SkillBuilder::new("child")
            .depends("base")
            .adds("child.txt", "c\n")
            .build(fixture.skills_dir());
        assert!(engine.apply(&base).unwrap().success);
        assert!(engine.apply(&child).unwrap().success);

        match engine.uninstall("base").unwrap_err() {
            GraftError::DependentSkills { dependents, .. } => assert_eq!(dependents, vec!["child"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(fixture.exists("base.txt"));
    }

    #[test]
    fn test_uninstall_unknown_skill() {
        let fixture = ProjectFixture::new();
        let engine = fixture.init("1.0.0");
        assert!(matches!(
            engine.uninstall("ghost"),
            Err(GraftError::SkillNotApplied(_))
        ));
    }

    #[test]
    fn test_uninstall_aggregates_structured_edits_of_retained_skills() {
        let fixture = ProjectFixture::new();
        fixture.write("package.json", "{\"dependencies\":{\"express\":\"^4\"}}\n");
        let runner = Rc::new(ScriptedRunner::new());
        let engine = fixture.init_with_runner("1.0.0", &runner);

        let a = SkillBuilder::new("a").dependency("left", "1").build(fixture.skills_dir());
        let b = SkillBuilder::new("b").dependency("right", "2").build(fixture.skills_dir());
        assert!(engine.apply(&a).unwrap().success);
        assert!(engine.apply(&b).unwrap().success);

        assert!(engine.uninstall("a").unwrap().success);
        let doc: serde_json::Value = serde_json::from_str(&fixture.read("package.json")).unwrap();
        let deps = doc["dependencies"].as_object().unwrap();
        assert!(deps.contains_key("express"));
        assert!(deps.contains_key("right"));
        assert!(!deps.contains_key("left"));
        assert_eq!(runner.calls().len(), 3);
    }

    #[test]
    fn test_uninstall_failing_post_apply_restores() {
        let fixture = ProjectFixture::new();
        let runner = Rc::new(ScriptedRunner::new());
        let engine = fixture.init_with_runner("1.0.0", &runner);

        let a = SkillBuilder::new("a").adds("a.txt", "a\n").build(fixture.skills_dir());
        let b = SkillBuilder::new("b")
            .adds("b.txt", "b\n")
            .post_apply("./configure")
            .build(fixture.skills_dir());
        assert!(engine.apply(&a).unwrap().success);
        assert!(engine.apply(&b).unwrap().success);

        let failing = Rc::new(ScriptedRunner::new().with_exit("./configure", 1));
        let engine = fixture.engine_with_runner(&failing);
        let outcome = engine.uninstall("a").unwrap();
        assert!(!outcome.success);
        assert!(fixture.exists("a.txt"));
        assert!(fixture.exists("b.txt"));
        assert_eq!(engine.read_state().unwrap().applied_names(), vec!["a", "b"]);
    }
}
