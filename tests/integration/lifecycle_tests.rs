use graft::engine::FileState;
use graft::merge::has_conflict_markers;
use graft::test_utils::{ProjectFixture, SkillBuilder};

use super::tree;

const APP: &str = "line1\nline2\nline3\nline4\nline5\nline6\nline7\n";

fn seeded() -> ProjectFixture {
    let fixture = ProjectFixture::new();
    fixture.write("src/app.txt", APP);
    fixture.write("package.json", "{\n  \"dependencies\": {\n    \"express\": \"^4\"\n  }\n}\n");
    fixture.write("README.md", "# demo\n");
    fixture
}

#[test]
fn test_init_captures_tree_as_base() {
    let fixture = seeded();
    let engine = fixture.init("1.0.0");

    let state = engine.read_state().unwrap();
    assert!(state.applied_skills.is_empty());
    assert_eq!(state.core_version, "1.0.0");

    let tracked = engine.tracked_files().unwrap();
    assert_eq!(engine.base().entries().unwrap(), tracked);
    for rel in &tracked {
        assert_eq!(engine.base().read(rel).unwrap().as_deref(), Some(fixture.read(rel).as_str()));
    }
}

#[test]
fn test_uninstall_round_trip_restores_base_bytes() {
    let fixture = seeded();
    let engine = fixture.init("1.0.0");
    let before = tree(&fixture, &engine);

    let skill = SkillBuilder::new("telegram")
        .adds("src/channels/telegram.txt", "bot\n")
        .modifies("src/app.txt", &APP.replace("line3", "line3 + telegram"))
        .dependency("grammy", "^1")
        .env("TELEGRAM_TOKEN=")
        .build(fixture.skills_dir());
    assert!(engine.apply(&skill).unwrap().success);
    assert!(fixture.exists("src/channels/telegram.txt"));
    assert!(fixture.exists(".env.example"));

    let outcome = engine.uninstall("telegram").unwrap();
    assert!(outcome.success, "{outcome:?}");
    assert_eq!(tree(&fixture, &engine), before);
    assert!(!fixture.exists("src/channels"));
    assert!(!fixture.exists(".env.example"));
}

#[test]
fn test_replay_matches_fresh_project_with_remaining_skill() {
    let build = |fixture: &ProjectFixture| {
        let a = SkillBuilder::new("a")
            .adds("a.txt", "a\n")
            .modifies("src/app.txt", &APP.replace("line1", "LINE1"))
            .dependency("left", "1")
            .build(fixture.skills_dir());
        let b = SkillBuilder::new("b")
            .adds("b.txt", "b\n")
            .modifies("src/app.txt", &APP.replace("line7", "LINE7"))
            .dependency("right", "2")
            .build(fixture.skills_dir());
        (a, b)
    };

    let stacked = seeded();
    let engine = stacked.init("1.0.0");
    let (a, b) = build(&stacked);
    assert!(engine.apply(&a).unwrap().success);
    assert!(engine.apply(&b).unwrap().success);
    assert!(engine.uninstall("a").unwrap().success);

    let fresh = seeded();
    let fresh_engine = fresh.init("1.0.0");
    let (_, b) = build(&fresh);
    assert!(fresh_engine.apply(&b).unwrap().success);

    assert_eq!(tree(&stacked, &engine), tree(&fresh, &fresh_engine));
    assert_eq!(engine.read_state().unwrap().applied_names(), vec!["b"]);
}

#[test]
fn test_external_edit_is_drift_not_a_blocker() {
    let fixture = seeded();
    let engine = fixture.init("1.0.0");

    let a = SkillBuilder::new("a")
        .modifies("src/app.txt", &APP.replace("line1", "A1"))
        .build(fixture.skills_dir());
    assert!(engine.apply(&a).unwrap().success);

    let edited = APP.replace("line1", "A1").replace("line4", "mine");
    fixture.write("src/app.txt", &edited);
    assert_eq!(
        engine.status().unwrap().skills[0].files[0].state,
        FileState::Modified
    );

    let b = SkillBuilder::new("b")
        .modifies("src/app.txt", &APP.replace("line7", "B7"))
        .build(fixture.skills_dir());
    let outcome = engine.apply(&b).unwrap();
    assert!(outcome.success, "{outcome:?}");
    assert_eq!(outcome.drift, vec!["src/app.txt"]);
    assert_eq!(fixture.read("src/app.txt"), edited.replace("line7", "B7"));
}

#[test]
fn test_structured_dependencies_union() {
    let fixture = seeded();
    let engine = fixture.init("1.0.0");

    let a = SkillBuilder::new("a")
        .dependency("left", "1")
        .dependency("shared", "^3")
        .build(fixture.skills_dir());
    let b = SkillBuilder::new("b")
        .dependency("right", "2")
        .dependency("shared", "^3")
        .build(fixture.skills_dir());
    assert!(engine.apply(&a).unwrap().success);
    assert!(engine.apply(&b).unwrap().success);

    let doc: serde_json::Value = serde_json::from_str(&fixture.read("package.json")).unwrap();
    let deps = doc["dependencies"].as_object().unwrap();
    let names: Vec<&str> = deps.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["express", "left", "shared", "right"]);
}

#[test]
fn test_conflicting_edits_report_path_and_keep_state() {
    let fixture = ProjectFixture::new();
    fixture.write("f.txt", "L1\nL2\nL3");
    let engine = fixture.init("1.0.0");

    let a = SkillBuilder::new("a").modifies("f.txt", "L1\nX\nL3").build(fixture.skills_dir());
    assert!(engine.apply(&a).unwrap().success);
    let state = engine.read_state().unwrap();

    let b = SkillBuilder::new("b").modifies("f.txt", "L1\nY\nL3").build(fixture.skills_dir());
    let outcome = engine.apply(&b).unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.conflicts, vec!["f.txt"]);
    assert_eq!(engine.read_state().unwrap(), state);
    assert!(has_conflict_markers(&fixture.read("f.txt")));

    engine.resolve_abort().unwrap();
    assert_eq!(fixture.read("f.txt"), "L1\nX\nL3");
}

#[test]
fn test_failing_test_command_rolls_back_everything() {
    use graft::engine::ScriptedRunner;
    use std::rc::Rc;

    let fixture = seeded();
    let runner = Rc::new(ScriptedRunner::new().with_exit("npm test", 1));
    let engine = fixture.init_with_runner("1.0.0", &runner);
    let before = tree(&fixture, &engine);

    let skill = SkillBuilder::new("broken")
        .adds("new.txt", "x\n")
        .modifies("src/app.txt", "changed\n")
        .dependency("extra", "1")
        .test("npm test")
        .build(fixture.skills_dir());
    let outcome = engine.apply(&skill).unwrap();

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("npm test"));
    assert_eq!(tree(&fixture, &engine), before);
    assert!(engine.read_state().unwrap().applied_skills.is_empty());
    assert_eq!(runner.calls(), vec!["npm install", "npm test"]);
}
