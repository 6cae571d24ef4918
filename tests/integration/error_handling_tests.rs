use std::collections::BTreeMap;
use std::time::Duration;

use graft::GraftError;
use graft::security::PathResolver;
use graft::storage::ProjectLock;
use graft::test_utils::{ProjectFixture, SkillBuilder};

use super::tree;

#[test]
fn test_unmet_dependency_is_rejected_before_mutation() {
    let fixture = ProjectFixture::new();
    fixture.write("app.txt", "app\n");
    let engine = fixture.init("1.0.0");
    let before_state = engine.read_state().unwrap();
    let before_tree = tree(&fixture, &engine);

    let skill = SkillBuilder::new("needs-auth")
        .depends("auth")
        .modifies("app.txt", "app\nauth\n")
        .build(fixture.skills_dir());
    match engine.apply(&skill).unwrap_err() {
        GraftError::MissingDependency { dependency, .. } => assert_eq!(dependency, "auth"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.read_state().unwrap(), before_state);
    assert_eq!(tree(&fixture, &engine), before_tree);
}

#[test]
fn test_conflicting_skill_is_rejected() {
    let fixture = ProjectFixture::new();
    let engine = fixture.init("1.0.0");
    let sqlite = SkillBuilder::new("sqlite").adds("db.txt", "sqlite\n").build(fixture.skills_dir());
    let postgres = SkillBuilder::new("postgres")
        .conflicts("sqlite")
        .adds("pg.txt", "pg\n")
        .build(fixture.skills_dir());
    assert!(engine.apply(&sqlite).unwrap().success);
    assert!(matches!(
        engine.apply(&postgres),
        Err(GraftError::ConflictingSkill { .. })
    ));
    assert!(!fixture.exists("pg.txt"));
}

#[test]
fn test_lock_held_by_live_process_blocks_operations() {
    let fixture = ProjectFixture::new();
    let engine = fixture.init("1.0.0");
    let skill = SkillBuilder::new("s").adds("s.txt", "s\n").build(fixture.skills_dir());

    let guard =
        ProjectLock::acquire(&engine.layout().lock_file(), "test", Duration::from_secs(3600))
            .unwrap();
    assert!(matches!(engine.apply(&skill), Err(GraftError::LockHeld { .. })));
    assert!(!fixture.exists("s.txt"));
    drop(guard);

    assert!(engine.apply(&skill).unwrap().success);
    assert!(!ProjectLock::is_held(&engine.layout().lock_file()));
}

#[test]
fn test_operations_require_init() {
    let fixture = ProjectFixture::new();
    let engine = fixture.engine();
    assert!(matches!(engine.read_state(), Err(GraftError::NotInitialized(_))));
    assert!(matches!(engine.uninstall("x"), Err(GraftError::NotInitialized(_))));
}

#[test]
fn test_newer_schema_is_not_recoverable() {
    let fixture = ProjectFixture::new();
    let engine = fixture.init("1.0.0");
    let state_file = engine.layout().state_file();
    let mut doc: serde_yaml::Value =
        serde_yaml::from_str(&std::fs::read_to_string(&state_file).unwrap()).unwrap();
    doc["schema_version"] = serde_yaml::Value::String("9.0.0".to_string());
    std::fs::write(&state_file, serde_yaml::to_string(&doc).unwrap()).unwrap();

    let err = engine.read_state().unwrap_err();
    assert!(matches!(err, GraftError::IncompatibleSchema { .. }));
    assert!(!err.to_structured().recoverable);
}

#[test]
fn test_path_resolver_confines_paths() {
    let fixture = ProjectFixture::new();
    let resolver = PathResolver::new(fixture.root()).unwrap();

    assert!(resolver.resolve("../outside").is_err());
    assert!(resolver.resolve(".").is_err());
    assert!(resolver.resolve("src/ok.txt").is_ok());

    let table: BTreeMap<String, String> =
        [("src/old.txt".to_string(), "../../etc/passwd".to_string())].into();
    let resolved = resolver.resolve_remap("src/old.txt", &table).unwrap();
    assert_eq!(resolved, resolver.resolve("src/old.txt").unwrap());
}

#[test]
fn test_manifest_escaping_root_is_rejected() {
    let fixture = ProjectFixture::new();
    let engine = fixture.init("1.0.0");
    let dir = fixture.skills_dir().join("evil");
    std::fs::create_dir_all(dir.join("add")).unwrap();
    std::fs::write(
        dir.join("manifest.yaml"),
        "skill: evil\nversion: 1.0.0\nadds: [\"../escape.txt\"]\n",
    )
    .unwrap();

    let err = engine.apply(&dir).unwrap_err();
    assert!(matches!(
        err,
        GraftError::InvalidManifest(_) | GraftError::PathSafety(_)
    ));
    assert!(!fixture.root().parent().unwrap().join("escape.txt").exists());
}
