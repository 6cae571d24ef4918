use std::path::Path;

use graft::test_utils::{ProjectFixture, SkillBuilder};
use tempfile::TempDir;

fn core_tree(files: &[(&str, &str)]) -> TempDir {
    let temp = TempDir::new().unwrap();
    for (rel, content) in files {
        let path = temp.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
    temp
}

fn read(root: &Path, rel: &str) -> String {
    std::fs::read_to_string(root.join(rel)).unwrap()
}

#[test]
fn test_update_rebases_skills_and_customizations() {
    let fixture = ProjectFixture::new();
    fixture.write("server.txt", "listen\nroute a\nroute b\nroute c\nroute d\nshutdown\n");
    fixture.write("lib.txt", "v1\n");
    let engine = fixture.init("1.0.0");

    let skill = SkillBuilder::new("metrics")
        .modifies("server.txt", "listen\nroute a\nroute b\nroute c\nroute d\nshutdown\nmetrics\n")
        .adds("metrics.txt", "counter\n")
        .build(fixture.skills_dir());
    assert!(engine.apply(&skill).unwrap().success);

    let core = core_tree(&[
        ("server.txt", "LISTEN\nroute a\nroute b\nroute c\nroute d\nshutdown\n"),
        ("lib.txt", "v2\n"),
    ]);
    let preview = engine.preview_update(core.path(), "2.0.0").unwrap();
    assert_eq!(preview.changed_files, vec!["lib.txt", "server.txt"]);
    assert_eq!(preview.risk_files, vec!["server.txt"]);

    let outcome = engine.apply_update(core.path(), "2.0.0").unwrap();
    assert!(outcome.success, "{outcome:?}");
    assert!(outcome.skills.iter().all(|s| s.success));

    let root = fixture.root();
    assert_eq!(
        read(root, "server.txt"),
        "LISTEN\nroute a\nroute b\nroute c\nroute d\nshutdown\nmetrics\n"
    );
    assert_eq!(read(root, "lib.txt"), "v2\n");
    assert_eq!(read(root, "metrics.txt"), "counter\n");

    let state = engine.read_state().unwrap();
    assert_eq!(state.core_version, "2.0.0");
    assert_eq!(
        engine.base().read("server.txt").unwrap().as_deref(),
        Some("LISTEN\nroute a\nroute b\nroute c\nroute d\nshutdown\n")
    );

    // The stack now uninstalls back to the new core.
    assert!(engine.uninstall("metrics").unwrap().success);
    assert_eq!(
        read(root, "server.txt"),
        "LISTEN\nroute a\nroute b\nroute c\nroute d\nshutdown\n"
    );
}

#[test]
fn test_update_core_conflict_restores_project() {
    let fixture = ProjectFixture::new();
    fixture.write("settings.txt", "mode=dev\n");
    let engine = fixture.init("1.0.0");
    fixture.write("settings.txt", "mode=local\n");

    let core = core_tree(&[("settings.txt", "mode=prod\n")]);
    let outcome = engine.apply_update(core.path(), "1.1.0").unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.core_conflicts, vec!["settings.txt"]);
    assert_eq!(fixture.read("settings.txt"), "mode=local\n");
    assert_eq!(engine.read_state().unwrap().core_version, "1.0.0");
    assert!(!engine.layout().staged_base_dir().exists());
}
