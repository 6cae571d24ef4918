use graft::merge::{FileChange, render_patch};
use graft::test_utils::{ProjectFixture, SkillBuilder};

#[test]
fn test_commit_stores_exact_diff_of_session() {
    let fixture = ProjectFixture::new();
    let before = "fn main() {\n    println!(\"hi\");\n}\n";
    let after = "fn main() {\n    println!(\"hello\");\n}\n";
    fixture.write("src/main.rs", before);
    let engine = fixture.init("1.0.0");

    engine.start_customize("Friendlier greeting").unwrap();
    fixture.write("src/main.rs", after);
    let report = engine.commit_customize().unwrap();

    let state = engine.read_state().unwrap();
    assert_eq!(state.custom_modifications.len(), 1);
    let recorded = &state.custom_modifications[0];
    assert_eq!(recorded.description, "Friendlier greeting");
    assert_eq!(recorded.files_modified, vec!["src/main.rs"]);
    assert_eq!(report.patch_file.as_deref(), Some(recorded.patch_file.as_str()));

    let expected = render_patch(&[FileChange {
        path: "src/main.rs".to_string(),
        before: Some(before.to_string()),
        after: Some(after.to_string()),
    }]);
    assert_eq!(fixture.read(&recorded.patch_file), expected);
}

#[test]
fn test_customizations_survive_skill_uninstall_in_order() {
    let fixture = ProjectFixture::new();
    fixture.write("config.txt", "a\nb\nc\nd\ne\nf\ng\n");
    let engine = fixture.init("1.0.0");

    let skill = SkillBuilder::new("tuner")
        .modifies("config.txt", "a\nb\nc\nd\ne\nf\ng\ntuned\n")
        .build(fixture.skills_dir());
    assert!(engine.apply(&skill).unwrap().success);

    engine.start_customize("first").unwrap();
    fixture.write("config.txt", "A\nb\nc\nd\ne\nf\ng\ntuned\n");
    engine.commit_customize().unwrap();

    engine.start_customize("second").unwrap();
    fixture.write("config.txt", "A\nB\nc\nd\ne\nf\ng\ntuned\n");
    let second = engine.commit_customize().unwrap();
    assert!(second.patch_file.unwrap().contains("002-second"));

    let outcome = engine.uninstall("tuner").unwrap();
    assert!(outcome.success, "{outcome:?}");
    assert!(outcome.patch_warnings.is_empty(), "{outcome:?}");
    assert_eq!(fixture.read("config.txt"), "A\nB\nc\nd\ne\nf\ng\n");
}

#[test]
fn test_patch_that_no_longer_applies_is_a_warning() {
    let fixture = ProjectFixture::new();
    fixture.write("notes.txt", "base\n");
    let engine = fixture.init("1.0.0");

    let skill = SkillBuilder::new("notes")
        .modifies("notes.txt", "base\nfrom skill\n")
        .build(fixture.skills_dir());
    assert!(engine.apply(&skill).unwrap().success);

    engine.start_customize("edit skill line").unwrap();
    fixture.write("notes.txt", "base\nfrom skill, edited\n");
    engine.commit_customize().unwrap();

    let outcome = engine.uninstall("notes").unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.patch_warnings.len(), 1);
    assert_eq!(fixture.read("notes.txt"), "base\n");
}
