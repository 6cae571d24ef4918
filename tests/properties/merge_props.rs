use proptest::prelude::*;

use graft::merge::{MergeResult, has_conflict_markers, merge3};

fn numbered(count: usize) -> Vec<String> {
    (0..count).map(|k| format!("line {k}")).collect()
}

fn join(lines: &[String]) -> String {
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

proptest! {
    #[test]
    fn identical_sides_merge_to_themselves(text in "([a-z ]{0,12}\n){0,12}") {
        prop_assert_eq!(merge3(&text, &text, &text, "skill"), MergeResult::Clean(text.clone()));
    }

    #[test]
    fn one_sided_change_is_adopted(
        ancestor in "([a-z ]{0,12}\n){0,8}",
        changed in "([a-z ]{0,12}\n){0,8}",
    ) {
        prop_assert_eq!(
            merge3(&ancestor, &ancestor, &changed, "skill"),
            MergeResult::Clean(changed.clone())
        );
        prop_assert_eq!(
            merge3(&changed, &ancestor, &ancestor, "skill"),
            MergeResult::Clean(changed.clone())
        );
    }

    #[test]
    fn separated_edits_merge_cleanly(
        count in 4usize..24,
        first in 0usize..24,
        gap in 2usize..8,
    ) {
        let a = first % count;
        let b = a + gap;
        prop_assume!(b < count);

        let ancestor = numbered(count);
        let mut current = ancestor.clone();
        current[a] = format!("current {a}");
        let mut incoming = ancestor.clone();
        incoming[b] = format!("incoming {b}");
        let mut expected = ancestor.clone();
        expected[a] = current[a].clone();
        expected[b] = incoming[b].clone();

        let merged = merge3(&join(&current), &join(&ancestor), &join(&incoming), "skill");
        prop_assert_eq!(merged, MergeResult::Clean(join(&expected)));
    }

    #[test]
    fn competing_edits_leave_markers(count in 1usize..16, pick in 0usize..16) {
        let at = pick % count;
        let ancestor = numbered(count);
        let mut current = ancestor.clone();
        current[at] = "ours".to_string();
        let mut incoming = ancestor.clone();
        incoming[at] = "theirs".to_string();

        match merge3(&join(&current), &join(&ancestor), &join(&incoming), "skill") {
            MergeResult::Conflict(text) => {
                prop_assert!(has_conflict_markers(&text));
                prop_assert!(text.contains("ours\n"));
                prop_assert!(text.contains("theirs\n"));
            }
            MergeResult::Clean(text) => prop_assert!(false, "expected conflict, got {text:?}"),
        }
    }
}
