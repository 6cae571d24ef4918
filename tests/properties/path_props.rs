use proptest::prelude::*;

use graft::security::{PathPolicyViolation, ensure_relative, normalize_relative};

fn segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,10}"
}

proptest! {
    #[test]
    fn plain_relative_paths_are_accepted(parts in prop::collection::vec(segment(), 1..6)) {
        let path = parts.join("/");
        prop_assert!(ensure_relative(&path).is_ok());
        prop_assert_eq!(normalize_relative(&path), path);
    }

    #[test]
    fn parent_components_are_rejected(
        before in prop::collection::vec(segment(), 0..4),
        after in prop::collection::vec(segment(), 0..4),
    ) {
        let mut parts = before;
        parts.push("..".to_string());
        parts.extend(after);
        let path = parts.join("/");
        prop_assert!(matches!(
            ensure_relative(&path),
            Err(PathPolicyViolation::EscapesRoot(_))
        ));
    }

    #[test]
    fn absolute_paths_are_rejected(parts in prop::collection::vec(segment(), 0..4)) {
        let path = format!("/{}", parts.join("/"));
        prop_assert!(matches!(ensure_relative(&path), Err(PathPolicyViolation::Absolute(_))));
    }

    #[test]
    fn normalization_is_idempotent(parts in prop::collection::vec(segment(), 1..6)) {
        let messy = format!("./{}/", parts.join("/./"));
        let once = normalize_relative(&messy);
        prop_assert_eq!(normalize_relative(&once), once.clone());
        prop_assert_eq!(once, parts.join("/"));
    }
}
