//! Context-aware suggestions for error recovery.

use serde_json::Value;

use super::ErrorCode;

/// Generate a suggestion for an error, using context keys when present.
#[must_use]
pub fn suggest_for_error(code: ErrorCode, context: Option<&Value>) -> String {
    match code {
        ErrorCode::SkillDependencyMissing => suggest_missing_dependency(context),
        ErrorCode::SkillConflict => suggest_conflicting_skill(context),
        ErrorCode::SkillHasDependents => suggest_dependents(context),
        ErrorCode::MergeConflict => suggest_unresolved(context),
        _ => code.suggestion().to_string(),
    }
}

fn str_key<'a>(context: Option<&'a Value>, key: &str) -> Option<&'a str> {
    context.and_then(|ctx| ctx.get(key)).and_then(Value::as_str)
}

fn suggest_missing_dependency(context: Option<&Value>) -> String {
    str_key(context, "dependency").map_or_else(
        || ErrorCode::SkillDependencyMissing.suggestion().to_string(),
        |dep| format!("Apply '{dep}' first with `graft apply <path-to-{dep}>`"),
    )
}

fn suggest_conflicting_skill(context: Option<&Value>) -> String {
    str_key(context, "conflicts_with").map_or_else(
        || ErrorCode::SkillConflict.suggestion().to_string(),
        |other| format!("Run `graft uninstall {other}` before applying this skill"),
    )
}

fn suggest_dependents(context: Option<&Value>) -> String {
    let dependents: Vec<&str> = context
        .and_then(|ctx| ctx.get("dependents"))
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if dependents.is_empty() {
        return ErrorCode::SkillHasDependents.suggestion().to_string();
    }
    format!("Uninstall {} first", dependents.join(", "))
}

fn suggest_unresolved(context: Option<&Value>) -> String {
    let count = context
        .and_then(|ctx| ctx.get("files"))
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    if count == 0 {
        return ErrorCode::MergeConflict.suggestion().to_string();
    }
    format!("Edit the {count} listed file(s) to remove conflict markers, then run `graft resolve continue`")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_dependency_with_context() {
        let ctx = serde_json::json!({ "dependency": "auth" });
        let suggestion = suggest_for_error(ErrorCode::SkillDependencyMissing, Some(&ctx));
        assert!(suggestion.contains("auth"));
    }

    #[test]
    fn test_missing_dependency_without_context() {
        let suggestion = suggest_for_error(ErrorCode::SkillDependencyMissing, None);
        assert_eq!(suggestion, ErrorCode::SkillDependencyMissing.suggestion());
    }

    #[test]
    fn test_dependents_listed() {
        let ctx = serde_json::json!({ "dependents": ["b", "c"] });
        let suggestion = suggest_for_error(ErrorCode::SkillHasDependents, Some(&ctx));
        assert!(suggestion.contains("b, c"));
    }

    #[test]
    fn test_unresolved_counts_files() {
        let ctx = serde_json::json!({ "files": ["a.txt", "b.txt"] });
        let suggestion = suggest_for_error(ErrorCode::MergeConflict, Some(&ctx));
        assert!(suggestion.contains("2 listed"));
    }

    #[test]
    fn test_default_fallback() {
        let suggestion = suggest_for_error(ErrorCode::LockHeld, None);
        assert_eq!(suggestion, ErrorCode::LockHeld.suggestion());
    }
}
