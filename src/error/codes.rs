//! Standardized error codes for machine-parseable output.
//!
//! Error codes follow a numeric taxonomy:
//! - 1xx: Skill and manifest errors
//! - 2xx: State errors
//! - 3xx: Config errors
//! - 4xx: Merge and patch errors
//! - 5xx: Command errors
//! - 6xx: Storage errors
//! - 7xx: Session and lock errors
//! - 8xx: Validation and security errors
//! - 9xx: Internal errors

use serde::{Deserialize, Serialize};

/// Standardized error codes for machine output.
///
/// Each variant maps to a numeric code (e.g., `SkillNotApplied` -> E101).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================
    // Skill errors (1xx)
    // ========================================
    /// E101: Named skill is not in the applied list
    SkillNotApplied,
    /// E102: Skill manifest failed schema validation
    ManifestInvalid,
    /// E103: Skill package directory or manifest is missing
    PackageNotFound,
    /// E104: A declared dependency is not applied
    SkillDependencyMissing,
    /// E105: A declared conflict is applied
    SkillConflict,
    /// E106: Skill is already applied
    SkillAlreadyApplied,
    /// E107: Other applied skills depend on this one
    SkillHasDependents,
    /// E108: Skill needs a newer engine
    EngineTooOld,

    // ========================================
    // State errors (2xx)
    // ========================================
    /// E201: No state document exists yet
    StateNotInitialized,
    /// E202: State document schema is newer than this build
    StateSchemaIncompatible,
    /// E203: Init called on an initialized project
    StateAlreadyInitialized,

    // ========================================
    // Config errors (3xx)
    // ========================================
    /// E302: Config file has invalid syntax or values
    ConfigInvalid,
    /// E304: Required config value is missing
    ConfigMissingRequired,

    // ========================================
    // Merge errors (4xx)
    // ========================================
    /// E401: Conflict markers are still present
    MergeConflict,
    /// E402: A stored patch no longer applies
    PatchFailed,

    // ========================================
    // Command errors (5xx)
    // ========================================
    /// E501: External command failed or timed out
    CommandFailed,

    // ========================================
    // Storage errors (6xx)
    // ========================================
    /// E601: Data could not be serialized or parsed
    SerializationError,
    /// E602: Backup content does not match its recorded hash
    BackupCorrupted,

    // ========================================
    // Session and lock errors (7xx)
    // ========================================
    /// E701: Another invocation holds the project lock
    LockHeld,
    /// E702: A customize session is active
    CustomizeActive,
    /// E703: No customize session is active
    CustomizeNotActive,
    /// E704: A stopped apply awaits resolution
    PendingOperation,
    /// E705: Nothing to resolve
    NoPendingOperation,
    /// E706: State was rewritten while waiting for the lock
    StateChanged,

    // ========================================
    // Validation errors (8xx)
    // ========================================
    /// E801: Generic validation failure
    ValidationFailed,
    /// E802: Path escapes the project root
    PathSafety,

    // ========================================
    // Internal errors (9xx)
    // ========================================
    /// E901: Unexpected internal error
    InternalError,
    /// E905: Generic not found (catch-all)
    NotFound,
    /// E906: IO operation failed
    IoError,
}

impl ErrorCode {
    /// Get the numeric error code (e.g., `SkillNotApplied` -> 101).
    #[must_use]
    pub const fn numeric(&self) -> u16 {
        match self {
            // Skill errors (1xx)
            Self::SkillNotApplied => 101,
            Self::ManifestInvalid => 102,
            Self::PackageNotFound => 103,
            Self::SkillDependencyMissing => 104,
            Self::SkillConflict => 105,
            Self::SkillAlreadyApplied => 106,
            Self::SkillHasDependents => 107,
            Self::EngineTooOld => 108,

            // State errors (2xx)
            Self::StateNotInitialized => 201,
            Self::StateSchemaIncompatible => 202,
            Self::StateAlreadyInitialized => 203,

            // Config errors (3xx)
            Self::ConfigInvalid => 302,
            Self::ConfigMissingRequired => 304,

            // Merge errors (4xx)
            Self::MergeConflict => 401,
            Self::PatchFailed => 402,

            // Command errors (5xx)
            Self::CommandFailed => 501,

            // Storage errors (6xx)
            Self::SerializationError => 601,
            Self::BackupCorrupted => 602,

            // Session and lock errors (7xx)
            Self::LockHeld => 701,
            Self::CustomizeActive => 702,
            Self::CustomizeNotActive => 703,
            Self::PendingOperation => 704,
            Self::NoPendingOperation => 705,
            Self::StateChanged => 706,

            // Validation errors (8xx)
            Self::ValidationFailed => 801,
            Self::PathSafety => 802,

            // Internal errors (9xx)
            Self::InternalError => 901,
            Self::NotFound => 905,
            Self::IoError => 906,
        }
    }

    /// Get the error code as a formatted string (e.g., "E101").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("E{}", self.numeric())
    }

    /// Get the default suggestion for this error code.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::SkillNotApplied => "Run `graft state` to list applied skills",
            Self::ManifestInvalid => "Fix the listed manifest fields in manifest.yaml and retry",
            Self::PackageNotFound => "Point at a directory containing manifest.yaml",
            Self::SkillDependencyMissing => "Apply the missing dependency first",
            Self::SkillConflict => "Uninstall the conflicting skill before applying this one",
            Self::SkillAlreadyApplied => "Uninstall the skill first to reapply it",
            Self::SkillHasDependents => "Uninstall the dependent skills first",
            Self::EngineTooOld => "Upgrade graft to the version the skill requires",

            Self::StateNotInitialized => "Run `graft init <core-version>` in the project root",
            Self::StateSchemaIncompatible => "Upgrade graft; the state was written by a newer build",
            Self::StateAlreadyInitialized => "The project is ready; run `graft state` to inspect it",

            Self::ConfigInvalid => "Check TOML syntax and value types in the config file",
            Self::ConfigMissingRequired => "Set the required config value in .graft/config.toml",

            Self::MergeConflict => "Remove the conflict markers, then run `graft resolve continue`",
            Self::PatchFailed => "Re-create the customization with `graft customize start`",

            Self::CommandFailed => "Run the command by hand to see its output",

            Self::SerializationError => "The data format may be corrupted. Check the file for validity",
            Self::BackupCorrupted => "Inspect .graft/backup by hand before retrying",

            Self::LockHeld => "Another graft process is running. Wait and retry",
            Self::CustomizeActive => "Finish the session with `graft customize commit` or `abort`",
            Self::CustomizeNotActive => "Start a session with `graft customize start <description>`",
            Self::PendingOperation => "Run `graft resolve continue` or `graft resolve abort`",
            Self::NoPendingOperation => "There is nothing to resolve",
            Self::StateChanged => "Another graft process finished first. Retry the command",

            Self::ValidationFailed => "Review the validation errors and fix each issue",
            Self::PathSafety => "Use paths relative to the project root without `..`",

            Self::InternalError => "An unexpected error occurred. Please report this issue",
            Self::NotFound => "The requested resource was not found. Check the path",
            Self::IoError => "File operation failed. Check path exists and permissions are correct",
        }
    }

    /// Check if this error is potentially recoverable by the user.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::StateSchemaIncompatible | Self::PathSafety | Self::InternalError
        )
    }

    /// Get the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self.numeric() / 100 {
            1 => "skill",
            2 => "state",
            3 => "config",
            4 => "merge",
            5 => "command",
            6 => "storage",
            7 => "session",
            8 => "validation",
            9 => "internal",
            _ => "unknown",
        }
    }

    /// Iterate over all error codes.
    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::SkillNotApplied,
            Self::ManifestInvalid,
            Self::PackageNotFound,
            Self::SkillDependencyMissing,
            Self::SkillConflict,
            Self::SkillAlreadyApplied,
            Self::SkillHasDependents,
            Self::EngineTooOld,
            Self::StateNotInitialized,
            Self::StateSchemaIncompatible,
            Self::StateAlreadyInitialized,
            Self::ConfigInvalid,
            Self::ConfigMissingRequired,
            Self::MergeConflict,
            Self::PatchFailed,
            Self::CommandFailed,
            Self::SerializationError,
            Self::BackupCorrupted,
            Self::LockHeld,
            Self::CustomizeActive,
            Self::CustomizeNotActive,
            Self::PendingOperation,
            Self::NoPendingOperation,
            Self::StateChanged,
            Self::ValidationFailed,
            Self::PathSafety,
            Self::InternalError,
            Self::NotFound,
            Self::IoError,
        ]
        .into_iter()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_numeric() {
        assert_eq!(ErrorCode::SkillNotApplied.numeric(), 101);
        assert_eq!(ErrorCode::StateNotInitialized.numeric(), 201);
        assert_eq!(ErrorCode::ConfigInvalid.numeric(), 302);
        assert_eq!(ErrorCode::MergeConflict.numeric(), 401);
        assert_eq!(ErrorCode::CommandFailed.numeric(), 501);
        assert_eq!(ErrorCode::SerializationError.numeric(), 601);
        assert_eq!(ErrorCode::LockHeld.numeric(), 701);
        assert_eq!(ErrorCode::ValidationFailed.numeric(), 801);
        assert_eq!(ErrorCode::InternalError.numeric(), 901);
    }

    #[test]
    fn test_error_code_string() {
        assert_eq!(ErrorCode::SkillNotApplied.code_string(), "E101");
        assert_eq!(ErrorCode::PathSafety.code_string(), "E802");
    }

    #[test]
    fn test_numeric_codes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::all() {
            assert!(seen.insert(code.numeric()), "duplicate code for {code:?}");
        }
    }

    #[test]
    fn test_all_codes_have_suggestions_and_categories() {
        for code in ErrorCode::all() {
            assert!(!code.suggestion().is_empty(), "{code:?} has empty suggestion");
            assert_ne!(code.category(), "unknown", "{code:?} has invalid category");
        }
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::LockHeld).unwrap();
        assert_eq!(json, "\"LOCK_HELD\"");
        let parsed: ErrorCode = serde_json::from_str("\"PATH_SAFETY\"").unwrap();
        assert_eq!(parsed, ErrorCode::PathSafety);
    }
}
