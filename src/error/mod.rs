//! Error handling for graft.
//!
//! This module provides:
//! - [`GraftError`]: The main error enum for all engine operations
//! - [`ErrorCode`]: Standardized error codes for machine parsing
//! - [`StructuredError`]: Rich error type with suggestions and context
//!
//! Merge conflicts and failing test/post-apply commands are not errors here.
//! Pipelines report them as unsuccessful outcomes so callers can resume.

mod codes;
mod suggestions;

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use codes::ErrorCode;
pub use suggestions::suggest_for_error;

use crate::security::PathPolicyViolation;

/// Main error type for graft operations.
#[derive(Error, Debug)]
pub enum GraftError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Project is not initialized at {}", .0.display())]
    NotInitialized(PathBuf),

    #[error("Project is already initialized at {}", .0.display())]
    AlreadyInitialized(PathBuf),

    #[error("Incompatible state schema {found} (this build supports {supported})")]
    IncompatibleSchema { found: String, supported: String },

    #[error("Invalid skill manifest: {0}")]
    InvalidManifest(String),

    #[error("Skill package not found: {}", .0.display())]
    PackageNotFound(PathBuf),

    #[error("Skill '{skill}' requires '{dependency}', which is not applied")]
    MissingDependency { skill: String, dependency: String },

    #[error("Skill '{skill}' conflicts with applied skill '{conflicts_with}'")]
    ConflictingSkill {
        skill: String,
        conflicts_with: String,
    },

    #[error("Skill '{skill}' requires graft {required} (running {current})")]
    EngineTooOld {
        skill: String,
        required: String,
        current: String,
    },

    #[error("Skill already applied: {0}")]
    SkillAlreadyApplied(String),

    #[error("Skill not applied: {0}")]
    SkillNotApplied(String),

    #[error("Cannot remove '{skill}': required by {}", .dependents.join(", "))]
    DependentSkills {
        skill: String,
        dependents: Vec<String>,
    },

    #[error("A customize session is active")]
    CustomizeActive,

    #[error("No customize session is active")]
    CustomizeNotActive,

    #[error("An unfinished operation is pending: {0}")]
    PendingOperation(String),

    #[error("No pending operation to resolve")]
    NoPendingOperation,

    #[error("Conflict markers remain in: {}", .0.join(", "))]
    UnresolvedConflicts(Vec<String>),

    #[error("Path safety violation: {0}")]
    PathSafety(#[from] PathPolicyViolation),

    #[error("Lock held by {holder}")]
    LockHeld { holder: String },

    #[error("State changed by another invocation before {operation} took the lock")]
    StateChanged { operation: String },

    #[error("Command `{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Patch {patch} failed to apply: {reason}")]
    PatchFailed { patch: String, reason: String },

    #[error("Backup is corrupted: {0}")]
    BackupCorrupted(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Missing required config: {0}")]
    MissingConfig(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GraftError {
    /// Get the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) | Self::Yaml(_) => ErrorCode::SerializationError,
            Self::NotInitialized(_) => ErrorCode::StateNotInitialized,
            Self::AlreadyInitialized(_) => ErrorCode::StateAlreadyInitialized,
            Self::IncompatibleSchema { .. } => ErrorCode::StateSchemaIncompatible,
            Self::InvalidManifest(_) => ErrorCode::ManifestInvalid,
            Self::PackageNotFound(_) => ErrorCode::PackageNotFound,
            Self::MissingDependency { .. } => ErrorCode::SkillDependencyMissing,
            Self::ConflictingSkill { .. } => ErrorCode::SkillConflict,
            Self::EngineTooOld { .. } => ErrorCode::EngineTooOld,
            Self::SkillAlreadyApplied(_) => ErrorCode::SkillAlreadyApplied,
            Self::SkillNotApplied(_) => ErrorCode::SkillNotApplied,
            Self::DependentSkills { .. } => ErrorCode::SkillHasDependents,
            Self::CustomizeActive => ErrorCode::CustomizeActive,
            Self::CustomizeNotActive => ErrorCode::CustomizeNotActive,
            Self::PendingOperation(_) => ErrorCode::PendingOperation,
            Self::NoPendingOperation => ErrorCode::NoPendingOperation,
            Self::UnresolvedConflicts(_) => ErrorCode::MergeConflict,
            Self::PathSafety(_) => ErrorCode::PathSafety,
            Self::LockHeld { .. } => ErrorCode::LockHeld,
            Self::StateChanged { .. } => ErrorCode::StateChanged,
            Self::CommandFailed { .. } => ErrorCode::CommandFailed,
            Self::PatchFailed { .. } => ErrorCode::PatchFailed,
            Self::BackupCorrupted(_) => ErrorCode::BackupCorrupted,
            Self::Config(_) => ErrorCode::ConfigInvalid,
            Self::MissingConfig(_) => ErrorCode::ConfigMissingRequired,
            Self::ValidationFailed(_) => ErrorCode::ValidationFailed,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Get context information for this error as JSON.
    #[must_use]
    pub fn context(&self) -> Option<Value> {
        match self {
            Self::MissingDependency { skill, dependency } => {
                Some(serde_json::json!({ "skill": skill, "dependency": dependency }))
            }
            Self::ConflictingSkill {
                skill,
                conflicts_with,
            } => Some(serde_json::json!({ "skill": skill, "conflicts_with": conflicts_with })),
            Self::DependentSkills { skill, dependents } => {
                Some(serde_json::json!({ "skill": skill, "dependents": dependents }))
            }
            Self::SkillNotApplied(skill) | Self::SkillAlreadyApplied(skill) => {
                Some(serde_json::json!({ "skill": skill }))
            }
            Self::IncompatibleSchema { found, supported } => {
                Some(serde_json::json!({ "found": found, "supported": supported }))
            }
            Self::LockHeld { holder } => Some(serde_json::json!({ "holder": holder })),
            Self::StateChanged { operation } => Some(serde_json::json!({ "operation": operation })),
            Self::PendingOperation(operation) => {
                Some(serde_json::json!({ "operation": operation }))
            }
            Self::UnresolvedConflicts(files) => Some(serde_json::json!({ "files": files })),
            Self::CommandFailed { command, reason } => {
                Some(serde_json::json!({ "command": command, "reason": reason }))
            }
            Self::MissingConfig(key) => Some(serde_json::json!({ "config_key": key })),
            _ => None,
        }
    }

    /// Convert this error to a structured error.
    #[must_use]
    pub fn to_structured(&self) -> StructuredError {
        StructuredError::from_graft_error(self)
    }
}

/// A structured error with machine-readable code, suggestion, and context.
///
/// Emitted in machine output mode so callers can decide whether to retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// The error code (e.g., "LOCK_HELD")
    pub code: ErrorCode,

    /// The numeric error code (e.g., 701)
    pub numeric_code: u16,

    /// Human-readable error message
    pub message: String,

    /// Actionable suggestion for recovery
    pub suggestion: String,

    /// Additional context for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// Whether the caller can resume after acting on the suggestion
    pub recoverable: bool,

    /// Error category (e.g., "skill", "state", "lock")
    pub category: String,
}

impl StructuredError {
    /// Create a new structured error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            numeric_code: code.numeric(),
            suggestion: code.suggestion().to_string(),
            context: None,
            recoverable: code.is_recoverable(),
            category: code.category().to_string(),
            code,
            message: message.into(),
        }
    }

    /// Create a structured error from a [`GraftError`].
    #[must_use]
    pub fn from_graft_error(err: &GraftError) -> Self {
        let code = err.code();
        let context = err.context();
        let suggestion = suggest_for_error(code, context.as_ref());

        Self {
            code,
            numeric_code: code.numeric(),
            message: err.to_string(),
            suggestion,
            context,
            recoverable: code.is_recoverable(),
            category: code.category().to_string(),
        }
    }

    /// Add context to this error.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self.suggestion = suggest_for_error(self.code, self.context.as_ref());
        self
    }

    /// Set a custom suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<GraftError> for StructuredError {
    fn from(err: GraftError) -> Self {
        Self::from_graft_error(&err)
    }
}

impl From<&GraftError> for StructuredError {
    fn from(err: &GraftError) -> Self {
        Self::from_graft_error(err)
    }
}

/// Result type alias using GraftError.
pub type Result<T> = std::result::Result<T, GraftError>;
