//! Core data model: skill manifests, packages and the base snapshot.

pub mod base;
pub mod manifest;
pub mod package;

pub use base::BaseSnapshot;
pub use manifest::{FileOp, ModifyBase, SkillManifest, StructuredEdits};
pub use package::SkillPackage;
