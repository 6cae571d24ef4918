//! Merge engine: three-way text merge, structured mergers and patches.

pub mod diff3;
pub mod patch;
pub mod structured;

pub use diff3::{MergeResult, has_conflict_markers, merge3};
pub use patch::{FileChange, PatchSection, parse_patch, render_patch};
