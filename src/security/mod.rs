//! Path safety.

pub mod path_policy;

pub use path_policy::{PathPolicyViolation, PathResolver, ensure_relative, normalize_relative};
