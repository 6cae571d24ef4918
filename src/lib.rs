//! graft: a file-level patch engine that applies, replays and rebases
//! "skill" packages onto a base codebase.
//!
//! Skills are applied with three-way merges against a frozen base snapshot,
//! removed by replaying the remaining stack, and carried across core updates
//! the same way. Local edits are captured in customize sessions and replayed
//! after every skill.

pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod merge;
pub mod security;
pub mod storage;
pub mod test_utils;
pub mod utils;

pub use error::{GraftError, Result};

/// Package version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
