//! Property-based tests for the merge and path layers.

mod merge_props;
mod path_props;
