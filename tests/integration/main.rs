//! End-to-end scenarios against the library API.

mod customize_tests;
mod error_handling_tests;
mod lifecycle_tests;
mod update_tests;

use std::collections::BTreeMap;

use graft::engine::Engine;
use graft::test_utils::ProjectFixture;

/// Every tracked file of the project with its content.
pub fn tree(fixture: &ProjectFixture, engine: &Engine) -> BTreeMap<String, String> {
    engine
        .tracked_files()
        .unwrap()
        .into_iter()
        .map(|rel| {
            let content = fixture.read(&rel);
            (rel, content)
        })
        .collect()
}
