//! Multi-file unified diffs for recorded customizations.
//!
//! A patch is a sequence of per-file sections, each introduced by a
//! `diff --git a/<path> b/<path>` line followed by standard unified-diff
//! headers and hunks. `/dev/null` in a header marks creation or deletion.

use diffy::{Patch, apply, create_patch};

use crate::error::{GraftError, Result};

const SECTION_PREFIX: &str = "diff --git ";
const DEV_NULL: &str = "/dev/null";

/// One file's before/after content. `None` means the file is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// A parsed per-file section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSection {
    pub path: String,
    pub created: bool,
    pub deleted: bool,
    /// Unified diff body starting at the `---` header.
    pub body: String,
}

/// Render one section.
#[must_use]
pub fn render_section(change: &FileChange) -> String {
    let before = change.before.as_deref().unwrap_or("");
    let after = change.after.as_deref().unwrap_or("");
    let diff = create_patch(before, after).to_string();
    let hunks: String = diff
        .split_inclusive('\n')
        .skip_while(|line| line.starts_with("--- ") || line.starts_with("+++ "))
        .collect();

    let path = &change.path;
    let old = if change.before.is_some() {
        format!("a/{path}")
    } else {
        DEV_NULL.to_string()
    };
    let new = if change.after.is_some() {
        format!("b/{path}")
    } else {
        DEV_NULL.to_string()
    };
    format!("{SECTION_PREFIX}a/{path} b/{path}\n--- {old}\n+++ {new}\n{hunks}")
}

/// Render a patch covering every change, in the given order.
#[must_use]
pub fn render_patch(changes: &[FileChange]) -> String {
    changes.iter().map(render_section).collect()
}

/// Split a patch into its per-file sections.
pub fn parse_patch(text: &str) -> Result<Vec<PatchSection>> {
    let mut sections = Vec::new();
    let mut current: Option<(String, String)> = None;

    for line in text.split_inclusive('\n') {
        if let Some(header) = line.strip_prefix(SECTION_PREFIX) {
            if let Some((path, body)) = current.take() {
                sections.push(finish_section(path, body)?);
            }
            let path = header
                .trim_end()
                .split(' ')
                .next()
                .and_then(|a| a.strip_prefix("a/"))
                .ok_or_else(|| malformed(format!("bad section header: {}", line.trim_end())))?;
            current = Some((path.to_string(), String::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push_str(line);
        } else if !line.trim().is_empty() {
            return Err(malformed("content before first section header".to_string()));
        }
    }
    if let Some((path, body)) = current {
        sections.push(finish_section(path, body)?);
    }
    Ok(sections)
}

fn finish_section(path: String, body: String) -> Result<PatchSection> {
    let mut lines = body.lines();
    let old = lines
        .next()
        .and_then(|l| l.strip_prefix("--- "))
        .ok_or_else(|| malformed(format!("{path}: missing --- header")))?;
    let new = lines
        .next()
        .and_then(|l| l.strip_prefix("+++ "))
        .ok_or_else(|| malformed(format!("{path}: missing +++ header")))?;
    Ok(PatchSection {
        created: old.trim() == DEV_NULL,
        deleted: new.trim() == DEV_NULL,
        path,
        body,
    })
}

fn malformed(reason: String) -> GraftError {
    GraftError::PatchFailed {
        patch: "<input>".to_string(),
        reason,
    }
}

impl PatchSection {
    /// Apply this section to the file's current content.
    ///
    /// Returns the new content, or `None` when the section deletes the file.
    pub fn apply_to(&self, current: Option<&str>) -> Result<Option<String>> {
        let fail = |reason: String| GraftError::PatchFailed {
            patch: self.path.clone(),
            reason,
        };
        if self.created && current.is_some() {
            return Err(fail("file already exists".to_string()));
        }
        if !self.created && current.is_none() {
            return Err(fail("file is missing".to_string()));
        }
        let patch = Patch::from_str(&self.body).map_err(|err| fail(err.to_string()))?;
        let patched = apply(current.unwrap_or(""), &patch).map_err(|err| fail(err.to_string()))?;
        if self.deleted {
            Ok(None)
        } else {
            Ok(Some(patched))
        }
    }
}
