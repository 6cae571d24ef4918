//! Structured mergers for shared manifests.
//!
//! These run once per operation over the aggregate of every participating
//! skill's declarations:
//!
//! - dependency lists (a JSON object under a configurable key): union of keys,
//!   later skills win on collision, untouched entries keep their values and
//!   order;
//! - environment templates: a declared line is appended only when no line
//!   defines the same variable, existing lines are never rewritten;
//! - service maps (a YAML mapping under a configurable key): top-level union,
//!   a colliding service is replaced wholesale by the later definition.

use std::collections::HashSet;

use serde_json::{Map, Value};
use serde_yaml::Mapping;

use crate::core::StructuredEdits;
use crate::error::{GraftError, Result};

/// Fold several skills' structured edits into one, in application order.
#[must_use]
pub fn aggregate<'a>(edits: impl IntoIterator<Item = &'a StructuredEdits>) -> StructuredEdits {
    let mut combined = StructuredEdits::default();
    let mut env_keys = HashSet::new();
    for edit in edits {
        for (name, spec) in &edit.dependency_additions {
            combined.dependency_additions.insert(name.clone(), spec.clone());
        }
        for line in &edit.env_additions {
            if env_keys.insert(env_key(line).to_string()) {
                combined.env_additions.push(line.clone());
            }
        }
        for (service, definition) in &edit.service_additions {
            combined
                .service_additions
                .insert(service.clone(), definition.clone());
        }
    }
    combined
}

/// Result of a dependency merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyMerge {
    pub content: String,
    /// Keys that were new or whose value changed.
    pub changed: Vec<String>,
}

/// Merge `additions` into the object at `key` of a JSON dependency file.
pub fn merge_dependencies(
    existing: Option<&str>,
    key: &str,
    additions: &Map<String, Value>,
) -> Result<DependencyMerge> {
    let mut doc: Value = match existing {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)?,
        _ => Value::Object(Map::new()),
    };
    let root = doc.as_object_mut().ok_or_else(|| {
        GraftError::ValidationFailed("dependency file is not a JSON object".to_string())
    })?;
    let section = root
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| GraftError::ValidationFailed(format!("`{key}` is not a JSON object")))?;

    let mut changed = Vec::new();
    for (name, spec) in additions {
        if section.get(name) != Some(spec) {
            section.insert(name.clone(), spec.clone());
            changed.push(name.clone());
        }
    }

    let mut content = serde_json::to_string_pretty(&doc)?;
    content.push('\n');
    Ok(DependencyMerge { content, changed })
}

/// Variable name an environment line defines.
fn env_key(line: &str) -> &str {
    let line = line.trim();
    let line = line.strip_prefix("export ").unwrap_or(line);
    line.split_once('=').map_or(line, |(key, _)| key).trim()
}

/// Append environment lines whose variable is not yet defined.
///
/// Returns the new content and the lines that were appended.
#[must_use]
pub fn merge_env(existing: &str, additions: &[String]) -> (String, Vec<String>) {
    let mut present: HashSet<String> = existing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| env_key(line).to_string())
        .collect();

    let mut content = existing.to_string();
    let mut appended = Vec::new();
    for line in additions {
        let line = line.trim();
        if present.insert(env_key(line).to_string()) {
            if !content.is_empty() && !content.ends_with('\n') {
                content.push('\n');
            }
            content.push_str(line);
            content.push('\n');
            appended.push(line.to_string());
        }
    }
    (content, appended)
}

/// Merge service definitions into the mapping at `key` of a YAML file.
pub fn merge_services(existing: Option<&str>, key: &str, additions: &Mapping) -> Result<String> {
    let mut doc: serde_yaml::Value = match existing {
        Some(raw) if !raw.trim().is_empty() => serde_yaml::from_str(raw)?,
        _ => serde_yaml::Value::Mapping(Mapping::new()),
    };
    let root = doc.as_mapping_mut().ok_or_else(|| {
        GraftError::ValidationFailed("services file is not a YAML mapping".to_string())
    })?;
    let section_key = serde_yaml::Value::String(key.to_string());
    if !root.contains_key(&section_key) {
        root.insert(section_key.clone(), serde_yaml::Value::Mapping(Mapping::new()));
    }
    let section = root
        .get_mut(&section_key)
        .and_then(serde_yaml::Value::as_mapping_mut)
        .ok_or_else(|| GraftError::ValidationFailed(format!("`{key}` is not a YAML mapping")))?;

    for (service, definition) in additions {
        section.insert(service.clone(), definition.clone());
    }
    Ok(serde_yaml::to_string(&doc)?)
}
