//! Skill manifest schema and validation.
//!
//! Manifests are `manifest.yaml` documents at the root of a skill package.
//! Unknown top-level fields are rejected at parse time and every path is
//! checked to be project-relative before any pipeline sees it.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GraftError, Result};
use crate::security::{ensure_relative, normalize_relative};

static SKILL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").expect("skill name pattern"));

static ENV_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("env key pattern"));

const ACCUMULATED: &str = "_accumulated";

/// Declarative metadata of one skill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SkillManifest {
    pub skill: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Core version the skill was authored against.
    #[serde(default)]
    pub core_version: Option<String>,
    #[serde(default)]
    pub adds: Vec<String>,
    #[serde(default)]
    pub modifies: Vec<String>,
    #[serde(default)]
    pub structured: StructuredEdits,
    #[serde(default)]
    pub file_ops: Vec<FileOp>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub modify_base: BTreeMap<String, ModifyBase>,
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub post_apply: Vec<String>,
    /// Oldest engine able to apply this skill.
    #[serde(default)]
    pub min_engine_version: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
}

/// Structured edits to shared manifests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StructuredEdits {
    /// Package name -> version spec, merged into the dependency file.
    #[serde(default)]
    pub dependency_additions: Map<String, Value>,
    /// `KEY` or `KEY=value` lines for the environment template.
    #[serde(default)]
    pub env_additions: Vec<String>,
    /// Service name -> definition, merged into the compose-style file.
    #[serde(default)]
    pub service_additions: serde_yaml::Mapping,
}

impl StructuredEdits {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dependency_additions.is_empty()
            && self.env_additions.is_empty()
            && self.service_additions.is_empty()
    }
}

/// A file operation executed before merging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileOp {
    Rename { from: String, to: String },
    Move { from: String, to: String },
    Delete {
        #[serde(alias = "from")]
        path: String,
    },
}

impl FileOp {
    /// Every path this operation reads or writes.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        match self {
            Self::Rename { from, to } | Self::Move { from, to } => vec![from.as_str(), to.as_str()],
            Self::Delete { path } => vec![path.as_str()],
        }
    }

    fn normalize(&mut self) {
        match self {
            Self::Rename { from, to } | Self::Move { from, to } => {
                *from = normalize_relative(from);
                *to = normalize_relative(to);
            }
            Self::Delete { path } => *path = normalize_relative(path),
        }
    }
}

/// Merge ancestor override for one modified path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModifyBase {
    /// Use the named skill's authored content as ancestor.
    Skill(String),
    /// Use the file as it currently stands.
    Accumulated,
}

impl From<String> for ModifyBase {
    fn from(value: String) -> Self {
        if value == ACCUMULATED {
            Self::Accumulated
        } else {
            Self::Skill(value)
        }
    }
}

impl From<ModifyBase> for String {
    fn from(value: ModifyBase) -> Self {
        match value {
            ModifyBase::Skill(name) => name,
            ModifyBase::Accumulated => ACCUMULATED.to_string(),
        }
    }
}

impl SkillManifest {
    /// Parse, validate and normalize a manifest.
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let mut manifest: Self = serde_yaml::from_str(input)
            .map_err(|err| GraftError::InvalidManifest(err.to_string()))?;
        manifest.validate()?;
        manifest.normalize();
        Ok(manifest)
    }

    /// Check the manifest invariants.
    pub fn validate(&self) -> Result<()> {
        validate_required("skill", &self.skill)?;
        if !SKILL_NAME.is_match(&self.skill) {
            return Err(invalid(format!(
                "skill name {:?} must be lowercase alphanumeric with . _ -",
                self.skill
            )));
        }
        validate_semver("version", &self.version)?;
        if let Some(min) = &self.min_engine_version {
            validate_semver("min_engine_version", min)?;
        }
        if let Some(core) = &self.core_version {
            validate_required("core_version", core)?;
        }

        let adds = validate_path_list("adds", &self.adds)?;
        let modifies = validate_path_list("modifies", &self.modifies)?;
        if let Some(both) = adds.intersection(&modifies).next() {
            return Err(invalid(format!("{both} is listed in both adds and modifies")));
        }

        for op in &self.file_ops {
            for path in op.paths() {
                validate_path("file_ops", path)?;
            }
            if let FileOp::Rename { from, to } | FileOp::Move { from, to } = op {
                if normalize_relative(from) == normalize_relative(to) {
                    return Err(invalid(format!("file_ops entry moves {from} onto itself")));
                }
            }
        }

        validate_names("depends", &self.skill, &self.depends)?;
        validate_names("conflicts", &self.skill, &self.conflicts)?;
        if let Some(both) = self.depends.iter().find(|d| self.conflicts.contains(d)) {
            return Err(invalid(format!("{both} is listed in both depends and conflicts")));
        }

        for (path, base) in &self.modify_base {
            validate_path("modify_base", path)?;
            if !modifies.contains(&normalize_relative(path)) {
                return Err(invalid(format!(
                    "modify_base entry {path} is not listed in modifies"
                )));
            }
            if let ModifyBase::Skill(name) = base {
                if name == &self.skill {
                    return Err(invalid(format!("modify_base for {path} refers to itself")));
                }
            }
        }

        for line in &self.structured.env_additions {
            let key = line.split_once('=').map_or(line.as_str(), |(k, _)| k).trim();
            if !ENV_KEY.is_match(key) {
                return Err(invalid(format!("env_additions entry {line:?} has no valid key")));
            }
        }

        if let Some(test) = &self.test {
            validate_required("test", test)?;
        }
        for command in &self.post_apply {
            validate_required("post_apply", command)?;
        }
        Ok(())
    }

    fn normalize(&mut self) {
        for path in self.adds.iter_mut().chain(self.modifies.iter_mut()) {
            *path = normalize_relative(path);
        }
        for op in &mut self.file_ops {
            op.normalize();
        }
        self.modify_base = std::mem::take(&mut self.modify_base)
            .into_iter()
            .map(|(path, base)| (normalize_relative(&path), base))
            .collect();
    }

    /// Paths the skill writes, before remapping.
    #[must_use]
    pub fn touched_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .adds
            .iter()
            .chain(self.modifies.iter())
            .cloned()
            .chain(
                self.file_ops
                    .iter()
                    .flat_map(|op| op.paths().into_iter().map(str::to_string)),
            )
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

fn invalid(message: String) -> GraftError {
    GraftError::InvalidManifest(message)
}

fn validate_required(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{field} must be non-empty")));
    }
    Ok(())
}

fn validate_semver(field: &str, value: &str) -> Result<()> {
    Version::parse(value)
        .map_err(|err| invalid(format!("{field} must be valid semver: {err}")))?;
    Ok(())
}

fn validate_path(field: &str, path: &str) -> Result<()> {
    ensure_relative(path).map_err(|violation| invalid(format!("{field}: {violation}")))?;
    let normalized = normalize_relative(path);
    if normalized == ".graft" || normalized.starts_with(".graft/") {
        return Err(invalid(format!("{field}: {path} points into the engine directory")));
    }
    Ok(())
}

fn validate_path_list(field: &str, paths: &[String]) -> Result<HashSet<String>> {
    let mut seen = HashSet::new();
    for path in paths {
        validate_path(field, path)?;
        if !seen.insert(normalize_relative(path)) {
            return Err(invalid(format!("duplicate {field} entry: {path}")));
        }
    }
    Ok(seen)
}

fn validate_names(field: &str, own: &str, names: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        validate_required(field, name)?;
        if name == own {
            return Err(invalid(format!("{field} must not name the skill itself")));
        }
        if !seen.insert(name.as_str()) {
            return Err(invalid(format!("duplicate {field} entry: {name}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
skill: telegram
version: 1.2.0
description: Telegram channel
core_version: 0.4.0
adds:
  - src/channels/telegram.ts
modifies:
  - ./src/index.ts
  - src/config.ts
structured:
  dependency_additions:
    grammy: "^1.21.0"
  env_additions:
    - TELEGRAM_BOT_TOKEN
    - TELEGRAM_MODE=polling
  service_additions:
    bot:
      image: bot:latest
file_ops:
  - type: rename
    from: old.txt
    to: new.txt
  - type: delete
    from: legacy.txt
depends: [core-auth]
conflicts: [discord]
modify_base:
  src/config.ts: _accumulated
  src/index.ts: core-auth
test: npm test
post_apply:
  - npm run build
"#;

    #[test]
    fn test_parse_sample() {
        let manifest = SkillManifest::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(manifest.skill, "telegram");
        assert_eq!(manifest.modifies, vec!["src/index.ts", "src/config.ts"]);
        assert_eq!(
            manifest.modify_base.get("src/config.ts"),
            Some(&ModifyBase::Accumulated)
        );
        assert_eq!(
            manifest.modify_base.get("src/index.ts"),
            Some(&ModifyBase::Skill("core-auth".into()))
        );
        assert_eq!(
            manifest.file_ops[1],
            FileOp::Delete {
                path: "legacy.txt".into()
            }
        );
        assert_eq!(manifest.structured.env_additions.len(), 2);
        assert!(!manifest.structured.is_empty());
    }

    #[test]
    fn test_minimal_manifest() {
        let manifest = SkillManifest::from_yaml_str("skill: tiny\nversion: 0.1.0\n").unwrap();
        assert!(manifest.adds.is_empty());
        assert!(manifest.structured.is_empty());
        assert!(manifest.touched_paths().is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = SkillManifest::from_yaml_str("skill: a\nversion: 1.0.0\nsurprise: true\n")
            .unwrap_err();
        assert!(matches!(err, GraftError::InvalidManifest(_)));
    }

    #[test]
    fn test_unknown_file_op_rejected() {
        let input = "skill: a\nversion: 1.0.0\nfile_ops:\n  - type: chmod\n    path: x\n";
        assert!(SkillManifest::from_yaml_str(input).is_err());
    }

    #[test]
    fn test_rejects_escaping_paths() {
        for bad in ["../x", "/etc/passwd", ".graft/state.yaml"] {
            let input = format!("skill: a\nversion: 1.0.0\nadds: [\"{bad}\"]\n");
            assert!(
                SkillManifest::from_yaml_str(&input).is_err(),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_overlap_and_duplicates() {
        let overlap = "skill: a\nversion: 1.0.0\nadds: [x]\nmodifies: [x]\n";
        assert!(SkillManifest::from_yaml_str(overlap).is_err());

        let dup = "skill: a\nversion: 1.0.0\nmodifies: [x, ./x]\n";
        assert!(SkillManifest::from_yaml_str(dup).is_err());
    }

    #[test]
    fn test_rejects_self_reference() {
        let input = "skill: a\nversion: 1.0.0\ndepends: [a]\n";
        assert!(SkillManifest::from_yaml_str(input).is_err());
    }

    #[test]
    fn test_rejects_bad_version_and_name() {
        assert!(SkillManifest::from_yaml_str("skill: a\nversion: one\n").is_err());
        assert!(SkillManifest::from_yaml_str("skill: Bad Name\nversion: 1.0.0\n").is_err());
    }

    #[test]
    fn test_modify_base_must_target_modified_path() {
        let input = "skill: a\nversion: 1.0.0\nmodify_base:\n  x: _accumulated\n";
        assert!(SkillManifest::from_yaml_str(input).is_err());
    }

    #[test]
    fn test_env_addition_keys_checked() {
        let input = "skill: a\nversion: 1.0.0\nstructured:\n  env_additions: [\"=nokey\"]\n";
        assert!(SkillManifest::from_yaml_str(input).is_err());
    }

    #[test]
    fn test_touched_paths_include_file_ops() {
        let manifest = SkillManifest::from_yaml_str(SAMPLE).unwrap();
        let touched = manifest.touched_paths();
        for path in ["new.txt", "old.txt", "legacy.txt", "src/index.ts"] {
            assert!(touched.iter().any(|p| p == path), "missing {path}");
        }
    }

    #[test]
    fn test_modify_base_round_trips_as_string() {
        let yaml = serde_yaml::to_string(&ModifyBase::Accumulated).unwrap();
        assert_eq!(yaml.trim(), "_accumulated");
    }
}
