use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GraftError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub structured: StructuredConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub lock: LockConfig,
}

impl Config {
    /// Load configuration for the project at `root`.
    ///
    /// Layers, lowest first: defaults, the global file, the project file
    /// (`.graft/config.toml`), then `GRAFT_*` environment variables. An
    /// explicit path (or `GRAFT_CONFIG`) replaces both file layers.
    pub fn load(explicit_path: Option<&Path>, root: &Path) -> Result<Self> {
        let mut config = Self::default();

        let explicit = explicit_path
            .map(PathBuf::from)
            .or_else(|| std::env::var("GRAFT_CONFIG").ok().map(PathBuf::from));

        if let Some(path) = explicit {
            match Self::load_patch(&path)? {
                Some(patch) => config.merge_patch(patch),
                None => {
                    return Err(GraftError::Config(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
            }
        } else {
            if let Some(global) = Self::load_global()? {
                config.merge_patch(global);
            }
            if let Some(project) = Self::load_project(root)? {
                config.merge_patch(project);
            }
        }

        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Path of the global config file, if the platform has a config dir.
    #[must_use]
    pub fn global_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("graft/config.toml"))
    }

    /// Path of the project config file.
    #[must_use]
    pub fn project_path(root: &Path) -> PathBuf {
        root.join(".graft/config.toml")
    }

    fn load_global() -> Result<Option<ConfigPatch>> {
        match Self::global_path() {
            Some(path) => Self::load_patch(&path),
            None => Ok(None),
        }
    }

    fn load_project(root: &Path) -> Result<Option<ConfigPatch>> {
        Self::load_patch(&Self::project_path(root))
    }

    fn load_patch(path: &Path) -> Result<Option<ConfigPatch>> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|err| GraftError::Config(format!("read config {}: {err}", path.display())))?;
        let patch = toml::from_str(&raw)
            .map_err(|err| GraftError::Config(format!("parse config {}: {err}", path.display())))?;
        Ok(Some(patch))
    }

    fn merge_patch(&mut self, patch: ConfigPatch) {
        if let Some(patch) = patch.tracking {
            self.tracking.merge(patch);
        }
        if let Some(patch) = patch.structured {
            self.structured.merge(patch);
        }
        if let Some(patch) = patch.commands {
            self.commands.merge(patch);
        }
        if let Some(patch) = patch.lock {
            self.lock.merge(patch);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(&|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("GRAFT_INSTALL_COMMAND") {
            self.structured.install_command = value;
        }
        if let Some(value) = env_u64(lookup, "GRAFT_COMMAND_TIMEOUT_SECS")? {
            self.commands.timeout_secs = value;
        }
        if let Some(value) = lookup("GRAFT_SHELL") {
            self.commands.shell = value;
        }
        if let Some(value) = env_u64(lookup, "GRAFT_LOCK_STALE_AFTER_SECS")? {
            self.lock.stale_after_secs = value;
        }
        if let Some(values) = env_list(lookup, "GRAFT_TRACKING_EXCLUDE") {
            self.tracking.exclude = merge_unique(values, &self.tracking.exclude);
        }
        Ok(())
    }
}

// =========================================================================
// [tracking]
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Project-relative roots captured by `init` and watched by customize.
    pub include: Vec<String>,
    /// Glob patterns matched against each path component and the full path.
    pub exclude: Vec<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            include: vec![".".to_string()],
            exclude: vec![
                ".git".to_string(),
                ".graft".to_string(),
                "target".to_string(),
                "node_modules".to_string(),
            ],
        }
    }
}

impl TrackingConfig {
    fn merge(&mut self, patch: TrackingPatch) {
        if let Some(include) = patch.include {
            self.include = include;
        }
        if let Some(exclude) = patch.exclude {
            self.exclude = exclude;
        }
    }
}

// =========================================================================
// [structured]
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredConfig {
    pub dependency_file: String,
    pub dependency_key: String,
    pub env_file: String,
    pub services_file: String,
    pub services_key: String,
    /// Run once when dependency entries change. Empty disables.
    pub install_command: String,
}

impl Default for StructuredConfig {
    fn default() -> Self {
        Self {
            dependency_file: "package.json".to_string(),
            dependency_key: "dependencies".to_string(),
            env_file: ".env.example".to_string(),
            services_file: "docker-compose.yml".to_string(),
            services_key: "services".to_string(),
            install_command: "npm install".to_string(),
        }
    }
}

impl StructuredConfig {
    fn merge(&mut self, patch: StructuredPatch) {
        if let Some(value) = patch.dependency_file {
            self.dependency_file = value;
        }
        if let Some(value) = patch.dependency_key {
            self.dependency_key = value;
        }
        if let Some(value) = patch.env_file {
            self.env_file = value;
        }
        if let Some(value) = patch.services_file {
            self.services_file = value;
        }
        if let Some(value) = patch.services_key {
            self.services_key = value;
        }
        if let Some(value) = patch.install_command {
            self.install_command = value;
        }
    }

    /// The install command, if enabled.
    #[must_use]
    pub fn install(&self) -> Option<&str> {
        let command = self.install_command.trim();
        (!command.is_empty()).then_some(command)
    }
}

// =========================================================================
// [commands]
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Kill test, post-apply and install commands after this many seconds.
    /// Zero disables the limit.
    pub timeout_secs: u64,
    pub shell: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            shell: "sh".to_string(),
        }
    }
}

impl CommandsConfig {
    fn merge(&mut self, patch: CommandsPatch) {
        if let Some(value) = patch.timeout_secs {
            self.timeout_secs = value;
        }
        if let Some(value) = patch.shell {
            self.shell = value;
        }
    }

    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        if self.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_secs))
        }
    }
}

// =========================================================================
// [lock]
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Age after which a lock whose holder cannot be checked is broken.
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 3600,
        }
    }
}

impl LockConfig {
    fn merge(&mut self, patch: LockPatch) {
        if let Some(value) = patch.stale_after_secs {
            self.stale_after_secs = value;
        }
    }

    #[must_use]
    pub const fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

// =========================================================================
// Patches
// =========================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigPatch {
    pub tracking: Option<TrackingPatch>,
    pub structured: Option<StructuredPatch>,
    pub commands: Option<CommandsPatch>,
    pub lock: Option<LockPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct TrackingPatch {
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct StructuredPatch {
    pub dependency_file: Option<String>,
    pub dependency_key: Option<String>,
    pub env_file: Option<String>,
    pub services_file: Option<String>,
    pub services_key: Option<String>,
    pub install_command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CommandsPatch {
    pub timeout_secs: Option<u64>,
    pub shell: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LockPatch {
    pub stale_after_secs: Option<u64>,
}

fn merge_unique(mut values: Vec<String>, existing: &[String]) -> Vec<String> {
    for value in existing {
        if !values.contains(value) {
            values.push(value.clone());
        }
    }
    values
}

fn env_u64(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|err| GraftError::Config(format!("invalid {key} value {value}: {err}"))),
        None => Ok(None),
    }
}

fn env_list(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<Vec<String>> {
    lookup(key).map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // =========================================================================
    // Defaults
    // =========================================================================

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert_eq!(config.tracking.include, vec!["."]);
        assert!(config.tracking.exclude.contains(&".graft".to_string()));
        assert_eq!(config.structured.dependency_file, "package.json");
        assert_eq!(config.structured.install(), Some("npm install"));
        assert_eq!(config.commands.timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn zero_timeout_disables_limit() {
        let commands = CommandsConfig {
            timeout_secs: 0,
            ..CommandsConfig::default()
        };
        assert_eq!(commands.timeout(), None);
    }

    #[test]
    fn empty_install_command_disables_install() {
        let structured = StructuredConfig {
            install_command: "  ".into(),
            ..StructuredConfig::default()
        };
        assert_eq!(structured.install(), None);
    }

    // =========================================================================
    // File layering
    // =========================================================================

    #[test]
    fn explicit_file_overrides_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.toml");
        std::fs::write(
            &path,
            "[structured]\ndependency_file = \"deps.json\"\ninstall_command = \"\"\n\n[commands]\ntimeout_secs = 5\n",
        )
        .unwrap();

        let config = Config::load(Some(&path), temp.path()).unwrap();
        assert_eq!(config.structured.dependency_file, "deps.json");
        assert_eq!(config.structured.dependency_key, "dependencies");
        assert_eq!(config.structured.install(), None);
        assert_eq!(config.commands.timeout_secs, 5);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let err = Config::load(Some(&temp.path().join("nope.toml")), temp.path()).unwrap_err();
        assert!(matches!(err, GraftError::Config(_)));
    }

    #[test]
    fn invalid_toml_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.toml");
        std::fs::write(&path, "[commands\n").unwrap();
        let err = Config::load(Some(&path), temp.path()).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn unknown_section_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("c.toml");
        std::fs::write(&path, "[surprise]\nx = 1\n").unwrap();
        assert!(Config::load(Some(&path), temp.path()).is_err());
    }

    #[test]
    fn project_patch_merges_partially() {
        let mut config = Config::default();
        let patch: ConfigPatch = toml::from_str("[tracking]\nexclude = [\"dist\"]\n").unwrap();
        config.merge_patch(patch);
        assert_eq!(config.tracking.exclude, vec!["dist"]);
        assert_eq!(config.tracking.include, vec!["."]);
    }

    // =========================================================================
    // Environment overrides
    // =========================================================================

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        let lookup = lookup_from(&[
            ("GRAFT_INSTALL_COMMAND", "pnpm install"),
            ("GRAFT_COMMAND_TIMEOUT_SECS", "42"),
            ("GRAFT_LOCK_STALE_AFTER_SECS", "7"),
            ("GRAFT_TRACKING_EXCLUDE", "dist, .cache"),
        ]);
        config.apply_overrides(&lookup).unwrap();

        assert_eq!(config.structured.install(), Some("pnpm install"));
        assert_eq!(config.commands.timeout_secs, 42);
        assert_eq!(config.lock.stale_after_secs, 7);
        assert_eq!(config.tracking.exclude[..2], ["dist", ".cache"]);
        assert!(config.tracking.exclude.contains(&".git".to_string()));
    }

    #[test]
    fn env_override_rejects_bad_number() {
        let mut config = Config::default();
        let lookup = lookup_from(&[("GRAFT_COMMAND_TIMEOUT_SECS", "soon")]);
        assert!(matches!(
            config.apply_overrides(&lookup),
            Err(GraftError::Config(_))
        ));
    }
}
