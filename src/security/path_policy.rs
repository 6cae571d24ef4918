//! Path confinement for every project file operation.
//!
//! A [`PathResolver`] is bound to a canonical project root. Candidate paths
//! are joined onto the root, normalized, and then re-anchored on the real
//! location of their deepest existing ancestor so that symlinks pointing
//! outside the project are caught.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::error::Result;

/// Errors specific to path policy violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPolicyViolation {
    /// Path was given in absolute form
    Absolute(String),
    /// Path resolves outside the project root
    EscapesRoot(String),
    /// Path resolves to the project root itself
    RootItself,
    /// A symlink along the path points outside the root
    SymlinkEscape { path: String, target: PathBuf },
    /// Path component contains invalid characters
    InvalidComponent { component: String, reason: String },
}

impl std::fmt::Display for PathPolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absolute(path) => write!(f, "path {path:?} must be relative"),
            Self::EscapesRoot(path) => write!(f, "path {path:?} escapes the project root"),
            Self::RootItself => write!(f, "path resolves to the project root itself"),
            Self::SymlinkEscape { path, target } => {
                write!(f, "path {path:?} follows a symlink to {target:?} outside the root")
            }
            Self::InvalidComponent { component, reason } => {
                write!(f, "invalid path component {component:?}: {reason}")
            }
        }
    }
}

impl std::error::Error for PathPolicyViolation {}

type PolicyResult<T> = std::result::Result<T, PathPolicyViolation>;

const MAX_LINK_HOPS: u8 = 40;

/// Reject absolute paths and any `..`, root or prefix component.
///
/// Used on manifest-declared paths before they ever touch the filesystem.
pub fn ensure_relative(path: &str) -> PolicyResult<()> {
    if path.contains('\0') {
        return Err(PathPolicyViolation::InvalidComponent {
            component: path.to_string(),
            reason: "contains null byte".to_string(),
        });
    }
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return Err(PathPolicyViolation::Absolute(path.to_string()));
    }
    let mut depth = 0usize;
    for component in candidate.components() {
        match component {
            Component::ParentDir => return Err(PathPolicyViolation::EscapesRoot(path.to_string())),
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathPolicyViolation::Absolute(path.to_string()));
            }
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
        }
    }
    if depth == 0 {
        return Err(PathPolicyViolation::RootItself);
    }
    Ok(())
}

/// Canonical `/`-separated spelling of a validated relative path.
#[must_use]
pub fn normalize_relative(path: &str) -> String {
    Path::new(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Lexically normalize `path`, resolving `.` and `..` without touching disk.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Confines path operations to a single project root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Bind a resolver to `root`, which must exist.
    pub fn new(root: &Path) -> Result<Self> {
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    /// The canonical project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a project-relative path, following symlinks.
    ///
    /// Fails for paths resolving outside the root or to the root itself.
    pub fn resolve(&self, path: &str) -> PolicyResult<PathBuf> {
        if Path::new(path).is_absolute() {
            return Err(PathPolicyViolation::Absolute(path.to_string()));
        }
        let joined = normalize(&self.root.join(path));
        if !joined.starts_with(&self.root) {
            return Err(PathPolicyViolation::EscapesRoot(path.to_string()));
        }
        if joined == self.root {
            return Err(PathPolicyViolation::RootItself);
        }

        let resolved = self.follow_links(path, &joined)?;
        if !resolved.starts_with(&self.root) {
            return Err(PathPolicyViolation::EscapesRoot(path.to_string()));
        }
        if resolved == self.root {
            return Err(PathPolicyViolation::RootItself);
        }
        Ok(resolved)
    }

    /// Re-anchor `joined` on the real location of its deepest existing ancestor.
    fn follow_links(&self, original: &str, joined: &Path) -> PolicyResult<PathBuf> {
        let mut existing = joined.to_path_buf();
        let mut rest: Vec<std::ffi::OsString> = Vec::new();
        let mut hops = 0u8;

        loop {
            if existing.exists() {
                break;
            }
            // Dangling symlink: judge it by where it points.
            if let Ok(meta) = fs::symlink_metadata(&existing) {
                if meta.file_type().is_symlink() {
                    hops += 1;
                    if hops > MAX_LINK_HOPS {
                        return Err(PathPolicyViolation::EscapesRoot(original.to_string()));
                    }
                    let target = fs::read_link(&existing).unwrap_or_default();
                    let parent = existing.parent().unwrap_or(&self.root);
                    let absolute = normalize(&parent.join(&target));
                    if !absolute.starts_with(&self.root) {
                        return Err(PathPolicyViolation::SymlinkEscape {
                            path: original.to_string(),
                            target,
                        });
                    }
                    existing = absolute;
                    continue;
                }
            }
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    rest.push(name.to_os_string());
                    existing = parent.to_path_buf();
                }
                _ => break,
            }
        }

        let mut real = existing
            .canonicalize()
            .map_err(|_| PathPolicyViolation::EscapesRoot(original.to_string()))?;
        if !real.starts_with(&self.root) {
            return Err(PathPolicyViolation::SymlinkEscape {
                path: original.to_string(),
                target: real,
            });
        }
        for name in rest.into_iter().rev() {
            real.push(name);
        }
        Ok(real)
    }

    /// Look `path` up in the remap table, falling back to `path` itself when
    /// there is no entry or the recorded target is unsafe.
    #[must_use]
    pub fn remap<'a>(&self, path: &'a str, table: &'a BTreeMap<String, String>) -> &'a str {
        match table.get(path) {
            Some(target) => match self.resolve(target) {
                Ok(_) => target.as_str(),
                Err(violation) => {
                    warn!(path, target = %target, %violation, "ignoring unsafe remap target");
                    path
                }
            },
            None => path,
        }
    }

    /// Resolve `path` after applying the remap table.
    pub fn resolve_remap(
        &self,
        path: &str,
        table: &BTreeMap<String, String>,
    ) -> PolicyResult<PathBuf> {
        self.resolve(self.remap(path, table))
    }

    /// Strictly validate a new remap entry before it is recorded.
    pub fn validate_remap_entry(&self, from: &str, to: &str) -> PolicyResult<()> {
        ensure_relative(from)?;
        ensure_relative(to)?;
        self.resolve(from)?;
        self.resolve(to)?;
        Ok(())
    }

    /// Leniently filter a previously recorded remap table, dropping unsafe entries.
    #[must_use]
    pub fn sanitize_remap(&self, table: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        table
            .iter()
            .filter(|(from, to)| match self.validate_remap_entry(from, to) {
                Ok(()) => true,
                Err(violation) => {
                    warn!(from = %from, to = %to, %violation, "dropping unsafe remap entry");
                    false
                }
            })
            .map(|(from, to)| (from.clone(), to.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolver() -> (TempDir, PathResolver) {
        let temp = TempDir::new().unwrap();
        let resolver = PathResolver::new(temp.path()).unwrap();
        (temp, resolver)
    }

    #[test]
    fn resolves_plain_relative_path() {
        let (_temp, resolver) = resolver();
        let resolved = resolver.resolve("src/main.rs").unwrap();
        assert_eq!(resolved, resolver.root().join("src/main.rs"));
    }

    #[test]
    fn rejects_parent_escape() {
        let (_temp, resolver) = resolver();
        assert!(matches!(
            resolver.resolve("../outside"),
            Err(PathPolicyViolation::EscapesRoot(_))
        ));
        assert!(resolver.resolve("a/../../b").is_err());
    }

    #[test]
    fn rejects_root_itself() {
        let (_temp, resolver) = resolver();
        assert_eq!(resolver.resolve("."), Err(PathPolicyViolation::RootItself));
        assert_eq!(resolver.resolve("a/.."), Err(PathPolicyViolation::RootItself));
    }

    #[test]
    fn rejects_absolute() {
        let (_temp, resolver) = resolver();
        assert!(matches!(
            resolver.resolve("/etc/passwd"),
            Err(PathPolicyViolation::Absolute(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let (temp, resolver) = resolver();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).unwrap();

        assert!(matches!(
            resolver.resolve("link/file.txt"),
            Err(PathPolicyViolation::SymlinkEscape { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn follows_symlink_inside_root() {
        let (temp, resolver) = resolver();
        fs::create_dir(temp.path().join("real")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("real"), temp.path().join("alias")).unwrap();

        let resolved = resolver.resolve("alias/x.txt").unwrap();
        assert_eq!(resolved, resolver.root().join("real/x.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_dangling_symlink_escape() {
        let (temp, resolver) = resolver();
        std::os::unix::fs::symlink("/nonexistent/graft-target", temp.path().join("dangling"))
            .unwrap();
        assert!(resolver.resolve("dangling").is_err());
    }

    #[test]
    fn remap_falls_back_on_malicious_target() {
        let (_temp, resolver) = resolver();
        let mut table = BTreeMap::new();
        table.insert("config.yml".to_string(), "../../etc/passwd".to_string());
        table.insert("old.txt".to_string(), "new.txt".to_string());

        assert_eq!(resolver.remap("config.yml", &table), "config.yml");
        assert_eq!(
            resolver.resolve_remap("config.yml", &table).unwrap(),
            resolver.root().join("config.yml")
        );
        assert_eq!(resolver.remap("old.txt", &table), "new.txt");
        assert_eq!(resolver.remap("other.txt", &table), "other.txt");
    }

    #[test]
    fn sanitize_drops_only_bad_entries() {
        let (_temp, resolver) = resolver();
        let mut table = BTreeMap::new();
        table.insert("a.txt".to_string(), "b.txt".to_string());
        table.insert("c.txt".to_string(), "/abs".to_string());
        table.insert("../d".to_string(), "e.txt".to_string());

        let clean = resolver.sanitize_remap(&table);
        assert_eq!(clean.len(), 1);
        assert_eq!(clean.get("a.txt").map(String::as_str), Some("b.txt"));
    }

    #[test]
    fn strict_remap_validation_errors() {
        let (_temp, resolver) = resolver();
        assert!(resolver.validate_remap_entry("a", "b").is_ok());
        assert!(resolver.validate_remap_entry("a", "../b").is_err());
    }

    #[test]
    fn ensure_relative_cases() {
        assert!(ensure_relative("src/lib.rs").is_ok());
        assert!(ensure_relative("./src/lib.rs").is_ok());
        assert!(ensure_relative("../x").is_err());
        assert!(ensure_relative("/x").is_err());
        assert!(ensure_relative(".").is_err());
        assert!(ensure_relative("").is_err());
    }

    #[test]
    fn normalize_relative_strips_dots() {
        assert_eq!(normalize_relative("./src//lib.rs"), "src/lib.rs");
    }
}
