//! Shared test utilities for graft: a throwaway project and a skill package
//! builder.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde_json::Value;
use tempfile::TempDir;

use crate::config::Config;
use crate::core::manifest::{FileOp, ModifyBase, SkillManifest, StructuredEdits};
use crate::core::package::MANIFEST_FILE;
use crate::engine::{Engine, ScriptedRunner};
use crate::storage::FileStateStore;

/// A temporary project tree plus a separate directory for skill packages.
pub struct ProjectFixture {
    project: TempDir,
    skills: TempDir,
}

impl Default for ProjectFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectFixture {
    #[must_use]
    pub fn new() -> Self {
        Self {
            project: TempDir::new().expect("create project dir"),
            skills: TempDir::new().expect("create skills dir"),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.project.path()
    }

    #[must_use]
    pub fn skills_dir(&self) -> &Path {
        self.skills.path()
    }

    /// Write a project file, creating parents.
    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&path, content).expect("write project file");
        path
    }

    #[must_use]
    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.root().join(rel))
            .unwrap_or_else(|err| panic!("read {rel}: {err}"))
    }

    #[must_use]
    pub fn exists(&self, rel: &str) -> bool {
        self.root().join(rel).exists()
    }

    /// An engine whose commands all succeed.
    #[must_use]
    pub fn engine(&self) -> Engine {
        self.engine_with_runner(&Rc::new(ScriptedRunner::new()))
    }

    /// An engine that runs commands through `runner`.
    #[must_use]
    pub fn engine_with_runner(&self, runner: &Rc<ScriptedRunner>) -> Engine {
        let state_file = self.root().join(crate::engine::GRAFT_DIR).join("state.yaml");
        Engine::with_parts(
            self.root(),
            Config::default(),
            Box::new(FileStateStore::new(state_file)),
            Box::new(Rc::clone(runner)),
        )
        .expect("open engine")
    }

    /// Initialize the project and return its engine.
    #[must_use]
    pub fn init(&self, core_version: &str) -> Engine {
        let engine = self.engine();
        engine.init(core_version).expect("init project");
        engine
    }

    #[must_use]
    pub fn init_with_runner(&self, core_version: &str, runner: &Rc<ScriptedRunner>) -> Engine {
        let engine = self.engine_with_runner(runner);
        engine.init(core_version).expect("init project");
        engine
    }
}

/// Builds a skill package directory.
#[derive(Debug, Clone)]
pub struct SkillBuilder {
    manifest: SkillManifest,
    adds: BTreeMap<String, String>,
    modifies: BTreeMap<String, String>,
}

impl SkillBuilder {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            manifest: SkillManifest {
                skill: name.to_string(),
                version: "1.0.0".to_string(),
                description: format!("{name} test skill"),
                core_version: None,
                adds: Vec::new(),
                modifies: Vec::new(),
                structured: StructuredEdits::default(),
                file_ops: Vec::new(),
                depends: Vec::new(),
                conflicts: Vec::new(),
                modify_base: BTreeMap::new(),
                test: None,
                post_apply: Vec::new(),
                min_engine_version: None,
                author: None,
                license: None,
            },
            adds: BTreeMap::new(),
            modifies: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn version(mut self, version: &str) -> Self {
        self.manifest.version = version.to_string();
        self
    }

    #[must_use]
    pub fn core_version(mut self, version: &str) -> Self {
        self.manifest.core_version = Some(version.to_string());
        self
    }

    #[must_use]
    pub fn adds(mut self, rel: &str, content: &str) -> Self {
        self.manifest.adds.push(rel.to_string());
        self.adds.insert(rel.to_string(), content.to_string());
        self
    }

    #[must_use]
    pub fn modifies(mut self, rel: &str, content: &str) -> Self {
        self.manifest.modifies.push(rel.to_string());
        self.modifies.insert(rel.to_string(), content.to_string());
        self
    }

    #[must_use]
    pub fn depends(mut self, name: &str) -> Self {
        self.manifest.depends.push(name.to_string());
        self
    }

    #[must_use]
    pub fn conflicts(mut self, name: &str) -> Self {
        self.manifest.conflicts.push(name.to_string());
        self
    }

    #[must_use]
    pub fn dependency(mut self, package: &str, spec: &str) -> Self {
        self.manifest
            .structured
            .dependency_additions
            .insert(package.to_string(), Value::String(spec.to_string()));
        self
    }

    #[must_use]
    pub fn env(mut self, line: &str) -> Self {
        self.manifest.structured.env_additions.push(line.to_string());
        self
    }

    /// Add a service whose definition is given as YAML.
    #[must_use]
    pub fn service(mut self, name: &str, definition: &str) -> Self {
        let value: serde_yaml::Value =
            serde_yaml::from_str(definition).expect("service definition yaml");
        self.manifest
            .structured
            .service_additions
            .insert(serde_yaml::Value::String(name.to_string()), value);
        self
    }

    #[must_use]
    pub fn file_op(mut self, op: FileOp) -> Self {
        self.manifest.file_ops.push(op);
        self
    }

    #[must_use]
    pub fn modify_base(mut self, rel: &str, base: ModifyBase) -> Self {
        self.manifest.modify_base.insert(rel.to_string(), base);
        self
    }

    #[must_use]
    pub fn test(mut self, command: &str) -> Self {
        self.manifest.test = Some(command.to_string());
        self
    }

    #[must_use]
    pub fn post_apply(mut self, command: &str) -> Self {
        self.manifest.post_apply.push(command.to_string());
        self
    }

    #[must_use]
    pub fn min_engine_version(mut self, version: &str) -> Self {
        self.manifest.min_engine_version = Some(version.to_string());
        self
    }

    /// Write the package to `<parent>/<name>` and return its directory.
    pub fn build(&self, parent: &Path) -> PathBuf {
        let dir = parent.join(&self.manifest.skill);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).expect("clear previous package");
        }
        std::fs::create_dir_all(&dir).expect("create package dir");
        let manifest = serde_yaml::to_string(&self.manifest).expect("serialize manifest");
        std::fs::write(dir.join(MANIFEST_FILE), manifest).expect("write manifest");

        for (sub, files) in [("add", &self.adds), ("modify", &self.modifies)] {
            for (rel, content) in files {
                let path = dir.join(sub).join(rel);
                std::fs::create_dir_all(path.parent().expect("content path has a parent"))
                    .expect("create content dirs");
                std::fs::write(&path, content).expect("write content file");
            }
        }
        dir
    }
}
