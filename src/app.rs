//! Per-invocation context shared by every command handler.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cli::{Cli, OutputFormat};
use crate::config::Config;
use crate::engine::{Engine, GRAFT_DIR};
use crate::error::{GraftError, Result};

/// Environment variable naming the project root.
pub const ROOT_ENV: &str = "GRAFT_ROOT";

#[derive(Debug)]
pub struct AppContext {
    /// Project the command operates on.
    pub root: PathBuf,
    pub config: Config,
    pub output_format: OutputFormat,
    pub verbosity: u8,
}

impl AppContext {
    /// Resolve the project root and load configuration for `cli`.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let root = find_root()?;
        let config = Config::load(cli.config.as_deref(), &root)?;
        debug!(root = %root.display(), "project root resolved");
        Ok(Self {
            root,
            config,
            output_format: cli.output_format(),
            verbosity: cli.verbose,
        })
    }

    #[must_use]
    pub const fn machine_mode(&self) -> bool {
        self.output_format.is_machine_readable()
    }

    /// Open the engine for the project.
    pub fn engine(&self) -> Result<Engine> {
        Engine::open(&self.root, self.config.clone())
    }
}

/// `GRAFT_ROOT`, else the nearest ancestor holding `.graft/`, else the
/// working directory.
fn find_root() -> Result<PathBuf> {
    if let Some(root) = std::env::var_os(ROOT_ENV) {
        let root = PathBuf::from(root);
        if !root.is_dir() {
            return Err(GraftError::Config(format!(
                "{ROOT_ENV} {} is not a directory",
                root.display()
            )));
        }
        return Ok(root);
    }
    let cwd = std::env::current_dir()?;
    Ok(find_upwards(&cwd).unwrap_or(cwd))
}

fn find_upwards(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(GRAFT_DIR).is_dir())
        .map(Path::to_path_buf)
}
