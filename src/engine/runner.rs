//! External command execution.
//!
//! Pipelines never spawn processes directly; they go through a
//! [`ProcessRunner`] so tests can script exit codes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{GraftError, Result};

/// What a finished (or killed) command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutcome {
    #[must_use]
    pub fn succeeded(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn success(&self) -> bool {
        !self.timed_out && matches!(self.exit_code, Some(0))
    }

    /// One-line failure description for reports.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.timed_out {
            return "timed out".to_string();
        }
        let code = self
            .exit_code
            .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}"));
        let detail = self.stderr.trim();
        if detail.is_empty() {
            code
        } else {
            let last = detail.lines().last().unwrap_or(detail);
            format!("{code}: {last}")
        }
    }
}

/// Runs shell commands on behalf of the pipelines.
pub trait ProcessRunner {
    fn run(&self, command: &str, cwd: &Path) -> Result<CommandOutcome>;
}

/// Runs commands through `<shell> -c`, killing them after `timeout`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    timeout: Option<Duration>,
}

impl ShellRunner {
    #[must_use]
    pub fn new(shell: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            shell: shell.into(),
            timeout,
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("sh", None)
    }
}

impl ProcessRunner for ShellRunner {
    fn run(&self, cmd: &str, cwd: &Path) -> Result<CommandOutcome> {
        let spawn_err = |err: std::io::Error| GraftError::CommandFailed {
            command: cmd.to_string(),
            reason: err.to_string(),
        };

        debug!(command = cmd, cwd = %cwd.display(), "running command");
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(cmd)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_handle = std::thread::spawn(move || read_all(stdout));
        let stderr_handle = std::thread::spawn(move || read_all(stderr));

        let start = Instant::now();
        let mut timed_out = false;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if self.timeout.is_some_and(|limit| start.elapsed() > limit) {
                        timed_out = true;
                        let _ = child.kill();
                        break child.wait().map_err(spawn_err)?;
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err(err) => return Err(spawn_err(err)),
            }
        };

        let stdout = stdout_handle.join().unwrap_or_default();
        let stderr = stderr_handle.join().unwrap_or_default();
        if timed_out {
            warn!(command = cmd, "command timed out and was killed");
        }
        Ok(CommandOutcome {
            exit_code: status.code(),
            stdout,
            stderr,
            timed_out,
        })
    }
}

fn read_all(stream: Option<impl Read>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = stream {
        let _ = reader.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Test double: records commands and returns scripted exit codes.
///
/// Unscripted commands succeed.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    exit_codes: HashMap<String, i32>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `command` exit with `code`.
    #[must_use]
    pub fn with_exit(mut self, command: &str, code: i32) -> Self {
        self.exit_codes.insert(command.to_string(), code);
        self
    }

    /// Commands run so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(&self, command: &str, _cwd: &Path) -> Result<CommandOutcome> {
        self.calls.borrow_mut().push(command.to_string());
        let code = self.exit_codes.get(command).copied().unwrap_or(0);
        Ok(CommandOutcome {
            exit_code: Some(code),
            stderr: if code == 0 {
                String::new()
            } else {
                format!("{command} failed")
            },
            ..CommandOutcome::default()
        })
    }
}

impl<T: ProcessRunner + ?Sized> ProcessRunner for std::rc::Rc<T> {
    fn run(&self, command: &str, cwd: &Path) -> Result<CommandOutcome> {
        (**self).run(command, cwd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn test_shell_runner_captures_output() {
        let temp = TempDir::new().unwrap();
        let runner = ShellRunner::default();
        let outcome = runner.run("echo hello; echo oops >&2", temp.path()).unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.stdout.trim(), "hello");
        assert_eq!(outcome.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_runner_reports_exit_code() {
        let temp = TempDir::new().unwrap();
        let outcome = ShellRunner::default().run("exit 3", temp.path()).unwrap();
        assert!(!outcome.success());
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.describe(), "exit code 3");
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_runner_runs_in_cwd() {
        let temp = TempDir::new().unwrap();
        ShellRunner::default().run("echo hi > marker.txt", temp.path()).unwrap();
        assert!(temp.path().join("marker.txt").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_runner_timeout_kills() {
        let temp = TempDir::new().unwrap();
        let runner = ShellRunner::new("sh", Some(Duration::from_millis(200)));
        let start = Instant::now();
        let outcome = runner.run("exec sleep 5", temp.path()).unwrap();
        assert!(outcome.timed_out);
        assert!(!outcome.success());
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_scripted_runner_records_calls() {
        let runner = ScriptedRunner::new().with_exit("npm test", 1);
        let cwd = Path::new(".");
        assert!(runner.run("npm install", cwd).unwrap().success());
        assert!(!runner.run("npm test", cwd).unwrap().success());
        assert_eq!(runner.calls(), vec!["npm install", "npm test"]);
    }
}
