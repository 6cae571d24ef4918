//! CLI module - Command-line interface definitions and handlers
//!
//! Uses clap v4 with derive macros for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use output::OutputFormat;

pub mod commands;
pub mod output;

/// Graft - apply, replay and rebase skill packages onto a base codebase
#[derive(Parser, Debug)]
#[command(name = "graft")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (human, json, jsonl, plain)
    #[arg(long, short = 'O', global = true, value_enum)]
    pub output_format: Option<OutputFormat>,

    /// Enable machine-readable JSON output (shorthand for --output-format=json)
    #[arg(long, short = 'm', global = true)]
    pub machine: bool,

    /// Color mode: auto, always, never
    #[arg(long, global = true, value_name = "WHEN")]
    pub color: Option<ColorMode>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress log output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file path (replaces the global and project config files)
    #[arg(long, global = true, env = "GRAFT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Color output mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ColorMode {
    /// Auto-detect based on terminal
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl Cli {
    /// Get the effective output format.
    ///
    /// An explicit `--output-format` wins over `--machine`; the default is
    /// human output.
    #[must_use]
    pub fn output_format(&self) -> OutputFormat {
        if let Some(fmt) = self.output_format {
            return fmt;
        }
        if self.machine {
            return OutputFormat::Json;
        }
        OutputFormat::Human
    }

    /// Whether colors should be disabled regardless of the terminal.
    #[must_use]
    pub fn force_plain(&self) -> bool {
        self.color == Some(ColorMode::Never) || !self.output_format().use_colors()
    }

    #[must_use]
    pub fn force_rich(&self) -> bool {
        self.color == Some(ColorMode::Always)
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture the current tree as the base snapshot
    Init(commands::init::InitArgs),

    /// Apply a skill package
    Apply(commands::apply::ApplyArgs),

    /// Remove an applied skill by replaying the rest of the stack
    Uninstall(commands::uninstall::UninstallArgs),

    /// Preview or apply a new core version
    Update(commands::update::UpdateArgs),

    /// Record local edits as a replayable patch
    Customize(commands::customize::CustomizeArgs),

    /// Continue or abort an apply that stopped on conflicts
    Resolve(commands::resolve::ResolveArgs),

    /// Print the state record
    State(commands::state::StateArgs),

    /// Show applied skills, drift and operations in flight
    Status(commands::status::StatusArgs),

    /// Break the project lock left by a crashed invocation
    Unlock(commands::unlock::UnlockArgs),
}
