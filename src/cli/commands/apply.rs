//! graft apply - Apply a skill package

use std::path::PathBuf;

use clap::Args;
use colored::Colorize;

use crate::app::AppContext;
use crate::cli::commands::join_or_dash;
use crate::cli::output::{HumanLayout, emit_outcome};
use crate::engine::ApplyOutcome;
use crate::error::Result;

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Skill package directory (contains manifest.yaml)
    pub package: PathBuf,
}

pub fn run(ctx: &AppContext, args: &ApplyArgs) -> Result<bool> {
    let engine = ctx.engine()?;
    let outcome = engine.apply(&args.package)?;
    let warnings = outcome
        .drift
        .iter()
        .map(|path| format!("{path} changed since a skill last wrote it"))
        .collect();
    emit_outcome(ctx.output_format, outcome.success, &outcome, warnings, human)?;
    Ok(outcome.success)
}

/// Human rendering shared with `resolve continue`.
pub(crate) fn human(outcome: &ApplyOutcome) -> HumanLayout {
    let mut layout = HumanLayout::new();
    let label = format!("{} {}", outcome.skill, outcome.version);
    if outcome.success {
        layout.push_line(format!("{} Applied {label}", "✓".green().bold()));
    } else if outcome.backup_pending {
        layout.push_line(format!("{} {label} stopped on merge conflicts", "!".yellow().bold()));
        layout.kv("conflicts", &join_or_dash(&outcome.conflicts));
        layout.blank();
        layout.push_line("Resolve the markers, then run `graft resolve continue`");
        layout.push_line("or discard the apply with `graft resolve abort`.");
    } else {
        layout.push_line(format!("{} {label} was rolled back", "✗".red().bold()));
        if let Some(error) = &outcome.error {
            layout.kv("reason", error);
        }
    }
    layout
}
