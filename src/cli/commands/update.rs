//! graft update - Preview or apply a new core version

use std::path::PathBuf;

use clap::{Args, Subcommand};
use colored::Colorize;

use crate::app::AppContext;
use crate::cli::commands::join_or_dash;
use crate::cli::output::{HumanLayout, emit_outcome};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[command(subcommand)]
    pub command: UpdateCommand,
}

#[derive(Subcommand, Debug)]
pub enum UpdateCommand {
    /// Show which files the update changes and which are at risk
    #[command(disable_version_flag = true)]
    Preview(UpdateTarget),
    /// Merge the new core and replay every applied skill on top
    #[command(disable_version_flag = true)]
    Apply(UpdateTarget),
}

#[derive(Args, Debug)]
pub struct UpdateTarget {
    /// Directory holding the new core tree
    pub core: PathBuf,

    /// Version of the new core
    #[arg(long)]
    pub version: String,
}

pub fn run(ctx: &AppContext, args: &UpdateArgs) -> Result<bool> {
    match &args.command {
        UpdateCommand::Preview(target) => preview(ctx, target),
        UpdateCommand::Apply(target) => apply(ctx, target),
    }
}

fn preview(ctx: &AppContext, target: &UpdateTarget) -> Result<bool> {
    let engine = ctx.engine()?;
    let preview = engine.preview_update(&target.core, &target.version)?;

    emit_outcome(ctx.output_format, true, &preview, Vec::new(), |preview| {
        let mut layout = HumanLayout::new();
        layout.title(&format!(
            "Update {} -> {}",
            preview.current_version, preview.target_version
        ));
        layout.kv("changed", &preview.changed_files.len().to_string());
        layout.kv("at risk", &preview.risk_files.len().to_string());
        layout.kv("migrations", &join_or_dash(&preview.migrations));
        if !preview.risk_files.is_empty() {
            layout.blank().section("Files needing attention");
            for path in &preview.risk_files {
                layout.bullet(path);
            }
        }
        layout
    })?;
    Ok(true)
}

fn apply(ctx: &AppContext, target: &UpdateTarget) -> Result<bool> {
    let engine = ctx.engine()?;
    let outcome = engine.apply_update(&target.core, &target.version)?;
    let mut warnings = outcome.patch_warnings.clone();
    warnings.extend(
        outcome
            .dropped
            .iter()
            .map(|skill| format!("skill {skill} no longer applies and was removed")),
    );

    emit_outcome(ctx.output_format, outcome.success, &outcome, warnings, |outcome| {
        let mut layout = HumanLayout::new();
        if outcome.success {
            layout.push_line(format!(
                "{} Updated core {} -> {}",
                "✓".green().bold(),
                outcome.previous_version,
                outcome.version
            ));
        } else {
            layout.push_line(format!("{} Update was rolled back", "✗".red().bold()));
            if !outcome.core_conflicts.is_empty() {
                layout.kv("core conflicts", &join_or_dash(&outcome.core_conflicts));
            }
            if let Some(error) = &outcome.error {
                layout.kv("reason", error);
            }
        }
        if !outcome.skills.is_empty() {
            layout.blank().section("Skills");
            for result in &outcome.skills {
                let mark = if result.success {
                    "✓".green()
                } else {
                    "✗".red()
                };
                let mut line = format!("{mark} {}", result.skill);
                if !result.conflicts.is_empty() {
                    line.push_str(&format!(" (conflicts: {})", result.conflicts.join(", ")));
                }
                if let Some(error) = &result.error {
                    line.push_str(&format!(" ({error})"));
                }
                layout.push_line(line);
            }
        }
        layout
    })?;
    Ok(outcome.success)
}
