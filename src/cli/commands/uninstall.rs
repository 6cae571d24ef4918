//! graft uninstall - Remove an applied skill

use clap::Args;
use colored::Colorize;

use crate::app::AppContext;
use crate::cli::commands::join_or_dash;
use crate::cli::output::{HumanLayout, emit_outcome};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct UninstallArgs {
    /// Name of the applied skill
    pub skill: String,
}

pub fn run(ctx: &AppContext, args: &UninstallArgs) -> Result<bool> {
    let engine = ctx.engine()?;
    let outcome = engine.uninstall(&args.skill)?;
    let warnings = outcome.patch_warnings.clone();

    emit_outcome(ctx.output_format, outcome.success, &outcome, warnings, |outcome| {
        let mut layout = HumanLayout::new();
        if outcome.success {
            layout.push_line(format!("{} Uninstalled {}", "✓".green().bold(), outcome.skill));
            layout.kv("replayed", &join_or_dash(&outcome.replayed));
        } else {
            layout.push_line(format!(
                "{} Uninstall of {} was rolled back",
                "✗".red().bold(),
                outcome.skill
            ));
            if !outcome.conflicts.is_empty() {
                layout.kv("conflicts", &join_or_dash(&outcome.conflicts));
            }
            if let Some(error) = &outcome.error {
                layout.kv("reason", error);
            }
        }
        layout
    })?;
    Ok(outcome.success)
}
