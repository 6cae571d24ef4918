//! graft resolve - Continue or abort an apply stopped on conflicts

use clap::{Args, Subcommand};
use colored::Colorize;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_outcome};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct ResolveArgs {
    #[command(subcommand)]
    pub command: ResolveCommand,
}

#[derive(Subcommand, Debug)]
pub enum ResolveCommand {
    /// Finish the apply once every conflict marker is gone
    Continue,
    /// Restore the tree from before the apply
    Abort,
}

pub fn run(ctx: &AppContext, args: &ResolveArgs) -> Result<bool> {
    let engine = ctx.engine()?;
    match args.command {
        ResolveCommand::Continue => {
            let outcome = engine.resolve_continue()?;
            emit_outcome(
                ctx.output_format,
                outcome.success,
                &outcome,
                Vec::new(),
                super::apply::human,
            )?;
            Ok(outcome.success)
        }
        ResolveCommand::Abort => {
            let report = engine.resolve_abort()?;
            emit_outcome(ctx.output_format, true, &report, Vec::new(), |report| {
                let mut layout = HumanLayout::new();
                layout.push_line(format!(
                    "{} Aborted apply of {} ({} files restored)",
                    "✓".green().bold(),
                    report.skill,
                    report.restored
                ));
                layout
            })?;
            Ok(true)
        }
    }
}
