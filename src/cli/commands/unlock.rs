//! graft unlock - Break the project lock

use clap::Args;
use colored::Colorize;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_outcome};
use crate::error::Result;
use crate::storage::{LockHolder, ProjectLock};

#[derive(Args, Debug)]
pub struct UnlockArgs {}

#[derive(Serialize)]
struct UnlockReport {
    broken: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    holder: Option<LockHolder>,
}

pub fn run(ctx: &AppContext, _args: &UnlockArgs) -> Result<bool> {
    let engine = ctx.engine()?;
    let path = engine.layout().lock_file();
    let holder = ProjectLock::status(&path)?;
    let report = UnlockReport {
        broken: ProjectLock::break_lock(&path)?,
        holder,
    };

    emit_outcome(ctx.output_format, true, &report, Vec::new(), |report| {
        let mut layout = HumanLayout::new();
        match (&report.holder, report.broken) {
            (Some(holder), true) => layout.push_line(format!(
                "{} Broke lock held by pid {} on {} ({})",
                "✓".green().bold(),
                holder.pid,
                holder.hostname,
                holder.operation
            )),
            (None, true) => layout.push_line(format!("{} Removed unreadable lock", "✓".green().bold())),
            _ => layout.push_line("The project is not locked."),
        };
        layout
    })?;
    Ok(true)
}
