//! graft status - Applied skills, drift and operations in flight

use clap::Args;
use colored::Colorize;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_outcome};
use crate::engine::{FileState, StatusReport};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// List every recorded file, not only drifted ones
    #[arg(long)]
    pub all: bool,
}

pub fn run(ctx: &AppContext, args: &StatusArgs) -> Result<bool> {
    let engine = ctx.engine()?;
    let report = engine.status()?;
    let warnings = report
        .drifted()
        .into_iter()
        .map(|path| format!("{path} drifted from its recorded hash"))
        .collect();
    emit_outcome(ctx.output_format, true, &report, warnings, |report| {
        human(report, args.all)
    })?;
    Ok(true)
}

fn human(report: &StatusReport, all: bool) -> HumanLayout {
    let mut layout = HumanLayout::new();
    layout.title("graft status");
    layout
        .kv("core version", &report.core_version)
        .kv("schema", &report.schema_version)
        .kv("customizations", &report.custom_modifications.len().to_string());
    if let Some(session) = &report.customize_session {
        layout.kv("customizing", session);
    }
    if let Some(pending) = &report.pending_apply {
        layout.kv(
            "pending apply",
            &format!("{} ({} conflicted)", pending.skill, pending.conflicts.len()),
        );
    }
    if let Some(holder) = &report.lock_holder {
        layout.kv("locked by", &format!("pid {} ({})", holder.pid, holder.operation));
    }

    layout.blank().section("Applied skills");
    if report.skills.is_empty() {
        layout.push_line("(none)");
    }
    for skill in &report.skills {
        layout.push_line(format!("{} {}", skill.name.bold(), skill.version));
        for file in &skill.files {
            let mark = match file.state {
                FileState::Clean if !all => continue,
                FileState::Clean => "clean".green(),
                FileState::Modified => "modified".yellow(),
                FileState::Missing => "missing".red(),
            };
            layout.push_line(format!("    {mark:>8}  {}", file.path));
        }
    }
    layout
}
