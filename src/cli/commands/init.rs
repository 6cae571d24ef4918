//! graft init - Capture the current tree as the base snapshot

use clap::Args;
use colored::Colorize;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_outcome};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Version of the core codebase being captured
    pub core_version: String,
}

pub fn run(ctx: &AppContext, args: &InitArgs) -> Result<bool> {
    let engine = ctx.engine()?;
    let report = engine.init(&args.core_version)?;

    emit_outcome(ctx.output_format, true, &report, Vec::new(), |report| {
        let mut layout = HumanLayout::new();
        layout.push_line(format!(
            "{} Initialized graft at {}",
            "✓".green().bold(),
            ctx.root.display()
        ));
        layout
            .kv("core version", &report.core_version)
            .kv("base files", &report.files_captured.to_string());
        layout
    })?;
    Ok(true)
}
