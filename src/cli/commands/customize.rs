//! graft customize - Record local edits as a replayable patch

use clap::{Args, Subcommand};
use colored::Colorize;

use crate::app::AppContext;
use crate::cli::commands::join_or_dash;
use crate::cli::output::{HumanLayout, emit_outcome};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct CustomizeArgs {
    #[command(subcommand)]
    pub command: CustomizeCommand,
}

#[derive(Subcommand, Debug)]
pub enum CustomizeCommand {
    /// Snapshot tracked files and start recording
    Start {
        /// What the customization is for
        description: String,
    },
    /// Store every change since `start` as a patch
    Commit,
    /// Stop recording without storing anything
    Abort,
}

pub fn run(ctx: &AppContext, args: &CustomizeArgs) -> Result<bool> {
    let engine = ctx.engine()?;
    match &args.command {
        CustomizeCommand::Start { description } => {
            let session = engine.start_customize(description)?;
            emit_outcome(ctx.output_format, true, &session, Vec::new(), |session| {
                let mut layout = HumanLayout::new();
                layout.push_line(format!(
                    "{} Customize session started: {}",
                    "✓".green().bold(),
                    session.description
                ));
                layout.kv("tracked files", &session.files.len().to_string());
                layout.push_line("Edit files, then run `graft customize commit`.");
                layout
            })?;
        }
        CustomizeCommand::Commit => {
            let report = engine.commit_customize()?;
            let warnings = report
                .skipped
                .iter()
                .map(|path| format!("{path} is not text and was left out of the patch"))
                .collect();
            emit_outcome(ctx.output_format, true, &report, warnings, |report| {
                let mut layout = HumanLayout::new();
                match &report.patch_file {
                    Some(patch) => {
                        layout.push_line(format!(
                            "{} Recorded customization {patch}",
                            "✓".green().bold()
                        ));
                        layout.kv("files", &join_or_dash(&report.files_modified));
                    }
                    None => {
                        layout.push_line("No changes since the session started; nothing recorded.");
                    }
                }
                layout
            })?;
        }
        CustomizeCommand::Abort => {
            let session = engine.abort_customize()?;
            emit_outcome(ctx.output_format, true, &session, Vec::new(), |session| {
                let mut layout = HumanLayout::new();
                layout.push_line(format!(
                    "{} Customize session aborted: {}",
                    "✓".green().bold(),
                    session.description
                ));
                layout
            })?;
        }
    }
    Ok(true)
}
