//! graft - apply, replay and rebase skill packages onto a base codebase.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use graft::Result;
use graft::app::AppContext;
use graft::cli::Cli;
use graft::cli::output::{emit_robot, robot_error_structured};

/// Exit status when an operation ran but did not complete.
const EXIT_INCOMPLETE: u8 = 1;
/// Exit status when an operation was rejected or failed with an error.
const EXIT_ERROR: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);
    init_colors(&cli);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_INCOMPLETE),
        Err(e) => {
            let format = cli.output_format();
            if format.is_machine_readable() {
                // Machine mode: structured error envelope on stdout
                if let Err(emit_err) = emit_robot(&robot_error_structured(&e), format) {
                    eprintln!("Error: {e} ({emit_err})");
                }
            } else {
                let structured = e.to_structured();
                eprintln!("Error: {e}");
                eprintln!("  hint: {}", structured.suggestion);
            }
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn run(cli: &Cli) -> Result<bool> {
    let ctx = AppContext::from_cli(cli)?;
    graft::cli::commands::run(&ctx, &cli.command)
}

fn init_tracing(cli: &Cli) {
    if cli.quiet {
        return;
    }

    let filter = match cli.verbose {
        0 => "warn,graft=info",
        1 => "info,graft=debug",
        2 => "debug,graft=trace",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if cli.output_format().is_machine_readable() {
        // JSON logging for machine mode
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init();
    }
}

fn init_colors(cli: &Cli) {
    if cli.force_plain() {
        colored::control::set_override(false);
        console::set_colors_enabled(false);
    } else if cli.force_rich() {
        colored::control::set_override(true);
        console::set_colors_enabled(true);
    }
}
