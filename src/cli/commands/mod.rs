//! CLI command implementations
//!
//! Each subcommand has its own module with:
//! - Args struct for command-line arguments
//! - `run()` function to execute the command
//!
//! Handlers return whether the operation completed. Conflicts and failed
//! commands are reported outcomes, not errors, so they map to `Ok(false)`.

use crate::app::AppContext;
use crate::cli::Commands;
use crate::error::Result;

pub mod apply;
pub mod customize;
pub mod init;
pub mod resolve;
pub mod state;
pub mod status;
pub mod uninstall;
pub mod unlock;
pub mod update;

/// Dispatch a command to its handler
pub fn run(ctx: &AppContext, command: &Commands) -> Result<bool> {
    match command {
        Commands::Init(args) => init::run(ctx, args),
        Commands::Apply(args) => apply::run(ctx, args),
        Commands::Uninstall(args) => uninstall::run(ctx, args),
        Commands::Update(args) => update::run(ctx, args),
        Commands::Customize(args) => customize::run(ctx, args),
        Commands::Resolve(args) => resolve::run(ctx, args),
        Commands::State(args) => state::run(ctx, args),
        Commands::Status(args) => status::run(ctx, args),
        Commands::Unlock(args) => unlock::run(ctx, args),
    }
}

/// Render a list for human output, `-` when empty.
pub(crate) fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}
