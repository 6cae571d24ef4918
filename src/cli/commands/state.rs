//! graft state - Print the state record

use clap::Args;

use crate::app::AppContext;
use crate::cli::output::{emit_robot, robot_ok};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct StateArgs {}

pub fn run(ctx: &AppContext, _args: &StateArgs) -> Result<bool> {
    let engine = ctx.engine()?;
    let state = engine.read_state()?;
    if ctx.machine_mode() {
        emit_robot(&robot_ok(&state), ctx.output_format)?;
    } else {
        print!("{}", serde_yaml::to_string(&state)?);
    }
    Ok(true)
}
