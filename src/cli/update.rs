//! `update` command

use crate::error::BbctlError;
use crate::factory::{self, Factory};
use crate::output::BasicOutput;
use anyhow::Result;
use clap::{Args, Subcommand};

#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[command(subcommand)]
    pub command: Option<UpdateCommand>,
}

#[derive(Subcommand, Debug)]
pub enum UpdateCommand {
    /// Check for a newer bbctl release
    Check,
}

pub fn run(factory: &dyn Factory, args: UpdateArgs) -> Result<()> {
    match args.command {
        None => factory::output_client(factory)?.output(&BasicOutput::single(
            "msg",
            "No update functionality has been implemented yet",
        )),
        Some(UpdateCommand::Check) => Err(BbctlError::NotImplemented.into()),
    }
}
