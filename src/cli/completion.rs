//! `completion` command

use super::Cli;
use crate::factory::Factory;
use anyhow::{Context, Result};
use clap::{Args, CommandFactory, ValueEnum};
use clap_complete::{Shell, generate};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

impl From<CompletionShell> for Shell {
    fn from(shell: CompletionShell) -> Self {
        match shell {
            CompletionShell::Bash => Shell::Bash,
            CompletionShell::Zsh => Shell::Zsh,
            CompletionShell::Fish => Shell::Fish,
        }
    }
}

#[derive(Args, Debug)]
pub struct CompletionArgs {
    #[arg(value_enum)]
    pub shell: CompletionShell,
}

/// Write the completion script to the output stream
pub fn run(factory: &dyn Factory, args: &CompletionArgs) -> Result<()> {
    let streams = factory.get_io_streams()?;
    let mut script = Vec::new();
    generate(
        Shell::from(args.shell),
        &mut Cli::command(),
        "bbctl",
        &mut script,
    );
    let script = String::from_utf8(script).context("completion script is not valid UTF-8")?;
    streams.write_out(&script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeFactory;

    #[test]
    fn test_bash_script_mentions_commands() {
        let factory = FakeFactory::new();
        run(
            &factory,
            &CompletionArgs {
                shell: CompletionShell::Bash,
            },
        )
        .unwrap();
        let out = factory.out();
        assert!(out.contains("bbctl"));
        assert!(out.contains("preflight-check"));
    }
}
