//! `config` command handlers

use crate::config::{find_config, paths};
use crate::error::BbctlError;
use crate::factory::{self, Factory};
use crate::output::BasicOutput;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: Option<ConfigCommand>,
}

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print bbctl configuration, or one value by dotted key (e.g. "policy.gatekeeper")
    View {
        keys: Vec<String>,
    },
    /// Interactively create ~/.bbctl/config.yaml
    Init,
    /// Set a configuration value and save the configuration file
    Set {
        key: String,
        value: String,
        /// File to write instead of the configuration file in use
        #[arg(long = "output-file")]
        output_file: Option<PathBuf>,
    },
}

pub fn run(factory: &dyn Factory, args: ConfigArgs) -> Result<()> {
    match args.command {
        None => factory::output_client(factory)?.output(&BasicOutput::single(
            "msg",
            "Please provide a subcommand for config (see help)",
        )),
        Some(ConfigCommand::View { keys }) => view(factory, &keys),
        Some(ConfigCommand::Init) => init(factory),
        Some(ConfigCommand::Set {
            key,
            value,
            output_file,
        }) => set(factory, &key, &value, output_file),
    }
}

/// Output the whole configuration, or the value at one dotted key
pub fn view(factory: &dyn Factory, keys: &[String]) -> Result<()> {
    let config = factory::config_client(factory)?
        .get_config()
        .context("error getting config")?;
    let output = factory::output_client(factory).context("error getting output client")?;
    match keys {
        [] => output
            .output(&config)
            .context("error marshaling global config"),
        [key] => {
            let value = find_config(&config, key).context("error marshaling specific config")?;
            output
                .output(&BasicOutput::single(key.clone(), value))
                .context("error creating output for specific config")
        }
        _ => Err(BbctlError::TooManyArguments.into()),
    }
}

struct InitPrompt {
    key: &'static str,
    info: &'static str,
    optional: bool,
}

const INIT_PROMPTS: &[InitPrompt] = &[
    InitPrompt {
        key: "bbctl-log-format",
        info: "Log format for bbctl. Options are json, text",
        optional: false,
    },
    InitPrompt {
        key: "bbctl-log-level",
        info: "Log level for bbctl. Options are debug, info, warn, error",
        optional: false,
    },
    InitPrompt {
        key: "bbctl-log-output",
        info: "Log output for bbctl. Options are stdout, stderr, file",
        optional: false,
    },
    InitPrompt {
        key: "big-bang-credential-helper",
        info: "Location of a program that bbctl can use as a credential helper",
        optional: true,
    },
    InitPrompt {
        key: "big-bang-repo",
        info: "Location on the filesystem where the Big Bang product repo is checked out",
        optional: false,
    },
];

/// Prompt for the basic settings and write `~/.bbctl/config.yaml`
pub fn init(factory: &dyn Factory) -> Result<()> {
    let streams = factory.get_io_streams().context("error getting IO streams")?;
    let filesystem = factory.get_filesystem_client()?;

    streams.write_out("Please enter values for the following configurations.\n")?;
    let mut values = BTreeMap::new();
    for prompt in INIT_PROMPTS {
        let mut text = format!("{}\n{}\n", prompt.key.replace('-', " "), prompt.info);
        if prompt.optional {
            text.push_str("Press enter to skip\n");
        }
        text.push_str("$ ");
        streams.write_out(&text)?;

        let input = streams.read_line()?.trim().to_string();
        if !prompt.optional || !input.is_empty() {
            values.insert(prompt.key, input);
        }
    }

    let path = paths::default_config_path(&filesystem.user_home_dir()?);
    let contents = crate::yamler::marshal(&values)?;
    filesystem.write_file(&path, contents.as_bytes())?;
    streams.write_out(&format!("\nConfiguration written to {}\n", path.display()))
}

/// Set `key` in the resolver and persist the config file contents with it
///
/// The file written is `output_file`, else the config file that was read, else
/// `~/.bbctl/config.yaml`.
pub fn set(factory: &dyn Factory, key: &str, value: &str, output_file: Option<PathBuf>) -> Result<()> {
    let output = factory::output_client(factory).context("failed to get output client")?;
    let resolver = factory.get_viper().context("failed to get viper")?;
    let filesystem = factory.get_filesystem_client()?;

    resolver.set(key, value);
    let path = match output_file.or_else(|| resolver.config_file_used()) {
        Some(path) => path,
        None => paths::default_config_path(&filesystem.user_home_dir()?),
    };
    let contents = crate::yamler::marshal(&resolver.persisted_settings())?;
    filesystem
        .write_file(&path, contents.as_bytes())
        .context("failed to set config value")?;
    tracing::debug!("wrote configuration to {}", path.display());

    let mut changes = serde_json::Map::new();
    changes.insert(key.to_string(), value.into());
    let mut vals = BTreeMap::new();
    vals.insert("message".to_string(), "Configuration updated".into());
    vals.insert("changes".to_string(), serde_json::Value::Object(changes));
    output.output(&BasicOutput { vals })
}
