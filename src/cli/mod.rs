//! CLI command handling module
//!
//! The argument model is declared with clap derive. Before a command runs,
//! every flag the user passed is bound into the factory's [`Resolver`] under
//! its configuration key, so handlers read the same [`GlobalConfiguration`]
//! whether a value came from a flag, the environment or `config.yaml`.
//!
//! [`GlobalConfiguration`]: crate::config::GlobalConfiguration

pub mod completion;
pub mod config;
pub mod deploy;
pub mod k3d;
pub mod list;
pub mod policy;
pub mod preflight;
pub mod status;
pub mod update;
pub mod values;
pub mod version;
pub mod violations;

use crate::config::Resolver;
use crate::factory::Factory;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};

/// Environment variable that disables the startup update check
pub const SKIP_UPDATE_CHECK_ENV: &str = "SKIP_UPDATE_CHECK";

/// Big Bang Control command-line tool
///
/// Run commands against Kubernetes clusters to simplify development,
/// deployment, auditing, and troubleshooting of Big Bang.
#[derive(Parser, Debug)]
#[command(name = "bbctl", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags accepted by every command
#[derive(Args, Debug, Default, Clone)]
pub struct GlobalArgs {
    /// Output format: text, json or yaml
    #[arg(short = 'o', long = "output", global = true)]
    pub output: Option<String>,

    /// Log level: debug, info, warn or error
    #[arg(long = "bbctl-log-level", global = true)]
    pub log_level: Option<String>,

    /// Log format: json or text
    #[arg(long = "bbctl-log-format", global = true)]
    pub log_format: Option<String>,

    /// Log output: stdout, stderr or file
    #[arg(long = "bbctl-log-output", global = true)]
    pub log_output: Option<String>,

    /// Log file, used when the log output is file
    #[arg(long = "bbctl-log-file", global = true)]
    pub log_file: Option<String>,

    /// Include the source location in log records
    #[arg(long = "bbctl-log-add-source", global = true)]
    pub log_add_source: bool,

    /// Location on the filesystem where the Big Bang product repo is checked out
    #[arg(long = "big-bang-repo", global = true)]
    pub big_bang_repo: Option<String>,

    /// Program bbctl runs to look up credentials, or `credentials-file`
    #[arg(long = "big-bang-credential-helper", global = true)]
    pub credential_helper: Option<String>,

    /// Credentials file read by the `credentials-file` helper
    #[arg(long = "big-bang-credential-helper-credentials-file-path", global = true)]
    pub credentials_file: Option<String>,

    /// Path to the kubeconfig file to use
    #[arg(long, global = true)]
    pub kubeconfig: Option<String>,

    /// The name of the kubeconfig context to use
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Do not check for a newer bbctl release before running
    #[arg(long = "skip-update-check", global = true)]
    pub skip_update_check: bool,
}

impl GlobalArgs {
    /// Register the global flags with `resolver`
    pub fn bind(&self, resolver: &Resolver) {
        let strings = [
            ("format", &self.output),
            ("bbctl-log-level", &self.log_level),
            ("bbctl-log-format", &self.log_format),
            ("bbctl-log-output", &self.log_output),
            ("bbctl-log-file", &self.log_file),
            ("big-bang-repo", &self.big_bang_repo),
            ("big-bang-credential-helper", &self.credential_helper),
            (
                "big-bang-credential-helper-credentials-file-path",
                &self.credentials_file,
            ),
            ("kubeconfig", &self.kubeconfig),
            ("context", &self.context),
        ];
        for (key, value) in strings {
            resolver.bind_flag(key, "", value.as_deref());
        }
        bind_switch(resolver, "bbctl-log-add-source", self.log_add_source);
    }
}

/// Bind a boolean flag; only a flag that was passed overrides other layers
pub(crate) fn bind_switch(resolver: &Resolver, key: &str, given: bool) {
    resolver.bind_flag(key, false, given.then_some(true));
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate the autocompletion script for the specified shell
    Completion(completion::CompletionArgs),

    /// Print or change bbctl configuration
    Config(config::ConfigArgs),

    /// Deploy Big Bang components and prerequisites
    Deploy(deploy::DeployArgs),

    /// Helpers for k3d development clusters
    K3d(k3d::K3dArgs),

    /// List all the helm releases deployed by Big Bang
    List,

    /// List policies implemented by Gatekeeper or Kyverno
    Policy(policy::PolicyArgs),

    /// Check the cluster is ready for a Big Bang deployment
    PreflightCheck(preflight::PreflightArgs),

    /// Show the status of the Big Bang deployment
    Status,

    /// Update bbctl
    Update(update::UpdateArgs),

    /// Get all the values for a given release deployed by Big Bang
    Values(values::ValuesArgs),

    /// Print the version of bbctl and the Big Bang deployment
    Version(version::VersionArgs),

    /// List policy violations reported by Gatekeeper or Kyverno
    Violations(violations::ViolationsArgs),
}

/// Bind the parsed flags and run the selected command
pub async fn run(cli: Cli, factory: &dyn Factory) -> Result<()> {
    let resolver = factory.get_viper()?;
    cli.global.bind(&resolver);
    tracing::debug!("running {:?}", cli.command);

    match cli.command {
        Command::Completion(args) => completion::run(factory, &args),
        Command::Config(args) => config::run(factory, args),
        Command::Deploy(args) => deploy::run(factory, args).await,
        Command::K3d(args) => k3d::run(factory, args).await,
        Command::List => list::run(factory).await,
        Command::Policy(args) => policy::run(factory, args).await,
        Command::PreflightCheck(args) => preflight::run(factory, args).await,
        Command::Status => status::run(factory).await,
        Command::Update(args) => update::run(factory, args),
        Command::Values(args) => values::run(factory, args).await,
        Command::Version(args) => version::run(factory, args).await,
        Command::Violations(args) => violations::run(factory, args).await,
    }
}

/// Whether the startup update check should run for this invocation
pub fn update_check_enabled(args: &[String], skip_flag: bool, skip_env: Option<&str>) -> bool {
    if skip_flag || args.iter().any(|a| a == "completion") {
        return false;
    }
    !skip_env.is_some_and(|v| v.eq_ignore_ascii_case("true"))
}
