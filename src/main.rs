//! bbctl - Big Bang Control
//!
//! Command-line tool for deploying, auditing and troubleshooting Big Bang on
//! Kubernetes clusters.

use anyhow::{Context, Result};
use bbctl::cli::{self, Cli, SKIP_UPDATE_CHECK_ENV};
use bbctl::config::{Resolver, paths};
use bbctl::factory::{self, DefaultFactory, Factory, PooledFactory};
use bbctl::log::{LogSettings, init_logging};
use bbctl::streams::IoStreams;
use bbctl::update::{self, CheckOptions};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const UPDATE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let resolver = Arc::new(Resolver::new());
    let search_dirs = paths::config_search_dirs()?;
    resolver
        .read_in_config(&search_dirs)
        .context("error reading configuration")?;

    let pooled = PooledFactory::new();
    pooled.set_underlying_factory(Arc::new(DefaultFactory::new(
        resolver.clone(),
        IoStreams::system(),
    )));

    cli.global.bind(&resolver);
    let config = factory::config_client(&pooled)?
        .get_config()
        .context("error getting config")?;
    init_logging(&LogSettings {
        level: config.log_level.clone(),
        format: config.log_format.clone(),
        output: config.log_output.clone(),
        file: config.log_file.clone(),
        add_source: config.log_add_source,
    })
    .context("error initializing logging")?;
    if let Some(path) = resolver.config_file_used() {
        tracing::debug!("using config file {}", path.display());
    }

    let args: Vec<String> = std::env::args().collect();
    let skip_env = std::env::var(SKIP_UPDATE_CHECK_ENV).ok();
    if cli::update_check_enabled(&args, cli.global.skip_update_check, skip_env.as_deref()) {
        notify_if_outdated(&pooled).await;
    }

    cli::run(cli, &pooled).await
}

/// Print an upgrade notice to stderr; failures only reach the debug log
async fn notify_if_outdated(factory: &dyn Factory) {
    let skew = match tokio::time::timeout(UPDATE_CHECK_TIMEOUT, update::check(CheckOptions::default())).await {
        Ok(Ok(skew)) => skew,
        Ok(Err(err)) => {
            tracing::debug!("update check failed: {:#}", err);
            return;
        }
        Err(_) => {
            tracing::debug!("update check timed out");
            return;
        }
    };
    let Some(notice) = update::upgrade_notice(&skew) else {
        return;
    };
    match factory.get_io_streams() {
        Ok(streams) => {
            if let Err(err) = streams.write_err(&format!("{}\n\n", notice)) {
                tracing::debug!("unable to write upgrade notice: {:#}", err);
            }
        }
        Err(err) => tracing::debug!("unable to get IO streams: {:#}", err),
    }
}
