//! `preflight-check` command

use crate::factory::{self, Factory};
use crate::preflight::run_preflight_checks;
use anyhow::Result;
use clap::Args;

#[derive(Args, Debug, Default)]
pub struct PreflightArgs {
    /// Image registry server url
    #[arg(long)]
    pub registryserver: Option<String>,

    /// Image registry username
    #[arg(long)]
    pub registryusername: Option<String>,

    /// Image registry password
    #[arg(long)]
    pub registrypassword: Option<String>,
}

pub async fn run(factory: &dyn Factory, args: PreflightArgs) -> Result<()> {
    let resolver = factory.get_viper()?;
    resolver.bind_flag("registryserver", "", args.registryserver.as_deref());
    resolver.bind_flag("registryusername", "", args.registryusername.as_deref());
    resolver.bind_flag("registrypassword", "", args.registrypassword.as_deref());

    let output = factory::output_client(factory)?;
    let summary = run_preflight_checks(factory).await?;
    output.output(&summary)
}
