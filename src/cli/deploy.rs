//! `deploy` command handlers
//!
//! Both subcommands shell out through the factory's command wrapper: `flux`
//! runs the Big Bang repo's `scripts/install_flux.sh`, `bigbang` runs
//! `helm upgrade -i`. Registry credentials come from the credential helper.
//! The captured stdout is parsed into the command's output schema.

use super::bind_switch;
use crate::config::GlobalConfiguration;
use crate::constants::{BIG_BANG_HELM_RELEASE_NAME, BIG_BANG_NAMESPACE, REGISTRY1_HOST};
use crate::credential_helper::{PASSWORD, USERNAME};
use crate::factory::{self, Factory};
use crate::output::schemas::{BigbangOutput, FluxOutput, FluxOutputData, HelmOutput};
use crate::streams::SharedBuffer;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::Path;

#[derive(Args, Debug)]
pub struct DeployArgs {
    #[command(subcommand)]
    pub command: Option<DeployCommand>,
}

#[derive(Subcommand, Debug)]
pub enum DeployCommand {
    /// Deploy flux to your cluster
    ///
    /// Arguments after -- are passed to install_flux.sh.
    Flux {
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Deploy Big Bang and optional Big Bang addons to your cluster
    ///
    /// Arguments after -- are passed to helm. Flux must already be deployed.
    Bigbang(BigbangArgs),
}

#[derive(Args, Debug, Default)]
pub struct BigbangArgs {
    /// Include some boilerplate suitable for deploying into k3d
    #[arg(long)]
    pub k3d: bool,

    /// Enable this Big Bang addon in the deployment
    #[arg(long)]
    pub addon: Vec<String>,

    #[arg(last = true)]
    pub helm_args: Vec<String>,
}

const SUBCOMMANDS: &[&str] = &["flux", "bigbang"];

pub async fn run(factory: &dyn Factory, args: DeployArgs) -> Result<()> {
    match args.command {
        None => {
            let logging = factory
                .get_logging_client()
                .context("unable to get logging client")?;
            Err(logging
                .error(format!("error: must specify one of: {}", SUBCOMMANDS.join(", ")))
                .into())
        }
        Some(DeployCommand::Flux { args }) => deploy_flux(factory, &args).await,
        Some(DeployCommand::Bigbang(args)) => {
            let resolver = factory.get_viper()?;
            bind_switch(&resolver, "k3d", args.k3d);
            let addons = (!args.addon.is_empty()).then_some(&args.addon);
            resolver.bind_flag("addon", Vec::<String>::new(), addons);
            deploy_bigbang(factory, &args.helm_args).await
        }
    }
}

async fn registry_credentials(factory: &dyn Factory) -> Result<(String, String)> {
    let helper = factory
        .get_credential_helper()
        .context("unable to get credential helper")?;
    let username = helper
        .get(USERNAME, REGISTRY1_HOST)
        .await
        .context("unable to get username")?;
    let password = helper
        .get(PASSWORD, REGISTRY1_HOST)
        .await
        .context("unable to get password")?;
    Ok((username, password))
}

/// Run `program` and return everything it wrote to stdout
pub(crate) async fn run_captured(factory: &dyn Factory, program: &str, args: &[String]) -> Result<String> {
    let streams = factory.get_io_streams().context("unable to create IO streams")?;
    let captured = SharedBuffer::default();
    let mut cmd = factory
        .get_command_wrapper(program, args)
        .context("unable to get command wrapper")?;
    cmd.set_stdout(captured.writer());
    cmd.set_stderr(streams.err_out.clone());
    cmd.run().await.context("error running command")?;
    Ok(captured.contents())
}

pub(crate) fn repo_path(config: &GlobalConfiguration, parts: &[&str]) -> Result<String> {
    let path = parts
        .iter()
        .fold(Path::new(config.require_big_bang_repo()?).to_path_buf(), |p, part| {
            p.join(part)
        });
    Ok(path.to_string_lossy().into_owned())
}

pub async fn deploy_flux(factory: &dyn Factory, args: &[String]) -> Result<()> {
    let config = factory::config_client(factory)?
        .get_config()
        .context("error getting config")?;
    let output = factory::output_client(factory).context("unable to create output client")?;
    let (username, password) = registry_credentials(factory).await?;

    let script = repo_path(&config, &["scripts", "install_flux.sh"])?;
    let mut flux_args = args.to_vec();
    flux_args.extend(["-u".to_string(), username, "-p".to_string(), password]);

    let stdout = run_captured(factory, &script, &flux_args).await?;
    output.output(&FluxOutput {
        data: parse_flux_output(&stdout),
    })
}

/// Bucket `install_flux.sh` output lines
pub fn parse_flux_output(data: &str) -> FluxOutputData {
    let mut parsed = FluxOutputData::default();
    for line in data.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let parts: Vec<&str> = line.split(": ").collect();
        match parts.as_slice() {
            [key @ ("REGISTRY_URL" | "REGISTRY_USERNAME"), value] => {
                parsed
                    .general_info
                    .insert(key.to_string(), value.trim().to_string());
            }
            ["Warning", value] => parsed.warnings.push(value.trim().to_string()),
            _ => parsed.actions.push(line.to_string()),
        }
    }
    parsed
}

/// Arguments for `helm upgrade -i` with the given credentials
pub fn bigbang_helm_args(
    config: &GlobalConfiguration,
    username: &str,
    password: &str,
    extra: &[String],
) -> Result<Vec<String>> {
    let mut args: Vec<String> = vec![
        "upgrade".into(),
        "-i".into(),
        BIG_BANG_HELM_RELEASE_NAME.into(),
        repo_path(config, &["chart"])?,
        "-n".into(),
        BIG_BANG_NAMESPACE.into(),
        "--create-namespace".into(),
        "--set".into(),
        format!("registryCredentials.username={}", username),
        "--set".into(),
        format!("registryCredentials.password={}", password),
    ];
    for addon in config.deploy_big_bang.addon.iter().rev() {
        args.push("--set".into());
        args.push(format!("addons.{}.enabled=true", addon));
    }
    if config.deploy_big_bang.k3d {
        args.push("-f".into());
        args.push(repo_path(config, &["chart", "ingress-certs.yaml"])?);
        args.push("-f".into());
        args.push(repo_path(
            config,
            &[
                "docs",
                "assets",
                "configs",
                "example",
                "policy-overrides-k3d.yaml",
            ],
        )?);
    }
    args.extend_from_slice(extra);
    Ok(args)
}

pub async fn deploy_bigbang(factory: &dyn Factory, extra: &[String]) -> Result<()> {
    let logging = factory.get_logging_client()?;
    let config = factory::config_client(factory)?
        .get_config()
        .context("error getting config")?;
    let output = factory::output_client(factory).context("unable to create output client")?;
    let (username, password) = registry_credentials(factory).await?;

    logging.info(format!(
        "preparing to deploy Big Bang to cluster, k3d={}",
        config.deploy_big_bang.k3d
    ));
    if config.deploy_big_bang.k3d {
        logging.info("Using k3d configuration");
    }
    let args = bigbang_helm_args(&config, &username, &password, extra)?;
    let stdout = run_captured(factory, "helm", &args).await?;
    output.output(&BigbangOutput {
        data: parse_helm_output(&stdout),
    })
}

/// Parse `helm upgrade` output; everything after `NOTES:` is kept verbatim
pub fn parse_helm_output(data: &str) -> HelmOutput {
    let mut parsed = HelmOutput::default();
    let mut lines = data.lines();
    parsed.message = lines.next().unwrap_or_default().to_string();

    let mut in_notes = false;
    for line in lines {
        if in_notes {
            if !line.trim().is_empty() {
                if !parsed.notes.is_empty() {
                    parsed.notes.push('\n');
                }
                parsed.notes.push_str(line);
            }
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "NAME" => parsed.name = value,
            "LAST DEPLOYED" => parsed.last_deployed = value,
            "NAMESPACE" => parsed.namespace = value,
            "STATUS" => parsed.status = value,
            "REVISION" => parsed.revision = value,
            "TEST SUITE" => parsed.test_suite = value,
            "NOTES" => {
                parsed.notes = value;
                in_notes = true;
            }
            _ => {}
        }
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BbctlError;
    use crate::fakes::FakeFactory;
    use crate::log::Level;

    const HELM_STDOUT: &str = "Release \"bigbang\" has been upgraded. Happy Helming!
NAME: bigbang
LAST DEPLOYED: Mon Jan  6 10:00:00 2025
NAMESPACE: bigbang
STATUS: deployed
REVISION: 3
TEST SUITE: None
NOTES:
Thank you for installing bigbang.

Your release is named bigbang.
";

    fn factory_with_repo() -> FakeFactory {
        let factory = FakeFactory::new();
        factory.resolver().set("big-bang-repo", "/src/bb");
        factory.resolver().bind_flag("format", "", Some("json"));
        factory.set_credential(USERNAME, REGISTRY1_HOST, "user");
        factory.set_credential(PASSWORD, REGISTRY1_HOST, "pass");
        factory
    }

    #[test]
    fn test_parse_helm_output() {
        let parsed = parse_helm_output(HELM_STDOUT);
        assert_eq!(parsed.message, "Release \"bigbang\" has been upgraded. Happy Helming!");
        assert_eq!(parsed.name, "bigbang");
        assert_eq!(parsed.last_deployed, "Mon Jan  6 10:00:00 2025");
        assert_eq!(parsed.revision, "3");
        assert_eq!(parsed.test_suite, "None");
        assert_eq!(
            parsed.notes,
            "Thank you for installing bigbang.\nYour release is named bigbang."
        );
    }

    #[test]
    fn test_parse_flux_output() {
        let parsed = parse_flux_output(
            "REGISTRY_URL: registry1.dso.mil\nREGISTRY_USERNAME: user\n\nWarning: no flux CLI found\ncreating namespace flux-system\nkey: with: colons\n",
        );
        assert_eq!(parsed.general_info["REGISTRY_URL"], "registry1.dso.mil");
        assert_eq!(parsed.general_info["REGISTRY_USERNAME"], "user");
        assert_eq!(parsed.warnings, vec!["no flux CLI found"]);
        assert_eq!(
            parsed.actions,
            vec!["creating namespace flux-system", "key: with: colons"]
        );
    }

    #[tokio::test]
    async fn test_deploy_bigbang_with_k3d_and_addons() {
        let factory = factory_with_repo();
        factory.set_command_result(
            "helm upgrade -i bigbang /src/bb/chart -n bigbang --create-namespace --set registryCredentials.username=user --set registryCredentials.password=pass --set addons.vault.enabled=true --set addons.argocd.enabled=true -f /src/bb/chart/ingress-certs.yaml -f /src/bb/docs/assets/configs/example/policy-overrides-k3d.yaml -f values.yaml",
            Ok(HELM_STDOUT.to_string()),
        );
        run(
            &factory,
            DeployArgs {
                command: Some(DeployCommand::Bigbang(BigbangArgs {
                    k3d: true,
                    addon: vec!["argocd".into(), "vault".into()],
                    helm_args: vec!["-f".into(), "values.yaml".into()],
                })),
            },
        )
        .await
        .unwrap();

        assert_eq!(factory.invocations().len(), 1);
        let json: serde_json::Value = serde_json::from_str(&factory.out()).unwrap();
        assert_eq!(json["status"], "deployed");
        assert_eq!(json["revision"], "3");
        assert!(
            factory
                .sink()
                .messages(Level::Info)
                .contains(&"Using k3d configuration".to_string())
        );
    }

    #[tokio::test]
    async fn test_deploy_flux_passes_credentials() {
        let factory = factory_with_repo();
        factory.set_command_result(
            "/src/bb/scripts/install_flux.sh -s -u user -p pass",
            Ok("REGISTRY_URL: registry1.dso.mil\ninstalling flux\n".to_string()),
        );
        deploy_flux(&factory, &["-s".to_string()]).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&factory.out()).unwrap();
        assert_eq!(json["general_info"]["REGISTRY_URL"], "registry1.dso.mil");
        assert_eq!(json["actions"][0], "installing flux");
    }

    #[tokio::test]
    async fn test_deploy_requires_repo_and_credentials() {
        let factory = FakeFactory::new();
        factory.set_credential(USERNAME, REGISTRY1_HOST, "user");
        factory.set_credential(PASSWORD, REGISTRY1_HOST, "pass");
        let err = deploy_flux(&factory, &[]).await.unwrap_err();
        assert!(format!("{:#}", err).contains("big-bang-repo is required"));

        let factory = FakeFactory::new();
        factory.resolver().set("big-bang-repo", "/src/bb");
        let err = deploy_bigbang(&factory, &[]).await.unwrap_err();
        assert!(format!("{:#}", err).starts_with("unable to get username"));
        assert!(factory.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_without_subcommand() {
        let factory = FakeFactory::new();
        let err = run(&factory, DeployArgs { command: None })
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<BbctlError>(),
            Some(&BbctlError::Fatal(
                "error: must specify one of: flux, bigbang".into()
            ))
        );
    }
}
