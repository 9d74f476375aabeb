//! `k3d` helpers for development clusters
//!
//! `create` and `destroy` wrap `k3d-dev.sh` from the Big Bang repo; arguments
//! after `--` are handed to the script. `ssh` connects to the public IP of the
//! caller's `{user}-dev` instance.

use super::bind_switch;
use super::deploy::{repo_path, run_captured};
use crate::aws::FilterExposure;
use crate::factory::{self, Factory};
use crate::output::BasicOutput;
use crate::output::schemas::{HostsOutput, K3dOutput, K3dOutputData, ShellProfileOutput};
use crate::streams::write_locked;
use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use k8s_openapi::api::core::v1::Service;

#[derive(Args, Debug)]
pub struct K3dArgs {
    #[command(subcommand)]
    pub command: Option<K3dCommand>,
}

#[derive(Subcommand, Debug)]
pub enum K3dCommand {
    /// Create a minimal k3d cluster in AWS for development or testing
    ///
    /// Arguments after -- are passed to k3d-dev.sh, e.g. `-- -b -p -m`.
    Create {
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Destroy a k3d cluster previously built with `bbctl k3d create`
    ///
    /// Arguments after -- are passed to k3d-dev.sh.
    Destroy {
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// SSH to the primary instance of your k3d cluster
    Ssh {
        /// Username to use for SSH connection
        #[arg(long = "ssh-username")]
        ssh_username: Option<String>,
        /// Print command but don't actually establish an SSH connection
        #[arg(long = "dry-run")]
        dry_run: bool,
        /// Extra ssh options, after --
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Generate /etc/hosts entries for your k3d cluster
    Hosts {
        /// Use the private IP instead of the public IP
        #[arg(long = "private-ip")]
        private_ip: bool,
    },
    /// Generate shell exports for your k3d cluster
    #[command(name = "shellprofile")]
    ShellProfile,
}

pub async fn run(factory: &dyn Factory, args: K3dArgs) -> Result<()> {
    match args.command {
        None => factory::output_client(factory)?.output(&BasicOutput::single(
            "msg",
            "Please provide a subcommand for k3d (see help)",
        )),
        Some(K3dCommand::Create { args }) => create_cluster(factory, &args).await,
        Some(K3dCommand::Destroy { args }) => destroy_cluster(factory, &args).await,
        Some(K3dCommand::Ssh {
            ssh_username,
            dry_run,
            args,
        }) => {
            let resolver = factory.get_viper()?;
            resolver.bind_flag("ssh-username", "ubuntu", ssh_username.as_deref());
            ssh(factory, &args, dry_run).await
        }
        Some(K3dCommand::Hosts { private_ip }) => {
            let resolver = factory.get_viper()?;
            bind_switch(&resolver, "private-ip", private_ip);
            hosts(factory).await
        }
        Some(K3dCommand::ShellProfile) => shell_profile(factory).await,
    }
}

const K3D_DEV_SCRIPT: &[&str] = &["docs", "assets", "scripts", "developer", "k3d-dev.sh"];

async fn run_k3d_dev(factory: &dyn Factory, args: &[String]) -> Result<()> {
    let config = factory::config_client(factory)?
        .get_config()
        .context("error getting config")?;
    let output = factory::output_client(factory).context("unable to create output client")?;
    let script = repo_path(&config, K3D_DEV_SCRIPT)?;
    let stdout = run_captured(factory, &script, args).await?;
    output.output(&K3dOutput {
        data: parse_k3d_output(&stdout),
    })
}

/// Run `k3d-dev.sh` with the given arguments
pub async fn create_cluster(factory: &dyn Factory, args: &[String]) -> Result<()> {
    run_k3d_dev(factory, args).await
}

/// Run `k3d-dev.sh -d` with the given arguments
pub async fn destroy_cluster(factory: &dyn Factory, args: &[String]) -> Result<()> {
    let args: Vec<String> = std::iter::once("-d".to_string())
        .chain(args.iter().cloned())
        .collect();
    run_k3d_dev(factory, &args).await
}

/// Lines starting with `Warning:` are warnings, every other non-blank line an action
pub fn parse_k3d_output(data: &str) -> K3dOutputData {
    let mut parsed = K3dOutputData::default();
    for line in data.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("Warning:") {
            parsed.warnings.push(line.to_string());
        } else {
            parsed.actions.push(line.to_string());
        }
    }
    parsed
}

/// Open an SSH session to the first public IP of the caller's cluster
///
/// With `dry_run` the command line is printed instead.
pub async fn ssh(factory: &dyn Factory, extra: &[String], dry_run: bool) -> Result<()> {
    let logging = factory
        .get_logging_client()
        .context("unable to get logging client")?;
    let streams = factory.get_io_streams().context("unable to get IO streams")?;
    let config = factory::config_client(factory)?
        .get_config()
        .context("error getting config")?;
    let aws = factory.get_aws_client().context("unable to get AWS client")?;
    let identity = aws
        .get_identity()
        .await
        .context("unable to get AWS identity")?;
    let ips = aws
        .get_cluster_ips(&identity.username, FilterExposure::Public)
        .await
        .context("unable to get cluster IPs")?;
    let Some(ip) = ips.iter().find(|ip| !ip.ip.is_empty()) else {
        bail!("no public IP found for {}-dev", identity.username);
    };

    logging.debug(format!("Args: {}", extra.join(" ")));
    let mut ssh_args = extra.to_vec();
    ssh_args.extend([
        "-o".to_string(),
        "IdentitiesOnly=yes".to_string(),
        "-i".to_string(),
        format!("~/.ssh/{}-dev.pem", identity.username),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        format!("{}@{}", config.k3d_ssh.user, ip.ip),
    ]);
    let mut cmd = factory
        .get_command_wrapper("ssh", &ssh_args)
        .context("unable to get command wrapper")?;
    logging.debug(format!("Running ssh command: {}", cmd.describe()));

    if dry_run {
        return write_locked(&streams.out, cmd.describe().as_bytes());
    }
    cmd.set_interactive();
    cmd.run().await
}

fn is_load_balancer(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        == Some("LoadBalancer")
}

/// Map every LoadBalancer service IP to the virtual service hosts routed through it
///
/// A virtual service belongs to a service when one of its gateways is a
/// substring of the service name or of `namespace/name`.
pub async fn hosts(factory: &dyn Factory) -> Result<()> {
    let logging = factory
        .get_logging_client()
        .context("unable to get logging client")?;
    let output = factory::output_client(factory)?;
    let rest_config = factory
        .get_rest_config()
        .await
        .context("unable to build k8s configuration")?;
    let istio = factory
        .get_istio_client(&rest_config)
        .await
        .context("unable to create istio client")?;
    let virtual_services = istio
        .list_virtual_services(None)
        .await
        .context("unable to list istio services")?;
    let k8s = factory
        .get_k8s_client()
        .await
        .context("unable to create k8s client")?;
    let services = k8s
        .list_services(None)
        .await
        .context("unable to list all services")?;

    let mut result = HostsOutput::default();
    for service in &services {
        let name = service.metadata.name.clone().unwrap_or_default();
        if !is_load_balancer(service) {
            logging.debug(format!("Skipping service {} that is not a LoadBalancer", name));
            continue;
        }
        let combined = format!(
            "{}/{}",
            service.metadata.namespace.as_deref().unwrap_or_default(),
            name
        );

        let mut hostnames: Vec<String> = Vec::new();
        for vs in &virtual_services {
            if vs.hosts.is_empty() || vs.gateways.is_empty() {
                logging.warn(format!(
                    "Skipping virtual service {} without hosts or gateways",
                    vs.name
                ));
                continue;
            }
            if vs
                .gateways
                .iter()
                .any(|gw| name.contains(gw.as_str()) || combined.contains(gw.as_str()))
            {
                hostnames.splice(0..0, vs.hosts.iter().cloned());
            }
        }
        if hostnames.is_empty() {
            logging.warn(format!("Skipping service {} without virtual services", name));
            continue;
        }

        let ips = service
            .spec
            .as_ref()
            .and_then(|spec| spec.cluster_ips.clone())
            .unwrap_or_default();
        for ip in ips {
            result
                .hosts
                .entry(ip)
                .or_default()
                .extend(hostnames.iter().cloned());
        }
    }
    output.output(&result)
}

/// Exports for the caller's `{user}-dev` cluster
pub async fn shell_profile(factory: &dyn Factory) -> Result<()> {
    let output = factory::output_client(factory)?;
    let aws = factory.get_aws_client().context("unable to get AWS client")?;
    let identity = aws
        .get_identity()
        .await
        .context("unable to get caller identity")?;
    let ips = aws
        .get_sorted_cluster_ips(&identity.username, FilterExposure::All)
        .await
        .context("unable to get cluster IPs")?;

    let (Some(public), Some(private)) = (ips.public_ips.first(), ips.private_ips.first()) else {
        bail!(
            "no public and private IP pair found for {}-dev",
            identity.username
        );
    };
    output.output(&ShellProfileOutput {
        kubeconfig: format!("~/.kube/{}-dev-config", identity.username),
        bb_k3d_publicip: public.ip.clone(),
        bb_k3d_privateip: private.ip.clone(),
    })
}
