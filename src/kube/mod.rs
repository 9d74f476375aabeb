//! Kubernetes client module
//!
//! Builds the kube-rs configuration from the `util-k8s` settings and provides
//! the cluster accessors every command goes through:
//! - [`K8sClient`] for typed core, apps, batch and storage resources
//! - [`DynamicClient`] for unstructured resources addressed by group/version/resource
//! - [`RuntimeClient`] for the Flux custom resources registered in a [`Scheme`]
//! - [`IstioClient`] for Istio virtual services
//! - [`CommandExecutor`] for running a command inside a pod
//!
//! Proxy settings from the kubeconfig are honored, except that internal cluster
//! hosts (private addresses, `.local`/`.internal` names) bypass the proxy unless
//! `NO_PROXY` already covers them.

mod client;
mod dynamic;
mod exec;
mod istio;
mod runtime;

pub use client::{K8sClient, KubeClient};
pub use dynamic::{DynamicClient, GroupVersionResource, KubeDynamicClient, nested_str, nested_value};
pub use exec::{CommandExecutor, PodCommandExecutor};
pub use istio::{IstioClient, KubeIstioClient, VirtualService};
pub use runtime::{FluxKind, KubeRuntimeClient, RuntimeClient, Scheme, is_ready};

use crate::config::schema::UtilK8sConfiguration;
use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::future::Future;
use std::time::Duration;
use url::Url;

/// Bound on every cluster list call
pub const LIST_TIMEOUT: Duration = Duration::from_secs(60);

/// Await `fut`, failing once [`LIST_TIMEOUT`] has elapsed
pub async fn with_list_timeout<T>(fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(LIST_TIMEOUT, fut)
        .await
        .map_err(|_| anyhow::anyhow!("timed out after {}s", LIST_TIMEOUT.as_secs()))?
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Build the REST configuration
///
/// Uses the default kubeconfig loading strategy (in-cluster, `KUBECONFIG`,
/// `~/.kube/config`) unless a kubeconfig path, context or cluster is configured.
pub async fn create_config(settings: &UtilK8sConfiguration) -> Result<Config> {
    let options = KubeConfigOptions {
        context: non_empty(&settings.context),
        cluster: non_empty(&settings.cluster_name),
        user: None,
    };

    let mut config = if !settings.kubeconfig.is_empty() {
        let kubeconfig = Kubeconfig::read_from(&settings.kubeconfig)
            .with_context(|| format!("error reading kubeconfig {}", settings.kubeconfig))?;
        Config::from_custom_kubeconfig(kubeconfig, &options).await?
    } else if options.context.is_some() || options.cluster.is_some() {
        Config::from_kubeconfig(&options).await?
    } else {
        Config::infer().await?
    };

    if !settings.namespace.is_empty() {
        config.default_namespace = settings.namespace.clone();
    }
    if !settings.api_server.is_empty() {
        config.cluster_url = settings
            .api_server
            .parse()
            .with_context(|| format!("invalid api server {}", settings.api_server))?;
    }
    if settings.insecure {
        config.accept_invalid_certs = true;
    }

    if let Ok(url) = Url::parse(&config.cluster_url.to_string())
        && let Some(host) = url.host_str()
        && config.proxy_url.is_some()
        && bypass_proxy(host, &no_proxy_from_env())
    {
        tracing::debug!("bypassing proxy for internal cluster host {}", host);
        config.proxy_url = None;
    }

    Ok(config)
}

/// Client for a previously built configuration
pub fn create_client(config: Config) -> Result<Client> {
    Client::try_from(config).context("error creating kubernetes client")
}

fn no_proxy_from_env() -> String {
    ["NO_PROXY", "no_proxy"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

/// True when `host` is internal and not already excluded by `no_proxy`
fn bypass_proxy(host: &str, no_proxy: &str) -> bool {
    is_internal_host(host) && !no_proxy_contains(no_proxy, host)
}

/// Private addresses, loopback and internal TLDs
fn is_internal_host(host: &str) -> bool {
    if host.starts_with("10.")
        || host.starts_with("192.168.")
        || host == "localhost"
        || host == "::1"
        || host.starts_with("127.")
    {
        return true;
    }
    if let Some(rest) = host.strip_prefix("172.")
        && let Some(octet) = rest.split('.').next().and_then(|o| o.parse::<u8>().ok())
    {
        return (16..=31).contains(&octet);
    }
    if host.ends_with(".local") || host.ends_with(".internal") {
        return true;
    }
    let parts: Vec<&str> = host.split('.').collect();
    parts.len() >= 2 && matches!(parts[parts.len() - 2], "corp" | "internal" | "int")
}

/// Whether a `NO_PROXY` list covers `host`
///
/// `example.com` and `.example.com` both cover the domain and its subdomains.
fn no_proxy_contains(no_proxy: &str, host: &str) -> bool {
    no_proxy
        .split(',')
        .map(str::trim)
        .filter(|pattern| !pattern.is_empty())
        .any(|pattern| {
            let domain = pattern.strip_prefix('.').unwrap_or(pattern);
            pattern == "*" || host == domain || host.ends_with(&format!(".{}", domain))
        })
}
