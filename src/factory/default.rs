//! Factory that builds real clients

use super::Factory;
use crate::aws::{AwsClient, CliAwsClient};
use crate::command::{CommandRunner, CommandWrapper};
use crate::config::{ConfigClient, Resolver};
use crate::credential_helper::{ConfiguredCredentialHelper, SharedCredentialHelper};
use crate::filesystem::{FileSystemClient, OsFileSystem};
use crate::gitlab::{GitLabClient, RestGitLabClient};
use crate::helm::{HelmClient, StorageHelmClient};
use crate::ironbank::{IronbankClient, RegistryIronbankClient};
use crate::kube::{
    self as k8s, CommandExecutor, DynamicClient, IstioClient, K8sClient, KubeClient,
    KubeDynamicClient, KubeIstioClient, KubeRuntimeClient, PodCommandExecutor, RuntimeClient,
    Scheme,
};
use crate::log::{Logger, LoggingClient, default_logger};
use crate::output::OutputClient;
use crate::streams::{IoStreams, SharedWriter};
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::sync::{Arc, RwLock};
use tokio::sync::OnceCell;

/// Builds clients from the resolved configuration
///
/// The cluster configuration and the underlying `kube::Client` are created on
/// first use and shared by every cluster accessor built afterwards.
pub struct DefaultFactory {
    resolver: RwLock<Arc<Resolver>>,
    streams: IoStreams,
    filesystem: Arc<dyn FileSystemClient>,
    rest_config: OnceCell<Arc<kube::Config>>,
    client: OnceCell<kube::Client>,
}

impl Default for DefaultFactory {
    fn default() -> Self {
        Self::new(Arc::new(Resolver::new()), IoStreams::system())
    }
}

impl DefaultFactory {
    pub fn new(resolver: Arc<Resolver>, streams: IoStreams) -> Self {
        Self {
            resolver: RwLock::new(resolver),
            streams,
            filesystem: Arc::new(OsFileSystem),
            rest_config: OnceCell::new(),
            client: OnceCell::new(),
        }
    }

    fn resolver(&self) -> Arc<Resolver> {
        self.resolver
            .read()
            .map(|r| r.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    async fn client(&self) -> Result<kube::Client> {
        let client = self
            .client
            .get_or_try_init(|| async {
                let config = self.get_rest_config().await?;
                k8s::create_client(config.as_ref().clone())
            })
            .await?;
        Ok(client.clone())
    }
}

#[async_trait]
impl Factory for DefaultFactory {
    async fn get_k8s_client(&self) -> Result<Arc<dyn K8sClient>> {
        Ok(Arc::new(KubeClient::new(self.client().await?)))
    }

    async fn get_dynamic_client(&self) -> Result<Arc<dyn DynamicClient>> {
        Ok(Arc::new(KubeDynamicClient::new(self.client().await?)))
    }

    async fn get_runtime_client(&self, scheme: &Arc<Scheme>) -> Result<Arc<dyn RuntimeClient>> {
        Ok(Arc::new(KubeRuntimeClient::new(
            self.client().await?,
            scheme.clone(),
        )))
    }

    async fn get_helm_client(&self, namespace: &str) -> Result<Arc<dyn HelmClient>> {
        let k8s = self.get_k8s_client().await?;
        let client = StorageHelmClient::from_env(k8s, namespace)
            .context("error initializing helm storage")?;
        Ok(Arc::new(client))
    }

    async fn get_istio_client(&self, config: &Arc<kube::Config>) -> Result<Arc<dyn IstioClient>> {
        Ok(Arc::new(KubeIstioClient::new(config)?))
    }

    async fn get_rest_config(&self) -> Result<Arc<kube::Config>> {
        let config = self
            .rest_config
            .get_or_try_init(|| async {
                let settings = self.get_config_client()?.get_config()?;
                let config = k8s::create_config(&settings.k8s)
                    .await
                    .context("error building kubernetes config")?;
                Ok::<_, anyhow::Error>(Arc::new(config))
            })
            .await?;
        Ok(config.clone())
    }

    async fn get_command_executor(
        &self,
        pod: &Pod,
        container: &str,
        command: &[String],
        stdout: SharedWriter,
        stderr: SharedWriter,
    ) -> Result<Box<dyn CommandExecutor>> {
        let executor = PodCommandExecutor::new(
            self.client().await?,
            pod,
            container,
            command,
            stdout,
            stderr,
        )?;
        Ok(Box::new(executor))
    }

    fn get_command_wrapper(&self, name: &str, args: &[String]) -> Result<Box<dyn CommandRunner>> {
        Ok(Box::new(CommandWrapper::new(name, args)))
    }

    fn get_credential_helper(&self) -> Result<SharedCredentialHelper> {
        Ok(Arc::new(ConfiguredCredentialHelper::new(
            self.get_config_client()?,
            self.get_filesystem_client()?,
        )))
    }

    fn get_ironbank_client(&self) -> Result<Arc<dyn IronbankClient>> {
        Ok(Arc::new(RegistryIronbankClient::new(
            self.get_credential_helper()?,
        )))
    }

    fn get_gitlab_client(&self) -> Result<Arc<dyn GitLabClient>> {
        let config = self.get_config_client()?.get_config()?;
        Ok(Arc::new(RestGitLabClient::new(
            config.gitlab.base_url,
            config.gitlab.token,
        )))
    }

    fn get_aws_client(&self) -> Result<Arc<dyn AwsClient>> {
        Ok(Arc::new(CliAwsClient::default()))
    }

    fn get_config_client(&self) -> Result<ConfigClient> {
        Ok(ConfigClient::new(self.get_viper()?, self.get_logging_client()?))
    }

    fn get_viper(&self) -> Result<Arc<Resolver>> {
        Ok(self.resolver())
    }

    fn set_viper(&self, resolver: Arc<Resolver>) -> Result<()> {
        match self.resolver.write() {
            Ok(mut guard) => *guard = resolver,
            Err(poisoned) => *poisoned.into_inner() = resolver,
        }
        Ok(())
    }

    fn get_io_streams(&self) -> Result<IoStreams> {
        Ok(self.streams.clone())
    }

    fn get_filesystem_client(&self) -> Result<Arc<dyn FileSystemClient>> {
        Ok(self.filesystem.clone())
    }

    fn get_logging_client_with_logger(&self, logger: Option<&Logger>) -> Result<LoggingClient> {
        let logger = logger.cloned().unwrap_or_else(default_logger);
        Ok(LoggingClient::new(logger))
    }

    fn get_output_client(&self, streams: &IoStreams) -> Result<OutputClient> {
        let config = self.get_config_client()?.get_config()?;
        Ok(OutputClient::new(config.output.format, streams))
    }
}
