//! Client factory
//!
//! Every side-effecting client a command needs is obtained through a
//! [`Factory`]. [`DefaultFactory`] builds real clients from the resolved
//! configuration; [`PooledFactory`] wraps another factory and caches what it
//! hands out for the rest of the invocation. Tests swap in
//! [`crate::fakes::FakeFactory`].

mod default;
mod pooled;

pub use default::DefaultFactory;
pub use pooled::PooledFactory;

use crate::aws::AwsClient;
use crate::command::CommandRunner;
use crate::config::{ConfigClient, Resolver};
use crate::credential_helper::SharedCredentialHelper;
use crate::error::BbctlError;
use crate::filesystem::FileSystemClient;
use crate::gitlab::GitLabClient;
use crate::helm::HelmClient;
use crate::ironbank::IronbankClient;
use crate::kube::{CommandExecutor, DynamicClient, IstioClient, K8sClient, RuntimeClient, Scheme};
use crate::log::{Logger, LoggingClient};
use crate::output::OutputClient;
use crate::streams::{IoStreams, SharedWriter};
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;

/// Source of every client a command uses
#[async_trait]
pub trait Factory: Send + Sync {
    async fn get_k8s_client(&self) -> Result<Arc<dyn K8sClient>>;

    async fn get_dynamic_client(&self) -> Result<Arc<dyn DynamicClient>>;

    async fn get_runtime_client(&self, scheme: &Arc<Scheme>) -> Result<Arc<dyn RuntimeClient>>;

    /// Helm storage reader for releases in `namespace`
    async fn get_helm_client(&self, namespace: &str) -> Result<Arc<dyn HelmClient>>;

    async fn get_istio_client(&self, config: &Arc<kube::Config>) -> Result<Arc<dyn IstioClient>>;

    async fn get_rest_config(&self) -> Result<Arc<kube::Config>>;

    /// A command bound to `container` of `pod`; never cached
    async fn get_command_executor(
        &self,
        pod: &Pod,
        container: &str,
        command: &[String],
        stdout: SharedWriter,
        stderr: SharedWriter,
    ) -> Result<Box<dyn CommandExecutor>>;

    /// A local child process; never cached
    fn get_command_wrapper(&self, name: &str, args: &[String]) -> Result<Box<dyn CommandRunner>>;

    fn get_credential_helper(&self) -> Result<SharedCredentialHelper>;

    fn get_ironbank_client(&self) -> Result<Arc<dyn IronbankClient>>;

    fn get_gitlab_client(&self) -> Result<Arc<dyn GitLabClient>>;

    fn get_aws_client(&self) -> Result<Arc<dyn AwsClient>>;

    fn get_config_client(&self) -> Result<ConfigClient>;

    /// The settings store flags are bound into
    fn get_viper(&self) -> Result<Arc<Resolver>>;

    fn set_viper(&self, resolver: Arc<Resolver>) -> Result<()>;

    fn get_io_streams(&self) -> Result<IoStreams>;

    fn get_filesystem_client(&self) -> Result<Arc<dyn FileSystemClient>>;

    fn get_logging_client(&self) -> Result<LoggingClient> {
        self.get_logging_client_with_logger(None)
    }

    /// `None` selects the process-wide default logger
    fn get_logging_client_with_logger(&self, logger: Option<&Logger>) -> Result<LoggingClient>;

    /// Output client writing to `streams` in the configured format
    fn get_output_client(&self, streams: &IoStreams) -> Result<OutputClient>;
}

pub type SharedFactory = Arc<dyn Factory>;

/// Config client, reported as [`BbctlError::ConfigClientUnavailable`] on failure
pub fn config_client(factory: &dyn Factory) -> Result<ConfigClient> {
    factory
        .get_config_client()
        .map_err(|e| BbctlError::ConfigClientUnavailable(format!("{:#}", e)).into())
}

/// Output client bound to the factory's own streams
pub fn output_client(factory: &dyn Factory) -> Result<OutputClient> {
    let streams = factory.get_io_streams()?;
    factory.get_output_client(&streams)
}
