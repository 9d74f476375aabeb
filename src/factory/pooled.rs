//! Invocation-scoped client cache
//!
//! Singletons are cached once; parameterized constructors are cached per
//! argument, matched by namespace or by pointer identity. Executors and command
//! wrappers are always built fresh. Errors from the underlying factory are
//! returned as-is and never cached.

use super::Factory;
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
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

#[derive(Default)]
struct Pool {
    aws: Option<Arc<dyn AwsClient>>,
    gitlab: Option<Arc<dyn GitLabClient>>,
    ironbank: Option<Arc<dyn IronbankClient>>,
    k8s: Option<Arc<dyn K8sClient>>,
    dynamic: Option<Arc<dyn DynamicClient>>,
    rest_config: Option<Arc<kube::Config>>,
    credential_helper: Option<SharedCredentialHelper>,
    config_client: Option<ConfigClient>,
    viper: Option<Arc<Resolver>>,
    io_streams: Option<IoStreams>,
    filesystem: Option<Arc<dyn FileSystemClient>>,
    helm: Vec<(String, Arc<dyn HelmClient>)>,
    runtime: Vec<(Arc<Scheme>, Arc<dyn RuntimeClient>)>,
    logging: Vec<(Option<Logger>, LoggingClient)>,
    output: Vec<(IoStreams, OutputClient)>,
    istio: Vec<(Arc<kube::Config>, Arc<dyn IstioClient>)>,
}

fn same_logger(a: Option<&Logger>, b: Option<&Logger>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// [`Factory`] that caches clients from an underlying factory
#[derive(Default)]
pub struct PooledFactory {
    underlying: RwLock<Option<Arc<dyn Factory>>>,
    pool: Mutex<Pool>,
}

impl PooledFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_underlying_factory(&self, factory: Arc<dyn Factory>) {
        match self.underlying.write() {
            Ok(mut guard) => *guard = Some(factory),
            Err(poisoned) => *poisoned.into_inner() = Some(factory),
        }
    }

    fn underlying(&self) -> Result<Arc<dyn Factory>> {
        let guard = self.underlying.read().unwrap_or_else(|e| e.into_inner());
        guard
            .clone()
            .ok_or_else(|| BbctlError::FactoryNotInitialized.into())
    }

    fn pool(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached singleton, or build and cache one through the underlying factory
    fn singleton<T: Clone>(
        &self,
        slot: impl Fn(&mut Pool) -> &mut Option<T>,
        build: impl FnOnce(&dyn Factory) -> Result<T>,
    ) -> Result<T> {
        if let Some(cached) = slot(&mut self.pool()).clone() {
            return Ok(cached);
        }
        let built = build(self.underlying()?.as_ref())?;
        *slot(&mut self.pool()) = Some(built.clone());
        Ok(built)
    }
}

#[async_trait]
impl Factory for PooledFactory {
    async fn get_k8s_client(&self) -> Result<Arc<dyn K8sClient>> {
        if let Some(cached) = self.pool().k8s.clone() {
            return Ok(cached);
        }
        let client = self.underlying()?.get_k8s_client().await?;
        self.pool().k8s = Some(client.clone());
        Ok(client)
    }

    async fn get_dynamic_client(&self) -> Result<Arc<dyn DynamicClient>> {
        if let Some(cached) = self.pool().dynamic.clone() {
            return Ok(cached);
        }
        let client = self.underlying()?.get_dynamic_client().await?;
        self.pool().dynamic = Some(client.clone());
        Ok(client)
    }

    async fn get_runtime_client(&self, scheme: &Arc<Scheme>) -> Result<Arc<dyn RuntimeClient>> {
        let cached = self
            .pool()
            .runtime
            .iter()
            .find(|(key, _)| Arc::ptr_eq(key, scheme))
            .map(|(_, client)| client.clone());
        if let Some(client) = cached {
            return Ok(client);
        }
        let client = self.underlying()?.get_runtime_client(scheme).await?;
        self.pool().runtime.push((scheme.clone(), client.clone()));
        Ok(client)
    }

    async fn get_helm_client(&self, namespace: &str) -> Result<Arc<dyn HelmClient>> {
        let cached = self
            .pool()
            .helm
            .iter()
            .find(|(key, _)| key == namespace)
            .map(|(_, client)| client.clone());
        if let Some(client) = cached {
            return Ok(client);
        }
        let client = self.underlying()?.get_helm_client(namespace).await?;
        self.pool().helm.push((namespace.to_string(), client.clone()));
        Ok(client)
    }

    async fn get_istio_client(&self, config: &Arc<kube::Config>) -> Result<Arc<dyn IstioClient>> {
        let cached = self
            .pool()
            .istio
            .iter()
            .find(|(key, _)| Arc::ptr_eq(key, config))
            .map(|(_, client)| client.clone());
        if let Some(client) = cached {
            return Ok(client);
        }
        let client = self.underlying()?.get_istio_client(config).await?;
        self.pool().istio.push((config.clone(), client.clone()));
        Ok(client)
    }

    async fn get_rest_config(&self) -> Result<Arc<kube::Config>> {
        if let Some(cached) = self.pool().rest_config.clone() {
            return Ok(cached);
        }
        let config = self.underlying()?.get_rest_config().await?;
        self.pool().rest_config = Some(config.clone());
        Ok(config)
    }

    async fn get_command_executor(
        &self,
        pod: &Pod,
        container: &str,
        command: &[String],
        stdout: SharedWriter,
        stderr: SharedWriter,
    ) -> Result<Box<dyn CommandExecutor>> {
        self.underlying()?
            .get_command_executor(pod, container, command, stdout, stderr)
            .await
    }

    fn get_command_wrapper(&self, name: &str, args: &[String]) -> Result<Box<dyn CommandRunner>> {
        self.underlying()?.get_command_wrapper(name, args)
    }

    fn get_credential_helper(&self) -> Result<SharedCredentialHelper> {
        self.singleton(|p| &mut p.credential_helper, |f| f.get_credential_helper())
    }

    fn get_ironbank_client(&self) -> Result<Arc<dyn IronbankClient>> {
        self.singleton(|p| &mut p.ironbank, |f| f.get_ironbank_client())
    }

    fn get_gitlab_client(&self) -> Result<Arc<dyn GitLabClient>> {
        self.singleton(|p| &mut p.gitlab, |f| f.get_gitlab_client())
    }

    fn get_aws_client(&self) -> Result<Arc<dyn AwsClient>> {
        self.singleton(|p| &mut p.aws, |f| f.get_aws_client())
    }

    fn get_config_client(&self) -> Result<ConfigClient> {
        self.singleton(|p| &mut p.config_client, |f| f.get_config_client())
    }

    fn get_viper(&self) -> Result<Arc<Resolver>> {
        self.singleton(|p| &mut p.viper, |f| f.get_viper())
    }

    /// Replaces the cached resolver and drops the config client built on the old one
    fn set_viper(&self, resolver: Arc<Resolver>) -> Result<()> {
        if let Ok(underlying) = self.underlying() {
            underlying.set_viper(resolver.clone())?;
        }
        let mut pool = self.pool();
        pool.viper = Some(resolver);
        pool.config_client = None;
        Ok(())
    }

    fn get_io_streams(&self) -> Result<IoStreams> {
        self.singleton(|p| &mut p.io_streams, |f| f.get_io_streams())
    }

    fn get_filesystem_client(&self) -> Result<Arc<dyn FileSystemClient>> {
        self.singleton(|p| &mut p.filesystem, |f| f.get_filesystem_client())
    }

    fn get_logging_client_with_logger(&self, logger: Option<&Logger>) -> Result<LoggingClient> {
        let cached = self
            .pool()
            .logging
            .iter()
            .find(|(key, _)| same_logger(key.as_ref(), logger))
            .map(|(_, client)| client.clone());
        if let Some(client) = cached {
            return Ok(client);
        }
        let client = self.underlying()?.get_logging_client_with_logger(logger)?;
        self.pool().logging.push((logger.cloned(), client.clone()));
        Ok(client)
    }

    fn get_output_client(&self, streams: &IoStreams) -> Result<OutputClient> {
        let cached = self
            .pool()
            .output
            .iter()
            .find(|(key, _)| key.same_as(streams))
            .map(|(_, client)| client.clone());
        if let Some(client) = cached {
            return Ok(client);
        }
        let client = self.underlying()?.get_output_client(streams)?;
        self.pool().output.push((streams.clone(), client.clone()));
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_kind;
    use crate::fakes::FakeFactory;

    fn not_initialized<T>(result: Result<T>) -> bool {
        matches!(result, Err(e) if is_kind(&e, &BbctlError::FactoryNotInitialized))
    }

    #[tokio::test]
    async fn test_uninitialized_pool_reports_error_every_time() {
        let pool = PooledFactory::new();
        for _ in 0..2 {
            assert!(not_initialized(pool.get_k8s_client().await));
            assert!(not_initialized(pool.get_helm_client("bigbang").await));
            assert!(not_initialized(pool.get_aws_client()));
            assert!(not_initialized(pool.get_viper()));
            assert!(not_initialized(pool.get_logging_client()));
            assert!(not_initialized(pool.get_command_wrapper("helm", &[])));
        }
        assert!(pool.pool().k8s.is_none());
        assert!(pool.pool().helm.is_empty());
    }

    #[tokio::test]
    async fn test_helm_clients_pooled_by_namespace() {
        let pool = PooledFactory::new();
        pool.set_underlying_factory(Arc::new(FakeFactory::new()));

        let a = pool.get_helm_client("bigbang").await.unwrap();
        let b = pool.get_helm_client("bigbang").await.unwrap();
        let c = pool.get_helm_client("flux-system").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_set_viper_drops_config_client() {
        let pool = PooledFactory::new();
        pool.set_underlying_factory(Arc::new(FakeFactory::new()));
        let before = pool.get_config_client().unwrap();

        let replacement = Arc::new(Resolver::isolated());
        pool.set_viper(replacement.clone()).unwrap();
        let after = pool.get_config_client().unwrap();

        assert!(!Arc::ptr_eq(before.resolver(), after.resolver()));
        assert!(Arc::ptr_eq(after.resolver(), &replacement));
    }
}
