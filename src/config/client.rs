//! Config client
//!
//! Materializes a [`GlobalConfiguration`] from the shared [`Resolver`].

use super::resolver::Resolver;
use super::schema::GlobalConfiguration;
use crate::constants::BIG_BANG_CLI_VERSION;
use crate::log::LoggingClient;
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

/// Top-level key holding the schema version a config file was written for
pub const CONFIG_VERSION_KEY: &str = "config-version";

#[derive(Debug, Clone)]
pub struct ConfigClient {
    resolver: Arc<Resolver>,
    logging: LoggingClient,
}

impl ConfigClient {
    pub fn new(resolver: Arc<Resolver>, logging: LoggingClient) -> Self {
        Self { resolver, logging }
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Unmarshal every resolved setting, then let each section pick up flag keys
    pub fn get_config(&self) -> Result<GlobalConfiguration> {
        let settings = self.resolver.all_settings();
        let mut config: GlobalConfiguration =
            serde_yaml::from_value(settings).context("error unmarshalling configuration")?;
        config
            .reconcile(&self.resolver)
            .context("error reconciling configuration")?;
        let file_version = self.resolver.get_string(CONFIG_VERSION_KEY);
        if !file_version.is_empty() && file_version != BIG_BANG_CLI_VERSION {
            self.logging.warn(format!(
                "config file version {} does not match bbctl version {}",
                file_version, BIG_BANG_CLI_VERSION
            ));
        }
        self.logging.debug(format!(
            "resolved configuration from {}",
            self.resolver
                .config_file_used()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "flags and environment".to_string())
        ));
        Ok(config)
    }

    /// Register a command flag and bind it to the key of the same name
    pub fn set_and_bind_flag<D: Serialize, V: Serialize>(
        &self,
        name: &str,
        default: D,
        given: Option<V>,
    ) {
        self.resolver.bind_flag(name, default, given);
    }
}
