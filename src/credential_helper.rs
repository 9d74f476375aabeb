//! Registry credential lookup
//!
//! `big-bang-credential-helper` names either the literal `credentials-file`,
//! which reads `~/.bbctl/credentials.yaml` (or the configured path), or an
//! executable invoked as `helper <component> <uri>` that prints the value.

use crate::command::{CommandRunner, CommandWrapper};
use crate::config::ConfigClient;
use crate::config::paths::default_credentials_path;
use crate::filesystem::FileSystemClient;
use crate::streams::SharedBuffer;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Helper value that selects the credentials file
pub const CREDENTIALS_FILE_HELPER: &str = "credentials-file";

pub const USERNAME: &str = "username";
pub const PASSWORD: &str = "password";

/// Contents of `credentials.yaml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsFile {
    #[serde(default)]
    pub credentials: Vec<Credentials>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub uri: String,
}

impl CredentialsFile {
    /// The requested component of the entry registered for `uri`
    pub fn lookup(&self, component: &str, uri: &str, source: &str) -> Result<String> {
        let credentials = self
            .credentials
            .iter()
            .find(|c| c.uri == uri && !c.uri.is_empty())
            .ok_or_else(|| anyhow!("no credentials found for {} in {}", uri, source))?;
        match component {
            USERNAME => Ok(credentials.username.clone()),
            PASSWORD => Ok(credentials.password.clone()),
            other => bail!("invalid component {}", other),
        }
    }
}

/// Resolves `(component, uri)` pairs to secrets
#[async_trait]
pub trait CredentialHelper: Send + Sync {
    async fn get(&self, component: &str, uri: &str) -> Result<String>;
}

pub type SharedCredentialHelper = Arc<dyn CredentialHelper>;

/// Helper driven by the resolved configuration
///
/// Configuration is read on every call so a helper obtained before flags were
/// bound still sees them.
pub struct ConfiguredCredentialHelper {
    config: ConfigClient,
    filesystem: Arc<dyn FileSystemClient>,
}

impl ConfiguredCredentialHelper {
    pub fn new(config: ConfigClient, filesystem: Arc<dyn FileSystemClient>) -> Self {
        Self { config, filesystem }
    }

    fn read_credentials_file(&self, path: &str, component: &str, uri: &str) -> Result<String> {
        let path = if path.is_empty() {
            default_credentials_path(&self.filesystem.user_home_dir()?)
        } else {
            PathBuf::from(path)
        };
        let source = path.display().to_string();
        let contents = self
            .filesystem
            .read_to_string(&path)
            .with_context(|| format!("unable to read credentials file {}", source))?;
        let file: CredentialsFile = serde_yaml::from_str(&contents)
            .with_context(|| format!("unable to unmarshal credentials file {}", source))?;
        file.lookup(component, uri, &source)
    }

    async fn run_helper(&self, helper: &str, component: &str, uri: &str) -> Result<String> {
        let out = SharedBuffer::default();
        let mut cmd = CommandWrapper::new(helper, &[component.to_string(), uri.to_string()]);
        cmd.set_stdout(out.writer());
        cmd.run()
            .await
            .with_context(|| format!("unable to get {} from {} using {}", component, uri, helper))?;
        Ok(out.contents().trim_end_matches(['\r', '\n']).to_string())
    }
}

#[async_trait]
impl CredentialHelper for ConfiguredCredentialHelper {
    async fn get(&self, component: &str, uri: &str) -> Result<String> {
        let config = self.config.get_config().context("unable to get client")?;
        let settings = &config.credential_helper;
        let helper = settings.credential_helper.as_str();
        if helper.is_empty() {
            bail!("no credential helper defined (\"big-bang-credential-helper\")");
        }

        let value = if helper == CREDENTIALS_FILE_HELPER {
            self.read_credentials_file(&settings.file_path, component, uri)
                .context("unable to read credentials file")?
        } else {
            self.run_helper(helper, component, uri).await?
        };
        if value.is_empty() {
            bail!("no {} found for {} in {}", component, uri, helper);
        }
        Ok(value)
    }
}
