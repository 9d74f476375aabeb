//! Configuration schema definitions
//!
//! `GlobalConfiguration` mirrors the YAML layout of `config.yaml`. After the
//! resolver's settings are deserialized into it, each section reconciles itself
//! from the flat flag keys (`gatekeeper`, `audit`, `format`, ...) that were set
//! on the command line or through the environment.

use super::resolver::Resolver;
use crate::output::{Outputable, json_bytes, yaml_bytes};
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// A configuration section that can pick up flag values
pub trait ConfigSection {
    fn reconcile(&mut self, resolver: &Resolver) -> Result<()>;
}

/// Value of a flat key when some layer provides it; a blank value counts as unset
fn given_string(resolver: &Resolver, key: &str) -> Option<String> {
    if !resolver.is_set(key) {
        return None;
    }
    let value = resolver.get_string(key);
    (!value.trim().is_empty()).then_some(value)
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct GlobalConfiguration {
    /// Filesystem location of the Big Bang product repo checkout
    #[serde(rename = "big-bang-repo")]
    pub big_bang_repo: String,

    #[serde(rename = "bbctl-log-add-source")]
    pub log_add_source: bool,

    #[serde(rename = "bbctl-log-file")]
    pub log_file: String,

    #[serde(rename = "bbctl-log-format")]
    pub log_format: String,

    #[serde(rename = "bbctl-log-level")]
    pub log_level: String,

    #[serde(rename = "bbctl-log-output")]
    pub log_output: String,

    #[serde(rename = "deploy-big-bang")]
    pub deploy_big_bang: DeployBigBangConfiguration,

    pub gitlab: GitLabConfiguration,

    #[serde(rename = "k3d-ssh")]
    pub k3d_ssh: K3dSshConfiguration,

    #[serde(rename = "output-config")]
    pub output: OutputConfiguration,

    pub policy: PolicyConfiguration,

    #[serde(rename = "preflight-check")]
    pub preflight_check: PreflightCheckConfiguration,

    #[serde(rename = "util-credential-helper")]
    pub credential_helper: UtilCredentialHelperConfiguration,

    #[serde(rename = "util-k8s")]
    pub k8s: UtilK8sConfiguration,

    pub version: VersionConfiguration,

    pub violations: ViolationsConfiguration,
}

impl GlobalConfiguration {
    /// Reconcile the root keys and every section; section errors are collected
    pub fn reconcile(&mut self, resolver: &Resolver) -> Result<()> {
        self.big_bang_repo = resolver.get_string("big-bang-repo");
        self.log_add_source = resolver.get_bool("bbctl-log-add-source");
        self.log_file = resolver.get_string("bbctl-log-file");
        self.log_format = resolver.get_string("bbctl-log-format");
        self.log_level = resolver.get_string("bbctl-log-level");
        self.log_output = resolver.get_string("bbctl-log-output");

        let sections: [&mut dyn ConfigSection; 10] = [
            &mut self.deploy_big_bang,
            &mut self.gitlab,
            &mut self.k3d_ssh,
            &mut self.output,
            &mut self.policy,
            &mut self.preflight_check,
            &mut self.credential_helper,
            &mut self.k8s,
            &mut self.version,
            &mut self.violations,
        ];
        let errors: Vec<String> = sections
            .into_iter()
            .filter_map(|section| section.reconcile(resolver).err())
            .map(|e| format!("{:#}", e))
            .collect();
        if !errors.is_empty() {
            bail!("{}", errors.join("\n"));
        }
        Ok(())
    }

    /// Fails unless `big-bang-repo` is set; used by commands that read chart paths
    pub fn require_big_bang_repo(&self) -> Result<&str> {
        if self.big_bang_repo.is_empty() {
            bail!("big-bang-repo is required but was not set");
        }
        Ok(&self.big_bang_repo)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DeployBigBangConfiguration {
    pub k3d: bool,
    pub addon: Vec<String>,
}

impl ConfigSection for DeployBigBangConfiguration {
    fn reconcile(&mut self, resolver: &Resolver) -> Result<()> {
        if resolver.is_set("k3d") {
            self.k3d = resolver.get_bool("k3d");
        }
        if resolver.is_set("addon") {
            self.addon = resolver.get_string_list("addon");
        }
        Ok(())
    }
}

pub const DEFAULT_GITLAB_BASE_URL: &str = "https://repo1.dso.mil/api/v4";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct GitLabConfiguration {
    #[serde(rename = "access-token")]
    pub token: String,
    #[serde(rename = "base-url")]
    pub base_url: String,
}

impl ConfigSection for GitLabConfiguration {
    fn reconcile(&mut self, resolver: &Resolver) -> Result<()> {
        if let Some(token) = given_string(resolver, "gitlab-access-token") {
            self.token = token;
        }
        if let Some(base_url) = given_string(resolver, "gitlab-base-url") {
            self.base_url = base_url;
        } else if self.base_url.is_empty() {
            self.base_url = DEFAULT_GITLAB_BASE_URL.to_string();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct K3dSshConfiguration {
    #[serde(rename = "ssh-username")]
    pub user: String,
    #[serde(rename = "private-ip")]
    pub private_ip: bool,
}

impl ConfigSection for K3dSshConfiguration {
    fn reconcile(&mut self, resolver: &Resolver) -> Result<()> {
        if resolver.is_set("private-ip") {
            self.private_ip = resolver.get_bool("private-ip");
        }
        if let Some(user) = given_string(resolver, "ssh-username") {
            self.user = user;
        } else if self.user.is_empty() {
            self.user = "ubuntu".to_string();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OutputConfiguration {
    /// One of `text`, `json`, `yaml`
    pub format: String,
}

impl ConfigSection for OutputConfiguration {
    fn reconcile(&mut self, resolver: &Resolver) -> Result<()> {
        if let Some(format) = given_string(resolver, "format") {
            self.format = format;
        } else if self.format.is_empty() {
            self.format = crate::output::Format::Yaml.to_string();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PolicyConfiguration {
    pub gatekeeper: bool,
    pub kyverno: bool,
}

impl ConfigSection for PolicyConfiguration {
    fn reconcile(&mut self, resolver: &Resolver) -> Result<()> {
        if resolver.is_set("gatekeeper") {
            self.gatekeeper = resolver.get_bool("gatekeeper");
        }
        if resolver.is_set("kyverno") {
            self.kyverno = resolver.get_bool("kyverno");
        }
        Ok(())
    }
}

/// The check job pod is polled every `retrydelay` seconds, 50 seconds in total by default
pub const DEFAULT_RETRY_COUNT: u32 = 10;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PreflightCheckConfiguration {
    pub registryserver: String,
    pub registryusername: String,
    pub registrypassword: String,
    /// Attempts made while waiting on the check job pod or namespace; zero means the default
    pub retrycount: u32,
    /// Seconds between attempts
    pub retrydelay: u64,
}

impl ConfigSection for PreflightCheckConfiguration {
    fn reconcile(&mut self, resolver: &Resolver) -> Result<()> {
        if let Some(value) = given_string(resolver, "registryserver") {
            self.registryserver = value;
        }
        if let Some(value) = given_string(resolver, "registryusername") {
            self.registryusername = value;
        }
        if let Some(value) = given_string(resolver, "registrypassword") {
            self.registrypassword = value;
        }
        if given_string(resolver, "retrycount").is_some() {
            self.retrycount = u32::try_from(resolver.get_i64("retrycount")).unwrap_or(0);
        }
        if self.retrycount == 0 {
            self.retrycount = DEFAULT_RETRY_COUNT;
        }
        if given_string(resolver, "retrydelay").is_some() {
            self.retrydelay = u64::try_from(resolver.get_i64("retrydelay")).unwrap_or(0);
        } else if self.retrydelay == 0 {
            self.retrydelay = DEFAULT_RETRY_DELAY_SECS;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct UtilCredentialHelperConfiguration {
    #[serde(rename = "big-bang-credential-helper-credentials-file-path")]
    pub file_path: String,
    #[serde(rename = "big-bang-credential-helper")]
    pub credential_helper: String,
}

impl ConfigSection for UtilCredentialHelperConfiguration {
    fn reconcile(&mut self, resolver: &Resolver) -> Result<()> {
        if let Some(path) = given_string(resolver, "big-bang-credential-helper-credentials-file-path") {
            self.file_path = path;
        }
        if let Some(helper) = given_string(resolver, "big-bang-credential-helper") {
            self.credential_helper = helper;
        }
        Ok(())
    }
}

/// Cluster connection overrides applied on top of the inferred kubeconfig
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct UtilK8sConfiguration {
    pub kubeconfig: String,
    pub context: String,
    #[serde(rename = "cluster-name")]
    pub cluster_name: String,
    pub namespace: String,
    #[serde(rename = "api-server")]
    pub api_server: String,
    pub insecure: bool,
}

impl ConfigSection for UtilK8sConfiguration {
    fn reconcile(&mut self, resolver: &Resolver) -> Result<()> {
        let strings: [(&str, &mut String); 5] = [
            ("kubeconfig", &mut self.kubeconfig),
            ("context", &mut self.context),
            ("cluster-name", &mut self.cluster_name),
            ("namespace", &mut self.namespace),
            ("api-server", &mut self.api_server),
        ];
        for (key, field) in strings {
            if let Some(value) = given_string(resolver, key) {
                *field = value;
            }
        }
        if resolver.is_set("insecure") {
            self.insecure = resolver.get_bool("insecure");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct VersionConfiguration {
    pub client: bool,
    #[serde(rename = "all-charts")]
    pub all_charts: bool,
    #[serde(rename = "check-for-updates")]
    pub check_for_updates: bool,
    #[serde(rename = "no-shas")]
    pub no_shas: bool,
}

impl ConfigSection for VersionConfiguration {
    fn reconcile(&mut self, resolver: &Resolver) -> Result<()> {
        self.client = resolver.get_bool("client");
        self.all_charts = resolver.get_bool("all-charts");
        self.check_for_updates = resolver.get_bool("check-for-updates");
        self.no_shas = resolver.get_bool("no-shas");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ViolationsConfiguration {
    pub audit: bool,
}

impl ConfigSection for ViolationsConfiguration {
    fn reconcile(&mut self, resolver: &Resolver) -> Result<()> {
        if resolver.is_set("audit") {
            self.audit = resolver.get_bool("audit");
        }
        Ok(())
    }
}

/// `config view` without a key prints the whole configuration
impl Outputable for GlobalConfiguration {
    fn encode_yaml(&self) -> Result<Vec<u8>> {
        yaml_bytes(self)
    }

    fn encode_json(&self) -> Result<Vec<u8>> {
        json_bytes(self)
    }

    fn encode_text(&self) -> Result<String> {
        Ok(crate::yamler::marshal(self)?.trim_end().to_string())
    }
}
