//! Helm release storage
//!
//! Helm 3 stores each release revision in the release namespace as a Secret
//! (default) or ConfigMap labelled `owner=helm`. The `release` payload is the
//! release JSON, gzipped, then base64 encoded. `HELM_DRIVER` selects the
//! storage kind the same way the helm CLI does.

use crate::error::BbctlError;
use crate::kube::K8sClient;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];
const OWNER_SELECTOR: &str = "owner=helm";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Revision number
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub info: ReleaseInfo,
    #[serde(default)]
    pub chart: Chart,
    /// User-supplied values
    #[serde(default)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub last_deployed: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    #[serde(default)]
    pub metadata: ChartMetadata,
    /// Chart default values
    #[serde(default)]
    pub values: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, rename = "appVersion")]
    pub app_version: String,
}

impl Release {
    /// `name-version`, as `helm list` prints it
    pub fn chart_label(&self) -> String {
        format!("{}-{}", self.chart.metadata.name, self.chart.metadata.version)
    }
}

#[async_trait]
pub trait HelmClient: Send + Sync {
    /// Latest revision of `name`
    async fn get_release(&self, name: &str) -> Result<Release>;

    /// Latest revision of every deployed or failed release, sorted by name
    async fn get_list(&self) -> Result<Vec<Release>>;

    /// User-supplied values, or with `all` the computed values
    async fn get_values(&self, name: &str, all: bool) -> Result<Map<String, Value>>;
}

/// Storage backend selected by `HELM_DRIVER`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Secret,
    ConfigMap,
}

impl Driver {
    pub fn from_env_value(value: &str) -> Result<Self> {
        match value {
            "" | "secret" | "secrets" => Ok(Driver::Secret),
            "configmap" | "configmaps" => Ok(Driver::ConfigMap),
            other => bail!("unknown driver {:?}", other),
        }
    }
}

/// [`HelmClient`] reading release records from the cluster
pub struct StorageHelmClient {
    k8s: Arc<dyn K8sClient>,
    namespace: String,
    driver: Driver,
}

impl StorageHelmClient {
    pub fn new(k8s: Arc<dyn K8sClient>, namespace: impl Into<String>, driver: Driver) -> Self {
        Self {
            k8s,
            namespace: namespace.into(),
            driver,
        }
    }

    /// Driver taken from `HELM_DRIVER`
    pub fn from_env(k8s: Arc<dyn K8sClient>, namespace: impl Into<String>) -> Result<Self> {
        let driver = Driver::from_env_value(&std::env::var("HELM_DRIVER").unwrap_or_default())?;
        Ok(Self::new(k8s, namespace, driver))
    }

    async fn records(&self, selector: &str) -> Result<Vec<Release>> {
        let payloads: Vec<String> = match self.driver {
            Driver::Secret => self
                .k8s
                .list_secrets(&self.namespace, selector)
                .await?
                .into_iter()
                .filter_map(|s| s.data.and_then(|mut d| d.remove("release")))
                .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned())
                .collect(),
            Driver::ConfigMap => self
                .k8s
                .list_config_maps(&self.namespace, selector)
                .await?
                .into_iter()
                .filter_map(|c| c.data.and_then(|mut d| d.remove("release")))
                .collect(),
        };
        payloads.iter().map(|p| decode_release(p)).collect()
    }

    async fn latest(&self, name: &str) -> Result<Release> {
        let selector = format!("{},name={}", OWNER_SELECTOR, name);
        self.records(&selector)
            .await?
            .into_iter()
            .max_by_key(|r| r.version)
            .ok_or_else(|| BbctlError::ReleaseNotFound.into())
    }
}

#[async_trait]
impl HelmClient for StorageHelmClient {
    async fn get_release(&self, name: &str) -> Result<Release> {
        self.latest(name)
            .await
            .with_context(|| format!("error getting release {}", name))
    }

    async fn get_list(&self) -> Result<Vec<Release>> {
        let records = self
            .records(OWNER_SELECTOR)
            .await
            .context("error listing releases")?;
        Ok(latest_listed(records))
    }

    async fn get_values(&self, name: &str, all: bool) -> Result<Map<String, Value>> {
        let release = self
            .latest(name)
            .await
            .with_context(|| format!("error getting values for {}", name))?;
        Ok(release_values(&release, all))
    }
}

/// Latest revision per name, keeping deployed and failed releases
pub fn latest_listed(records: Vec<Release>) -> Vec<Release> {
    let mut latest: BTreeMap<String, Release> = BTreeMap::new();
    for release in records {
        match latest.get(&release.name) {
            Some(existing) if existing.version >= release.version => {}
            _ => {
                latest.insert(release.name.clone(), release);
            }
        }
    }
    latest
        .into_values()
        .filter(|r| matches!(r.info.status.as_str(), "deployed" | "failed"))
        .collect()
}

/// `config`, or with `all` the chart defaults overlaid by `config`
pub fn release_values(release: &Release, all: bool) -> Map<String, Value> {
    if !all {
        return release.config.clone();
    }
    let mut values = release.chart.values.clone();
    merge_values(&mut values, &release.config);
    values
}

/// Recursively overlay `overrides` onto `base`; a null override removes the key
pub fn merge_values(base: &mut Map<String, Value>, overrides: &Map<String, Value>) {
    for (key, value) in overrides {
        match (base.get_mut(key), value) {
            (_, Value::Null) => {
                base.remove(key);
            }
            (Some(Value::Object(existing)), Value::Object(nested)) => {
                merge_values(existing, nested);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Decode a storage payload: base64, optionally gzip, then JSON
pub fn decode_release(payload: &str) -> Result<Release> {
    let bytes = STANDARD
        .decode(payload.trim())
        .context("error decoding release payload")?;
    let json = if bytes.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_end(&mut out)
            .context("error decompressing release payload")?;
        out
    } else {
        bytes
    };
    serde_json::from_slice(&json).context("error unmarshalling release")
}

/// Encode a release the way helm stores it
pub fn encode_release(release: &Release) -> Result<String> {
    let json = serde_json::to_vec(release)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(STANDARD.encode(encoder.finish()?))
}
