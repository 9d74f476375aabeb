//! Unstructured resource access
//!
//! Policy engines register their kinds at runtime through CRDs, so they are
//! listed as [`DynamicObject`]s addressed by group, version and plural name.

use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::{Api, ListParams};
use kube::core::{ApiResource, DynamicObject};
use kube::Client;
use serde_json::Value;
use std::fmt;

/// Address of a resource collection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl GroupVersionResource {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    /// `apiextensions.k8s.io/v1` CustomResourceDefinitions
    pub fn crds() -> Self {
        Self::new("apiextensions.k8s.io", "v1", "customresourcedefinitions")
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub(crate) fn api_resource(&self, kind: &str) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: kind.to_string(),
            plural: self.resource.clone(),
        }
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.resource)
    }
}

#[async_trait]
pub trait DynamicClient: Send + Sync {
    /// List a collection; `namespace: None` lists across all namespaces
    async fn list(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;
}

/// [`DynamicClient`] backed by a kube-rs client
#[derive(Clone)]
pub struct KubeDynamicClient {
    client: Client,
}

impl KubeDynamicClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DynamicClient for KubeDynamicClient {
    async fn list(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let resource = gvr.api_resource("");
        let api: Api<DynamicObject> = match namespace {
            Some(ns) if !ns.is_empty() => Api::namespaced_with(self.client.clone(), ns, &resource),
            _ => Api::all_with(self.client.clone(), &resource),
        };
        let params = match label_selector {
            Some(selector) if !selector.is_empty() => ListParams::default().labels(selector),
            _ => ListParams::default(),
        };
        let list = api
            .list(&params)
            .await
            .with_context(|| format!("error listing {}", gvr))?;
        Ok(list.items)
    }
}

/// Follow `path` through nested maps of an unstructured body
pub fn nested_value<'a>(data: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(data, |value, key| value.get(*key))
}

/// [`nested_value`] as a string slice
pub fn nested_str<'a>(data: &'a Value, path: &[&str]) -> Option<&'a str> {
    nested_value(data, path).and_then(Value::as_str)
}
