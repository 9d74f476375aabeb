//! Istio networking resources

use super::dynamic::{GroupVersionResource, nested_value};
use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::{Api, ListParams};
use kube::core::DynamicObject;
use kube::{Client, Config};
use serde_json::Value;

/// The parts of a `networking.istio.io` VirtualService bbctl uses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualService {
    pub name: String,
    pub namespace: String,
    pub hosts: Vec<String>,
    pub gateways: Vec<String>,
}

fn strings_at(data: &Value, path: &[&str]) -> Vec<String> {
    nested_value(data, path)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

impl From<&DynamicObject> for VirtualService {
    fn from(obj: &DynamicObject) -> Self {
        Self {
            name: obj.metadata.name.clone().unwrap_or_default(),
            namespace: obj.metadata.namespace.clone().unwrap_or_default(),
            hosts: strings_at(&obj.data, &["spec", "hosts"]),
            gateways: strings_at(&obj.data, &["spec", "gateways"]),
        }
    }
}

#[async_trait]
pub trait IstioClient: Send + Sync {
    /// `namespace: None` lists across all namespaces
    async fn list_virtual_services(&self, namespace: Option<&str>) -> Result<Vec<VirtualService>>;
}

/// [`IstioClient`] backed by a kube-rs client
pub struct KubeIstioClient {
    client: Client,
}

impl KubeIstioClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::try_from(config.clone()).context("error creating istio client")?;
        Ok(Self { client })
    }

    fn gvr() -> GroupVersionResource {
        GroupVersionResource::new("networking.istio.io", "v1beta1", "virtualservices")
    }
}

#[async_trait]
impl IstioClient for KubeIstioClient {
    async fn list_virtual_services(&self, namespace: Option<&str>) -> Result<Vec<VirtualService>> {
        let resource = Self::gvr().api_resource("VirtualService");
        let api: Api<DynamicObject> = match namespace {
            Some(ns) if !ns.is_empty() => Api::namespaced_with(self.client.clone(), ns, &resource),
            _ => Api::all_with(self.client.clone(), &resource),
        };
        let list = api
            .list(&ListParams::default())
            .await
            .context("unable to list istio services")?;
        Ok(list.items.iter().map(VirtualService::from).collect())
    }
}
