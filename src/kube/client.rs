//! Typed Kubernetes accessor

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Event, Namespace, Pod, Secret, Service};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIGroupList;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// Typed cluster operations used by bbctl
///
/// `namespace: None` lists across all namespaces.
#[async_trait]
pub trait K8sClient: Send + Sync {
    async fn list_pods(&self, namespace: Option<&str>, label_selector: Option<&str>)
    -> Result<Vec<Pod>>;

    async fn list_deployments(&self, namespace: Option<&str>) -> Result<Vec<Deployment>>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    async fn list_stateful_sets(&self, namespace: Option<&str>) -> Result<Vec<StatefulSet>>;

    async fn list_daemon_sets(&self, namespace: Option<&str>) -> Result<Vec<DaemonSet>>;

    async fn list_services(&self, namespace: Option<&str>) -> Result<Vec<Service>>;

    /// Events across all namespaces matching `field_selector`
    async fn list_events(&self, field_selector: &str) -> Result<Vec<Event>>;

    async fn list_storage_classes(&self) -> Result<Vec<StorageClass>>;

    async fn list_secrets(&self, namespace: &str, label_selector: &str) -> Result<Vec<Secret>>;

    async fn list_config_maps(&self, namespace: &str, label_selector: &str)
    -> Result<Vec<ConfigMap>>;

    /// Discovery: the API groups served by the cluster
    async fn api_groups(&self) -> Result<APIGroupList>;

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;

    async fn create_namespace(&self, name: &str) -> Result<Namespace>;

    async fn delete_namespace(&self, name: &str) -> Result<()>;

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret>;

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job>;
}

/// [`K8sClient`] backed by a kube-rs client
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        match namespace {
            Some(ns) if !ns.is_empty() => Api::namespaced(self.client.clone(), ns),
            _ => Api::all(self.client.clone()),
        }
    }

    async fn list<K>(&self, api: Api<K>, params: ListParams) -> Result<Vec<K>>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let kind = K::kind(&Default::default()).to_string();
        let list = api
            .list(&params)
            .await
            .with_context(|| format!("error listing {}", kind))?;
        Ok(list.items)
    }
}

fn label_params(label_selector: Option<&str>) -> ListParams {
    match label_selector {
        Some(selector) if !selector.is_empty() => ListParams::default().labels(selector),
        _ => ListParams::default(),
    }
}

#[async_trait]
impl K8sClient for KubeClient {
    async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Pod>> {
        self.list(self.api(namespace), label_params(label_selector))
            .await
    }

    async fn list_deployments(&self, namespace: Option<&str>) -> Result<Vec<Deployment>> {
        self.list(self.api(namespace), ListParams::default()).await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = self.api(Some(namespace));
        api.get_opt(name)
            .await
            .with_context(|| format!("error getting deployment {}/{}", namespace, name))
    }

    async fn list_stateful_sets(&self, namespace: Option<&str>) -> Result<Vec<StatefulSet>> {
        self.list(self.api(namespace), ListParams::default()).await
    }

    async fn list_daemon_sets(&self, namespace: Option<&str>) -> Result<Vec<DaemonSet>> {
        self.list(self.api(namespace), ListParams::default()).await
    }

    async fn list_services(&self, namespace: Option<&str>) -> Result<Vec<Service>> {
        self.list(self.api(namespace), ListParams::default()).await
    }

    async fn list_events(&self, field_selector: &str) -> Result<Vec<Event>> {
        let api: Api<Event> = self.api(None);
        self.list(api, ListParams::default().fields(field_selector))
            .await
    }

    async fn list_storage_classes(&self) -> Result<Vec<StorageClass>> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        self.list(api, ListParams::default()).await
    }

    async fn list_secrets(&self, namespace: &str, label_selector: &str) -> Result<Vec<Secret>> {
        self.list(self.api(Some(namespace)), label_params(Some(label_selector)))
            .await
    }

    async fn list_config_maps(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ConfigMap>> {
        self.list(self.api(Some(namespace)), label_params(Some(label_selector)))
            .await
    }

    async fn api_groups(&self) -> Result<APIGroupList> {
        self.client
            .list_api_groups()
            .await
            .context("error listing api groups")
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.get_opt(name)
            .await
            .with_context(|| format!("error getting namespace {}", name))
    }

    async fn create_namespace(&self, name: &str) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let mut namespace = Namespace::default();
        namespace.metadata.name = Some(name.to_string());
        api.create(&PostParams::default(), &namespace)
            .await
            .with_context(|| format!("error creating namespace {}", name))
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::foreground())
            .await
            .with_context(|| format!("error deleting namespace {}", name))?;
        Ok(())
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let api: Api<Secret> = self.api(Some(namespace));
        api.create(&PostParams::default(), secret)
            .await
            .with_context(|| format!("error creating secret in {}", namespace))
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job> {
        let api: Api<Job> = self.api(Some(namespace));
        api.create(&PostParams::default(), job)
            .await
            .with_context(|| format!("error creating job in {}", namespace))
    }
}
