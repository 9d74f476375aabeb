//! In-memory test doubles
//!
//! [`FakeFactory`] implements [`Factory`] over shared in-memory state so a test
//! can seed a cluster, Helm storage, registries and local commands, run a
//! command handler, and then inspect what was written to the streams, the log
//! sink and the fake cluster. Every client handed out shares the factory's
//! state, so changes made after a client is built are still visible to it.
//!
//! Failures are injected by operation name with [`FakeFactory::fail`]; the
//! names used are listed on the method.

use crate::aws::{AwsClient, CallerIdentity, ClusterIp, FilterExposure};
use crate::command::CommandRunner;
use crate::config::{ConfigClient, Resolver};
use crate::credential_helper::{CredentialHelper, SharedCredentialHelper};
use crate::error::BbctlError;
use crate::factory::Factory;
use crate::filesystem::FileSystemClient;
use crate::gitlab::GitLabClient;
use crate::helm::{HelmClient, Release, latest_listed, release_values};
use crate::ironbank::IronbankClient;
use crate::kube::{
    CommandExecutor, DynamicClient, FluxKind, GroupVersionResource, IstioClient, K8sClient,
    RuntimeClient, Scheme, VirtualService,
};
use crate::log::{Logger, LoggingClient, MemorySink};
use crate::output::OutputClient;
use crate::streams::{IoStreams, SharedBuffer, SharedWriter, write_locked};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    ConfigMap, Event, Namespace, Pod, PodStatus, Secret, Service,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    APIGroup, APIGroupList, GroupVersionForDiscovery, ObjectMeta,
};
use kube::Resource;
use kube::core::{ApiResource, DynamicObject};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

type Shared<T> = Arc<Mutex<T>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Operation name to error message
#[derive(Clone, Default)]
struct Failures(Shared<HashMap<String, String>>);

impl Failures {
    fn check(&self, operation: &str) -> Result<()> {
        match lock(&self.0).get(operation) {
            Some(message) => bail!("{}", message),
            None => Ok(()),
        }
    }
}

fn in_namespace(meta: &ObjectMeta, namespace: Option<&str>) -> bool {
    match namespace {
        Some(ns) if !ns.is_empty() => meta.namespace.as_deref() == Some(ns),
        _ => true,
    }
}

/// Equality-based selector terms, `a=b,c` style
fn matches_labels(meta: &ObjectMeta, selector: Option<&str>) -> bool {
    let Some(selector) = selector.filter(|s| !s.is_empty()) else {
        return true;
    };
    let empty = BTreeMap::new();
    let labels = meta.labels.as_ref().unwrap_or(&empty);
    selector.split(',').map(str::trim).all(|term| match term.split_once('=') {
        Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
        None => labels.contains_key(term),
    })
}

fn select<K: Resource + Clone>(
    items: &[K],
    namespace: Option<&str>,
    selector: Option<&str>,
) -> Vec<K> {
    items
        .iter()
        .filter(|item| in_namespace(item.meta(), namespace) && matches_labels(item.meta(), selector))
        .cloned()
        .collect()
}

/// Build an unstructured object the way a list from the API server returns it
pub fn dynamic_object(
    gvr: &GroupVersionResource,
    kind: &str,
    namespace: Option<&str>,
    name: &str,
    data: Value,
) -> DynamicObject {
    let resource = ApiResource {
        group: gvr.group.clone(),
        version: gvr.version.clone(),
        api_version: gvr.api_version(),
        kind: kind.to_string(),
        plural: gvr.resource.clone(),
    };
    let object = DynamicObject::new(name, &resource).data(data);
    match namespace {
        Some(ns) => object.within(ns),
        None => object,
    }
}

/// Objects stored in the fake cluster
#[derive(Default)]
pub struct FakeClusterState {
    pub pods: Vec<Pod>,
    pub deployments: Vec<Deployment>,
    pub stateful_sets: Vec<StatefulSet>,
    pub daemon_sets: Vec<DaemonSet>,
    pub services: Vec<Service>,
    pub events: Vec<Event>,
    pub storage_classes: Vec<StorageClass>,
    pub secrets: Vec<Secret>,
    pub config_maps: Vec<ConfigMap>,
    pub namespaces: Vec<Namespace>,
    pub jobs: Vec<Job>,
    pub api_groups: Vec<APIGroup>,
    /// Every namespace deleted, in order
    pub deleted_namespaces: Vec<String>,
    /// Phase given to the pod started for each created job; `None` starts no pod
    pub job_pod_phase: Option<String>,
    /// List operations that never return, by the failure names below
    pub stalled: Vec<String>,
}

impl FakeClusterState {
    pub fn add_api_group(&mut self, name: &str, versions: &[&str]) {
        self.api_groups.push(APIGroup {
            name: name.to_string(),
            versions: versions
                .iter()
                .map(|v| GroupVersionForDiscovery {
                    group_version: format!("{}/{}", name, v),
                    version: v.to_string(),
                })
                .collect(),
            ..Default::default()
        });
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.namespaces
            .iter()
            .any(|ns| ns.metadata.name.as_deref() == Some(name))
    }
}

/// [`K8sClient`] over [`FakeClusterState`]
///
/// Failure names: `list_pods`, `list_deployments`, `get_deployment`,
/// `list_stateful_sets`, `list_daemon_sets`, `list_services`, `list_events`,
/// `list_storage_classes`, `list_secrets`, `list_config_maps`, `api_groups`,
/// `get_namespace`, `create_namespace`, `delete_namespace`, `create_secret`,
/// `create_job`.
#[derive(Clone)]
pub struct FakeK8sClient {
    state: Shared<FakeClusterState>,
    failures: Failures,
}

impl FakeK8sClient {
    pub fn state(&self) -> MutexGuard<'_, FakeClusterState> {
        lock(&self.state)
    }

    async fn stall_if_requested(&self, operation: &str) {
        let stalled = self.state().stalled.iter().any(|s| s == operation);
        if stalled {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl K8sClient for FakeK8sClient {
    async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Pod>> {
        self.stall_if_requested("list_pods").await;
        self.failures.check("list_pods")?;
        Ok(select(&self.state().pods, namespace, label_selector))
    }

    async fn list_deployments(&self, namespace: Option<&str>) -> Result<Vec<Deployment>> {
        self.stall_if_requested("list_deployments").await;
        self.failures.check("list_deployments")?;
        Ok(select(&self.state().deployments, namespace, None))
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        self.failures.check("get_deployment")?;
        Ok(self
            .state()
            .deployments
            .iter()
            .find(|d| {
                d.metadata.namespace.as_deref() == Some(namespace)
                    && d.metadata.name.as_deref() == Some(name)
            })
            .cloned())
    }

    async fn list_stateful_sets(&self, namespace: Option<&str>) -> Result<Vec<StatefulSet>> {
        self.stall_if_requested("list_stateful_sets").await;
        self.failures.check("list_stateful_sets")?;
        Ok(select(&self.state().stateful_sets, namespace, None))
    }

    async fn list_daemon_sets(&self, namespace: Option<&str>) -> Result<Vec<DaemonSet>> {
        self.stall_if_requested("list_daemon_sets").await;
        self.failures.check("list_daemon_sets")?;
        Ok(select(&self.state().daemon_sets, namespace, None))
    }

    async fn list_services(&self, namespace: Option<&str>) -> Result<Vec<Service>> {
        self.failures.check("list_services")?;
        Ok(select(&self.state().services, namespace, None))
    }

    async fn list_events(&self, field_selector: &str) -> Result<Vec<Event>> {
        self.failures.check("list_events")?;
        let reason = field_selector.strip_prefix("reason=");
        Ok(self
            .state()
            .events
            .iter()
            .filter(|e| reason.is_none() || e.reason.as_deref() == reason)
            .cloned()
            .collect())
    }

    async fn list_storage_classes(&self) -> Result<Vec<StorageClass>> {
        self.failures.check("list_storage_classes")?;
        Ok(self.state().storage_classes.clone())
    }

    async fn list_secrets(&self, namespace: &str, label_selector: &str) -> Result<Vec<Secret>> {
        self.failures.check("list_secrets")?;
        Ok(select(
            &self.state().secrets,
            Some(namespace),
            Some(label_selector),
        ))
    }

    async fn list_config_maps(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ConfigMap>> {
        self.failures.check("list_config_maps")?;
        Ok(select(
            &self.state().config_maps,
            Some(namespace),
            Some(label_selector),
        ))
    }

    async fn api_groups(&self) -> Result<APIGroupList> {
        self.failures.check("api_groups")?;
        Ok(APIGroupList {
            groups: self.state().api_groups.clone(),
        })
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        self.failures.check("get_namespace")?;
        Ok(self
            .state()
            .namespaces
            .iter()
            .find(|ns| ns.metadata.name.as_deref() == Some(name))
            .cloned())
    }

    async fn create_namespace(&self, name: &str) -> Result<Namespace> {
        self.failures.check("create_namespace")?;
        let mut state = self.state();
        if state.has_namespace(name) {
            bail!("namespaces \"{}\" already exists", name);
        }
        let mut namespace = Namespace::default();
        namespace.metadata.name = Some(name.to_string());
        state.namespaces.push(namespace.clone());
        Ok(namespace)
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.failures.check("delete_namespace")?;
        let mut state = self.state();
        if !state.has_namespace(name) {
            bail!("namespaces \"{}\" not found", name);
        }
        let keep = |meta: &ObjectMeta| meta.namespace.as_deref() != Some(name);
        state
            .namespaces
            .retain(|ns| ns.metadata.name.as_deref() != Some(name));
        state.pods.retain(|p| keep(&p.metadata));
        state.secrets.retain(|s| keep(&s.metadata));
        state.jobs.retain(|j| keep(&j.metadata));
        state.deleted_namespaces.push(name.to_string());
        Ok(())
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        self.failures.check("create_secret")?;
        let mut state = self.state();
        if !state.has_namespace(namespace) {
            bail!("namespaces \"{}\" not found", namespace);
        }
        let mut created = secret.clone();
        created.metadata.namespace = Some(namespace.to_string());
        state.secrets.push(created.clone());
        Ok(created)
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job> {
        self.failures.check("create_job")?;
        let mut state = self.state();
        if !state.has_namespace(namespace) {
            bail!("namespaces \"{}\" not found", namespace);
        }
        let mut created = job.clone();
        created.metadata.namespace = Some(namespace.to_string());
        let job_name = created.metadata.name.clone().unwrap_or_default();
        if let Some(phase) = state.job_pod_phase.clone() {
            let mut pod = Pod {
                status: Some(PodStatus {
                    phase: Some(phase),
                    ..Default::default()
                }),
                ..Default::default()
            };
            pod.metadata.name = Some(format!("{}-x7k2p", job_name));
            pod.metadata.namespace = Some(namespace.to_string());
            pod.metadata.labels = Some(BTreeMap::from([(
                "job-name".to_string(),
                job_name.clone(),
            )]));
            state.pods.push(pod);
        }
        state.jobs.push(created.clone());
        Ok(created)
    }
}

/// [`HelmClient`] over releases shared with the factory
///
/// Failure name: `helm`.
pub struct FakeHelmClient {
    namespace: String,
    releases: Shared<Vec<Release>>,
    failures: Failures,
}

impl FakeHelmClient {
    fn records(&self) -> Vec<Release> {
        lock(&self.releases)
            .iter()
            .filter(|r| r.namespace == self.namespace)
            .cloned()
            .collect()
    }

    fn latest(&self, name: &str) -> Result<Release> {
        self.records()
            .into_iter()
            .filter(|r| r.name == name)
            .max_by_key(|r| r.version)
            .ok_or_else(|| BbctlError::ReleaseNotFound.into())
    }
}

#[async_trait]
impl HelmClient for FakeHelmClient {
    async fn get_release(&self, name: &str) -> Result<Release> {
        self.failures.check("helm")?;
        self.latest(name)
    }

    async fn get_list(&self) -> Result<Vec<Release>> {
        self.failures.check("helm")?;
        Ok(latest_listed(self.records()))
    }

    async fn get_values(&self, name: &str, all: bool) -> Result<Map<String, Value>> {
        self.failures.check("helm")?;
        Ok(release_values(&self.latest(name)?, all))
    }
}

/// [`DynamicClient`] over objects keyed by resource
///
/// Failure names: `dynamic:{resource}` for one resource, `dynamic` for all.
#[derive(Clone)]
pub struct FakeDynamicClient {
    objects: Shared<Vec<(GroupVersionResource, DynamicObject)>>,
    failures: Failures,
}

#[async_trait]
impl DynamicClient for FakeDynamicClient {
    async fn list(
        &self,
        gvr: &GroupVersionResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        self.failures.check("dynamic")?;
        self.failures.check(&format!("dynamic:{}", gvr.resource))?;
        Ok(lock(&self.objects)
            .iter()
            .filter(|(key, obj)| {
                key == gvr
                    && in_namespace(&obj.metadata, namespace)
                    && matches_labels(&obj.metadata, label_selector)
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }
}

/// [`RuntimeClient`] over Flux objects keyed by kind
///
/// Failure name: `flux:{Kind}`.
pub struct FakeRuntimeClient {
    scheme: Arc<Scheme>,
    objects: Shared<Vec<(FluxKind, DynamicObject)>>,
    failures: Failures,
}

#[async_trait]
impl RuntimeClient for FakeRuntimeClient {
    fn scheme(&self) -> &Arc<Scheme> {
        &self.scheme
    }

    async fn list(&self, kind: FluxKind, namespace: Option<&str>) -> Result<Vec<DynamicObject>> {
        if !self.scheme.recognizes(kind) {
            bail!("kind {} is not registered in the scheme", kind);
        }
        self.failures.check(&format!("flux:{}", kind))?;
        Ok(lock(&self.objects)
            .iter()
            .filter(|(k, obj)| *k == kind && in_namespace(&obj.metadata, namespace))
            .map(|(_, obj)| obj.clone())
            .collect())
    }
}

pub struct FakeIstioClient {
    services: Shared<Vec<VirtualService>>,
    failures: Failures,
}

#[async_trait]
impl IstioClient for FakeIstioClient {
    async fn list_virtual_services(&self, namespace: Option<&str>) -> Result<Vec<VirtualService>> {
        self.failures.check("istio")?;
        Ok(lock(&self.services)
            .iter()
            .filter(|vs| namespace.is_none_or(|ns| ns.is_empty() || vs.namespace == ns))
            .cloned()
            .collect())
    }
}

/// Pod exec answering from canned output keyed by the space-joined command
pub struct FakeCommandExecutor {
    command: String,
    outputs: Shared<HashMap<String, String>>,
    stdout: SharedWriter,
    stderr: SharedWriter,
}

#[async_trait]
impl CommandExecutor for FakeCommandExecutor {
    async fn stream(&mut self) -> Result<()> {
        let output = lock(&self.outputs).get(&self.command).cloned();
        match output {
            Some(output) => write_locked(&self.stdout, output.as_bytes()),
            None => {
                write_locked(&self.stderr, b"command not found\n")?;
                bail!("command terminated with exit code 127")
            }
        }
    }
}

/// Local commands: canned results keyed by [`CommandRunner::describe`]
#[derive(Default)]
struct CommandBook {
    results: HashMap<String, Result<String, String>>,
    invocations: Vec<String>,
    stdin: Vec<Vec<u8>>,
    attached: Vec<String>,
}

/// [`CommandRunner`] that records the invocation instead of spawning a process
///
/// Commands without a canned result succeed with no output.
pub struct FakeCommandRunner {
    program: String,
    args: Vec<String>,
    stdin: Vec<u8>,
    stdout: Option<SharedWriter>,
    stderr: Option<SharedWriter>,
    interactive: bool,
    book: Shared<CommandBook>,
}

#[async_trait]
impl CommandRunner for FakeCommandRunner {
    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn set_stdin(&mut self, input: Vec<u8>) {
        self.stdin = input;
    }

    fn set_stdout(&mut self, out: SharedWriter) {
        self.stdout = Some(out);
    }

    fn set_stderr(&mut self, err: SharedWriter) {
        self.stderr = Some(err);
    }

    fn set_interactive(&mut self) {
        self.interactive = true;
    }

    async fn run(&mut self) -> Result<()> {
        let described = self.describe();
        let result = {
            let mut book = lock(&self.book);
            book.invocations.push(described.clone());
            if self.interactive {
                book.attached.push(described.clone());
            }
            book.stdin.push(std::mem::take(&mut self.stdin));
            book.results.get(&described).cloned()
        };
        match result {
            Some(Ok(output)) => {
                if let Some(out) = &self.stdout {
                    write_locked(out, output.as_bytes())?;
                }
                Ok(())
            }
            Some(Err(message)) => {
                if let Some(err) = &self.stderr {
                    write_locked(err, message.as_bytes())?;
                }
                bail!("{} failed: {}", self.program, message)
            }
            None => Ok(()),
        }
    }
}

/// Credentials keyed by `(component, uri)`
pub struct FakeCredentialHelper {
    values: Shared<HashMap<(String, String), String>>,
}

#[async_trait]
impl CredentialHelper for FakeCredentialHelper {
    async fn get(&self, component: &str, uri: &str) -> Result<String> {
        lock(&self.values)
            .get(&(component.to_string(), uri.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("no {} found for {}", component, uri))
    }
}

pub struct FakeIronbankClient {
    shas: Shared<HashMap<String, String>>,
}

#[async_trait]
impl IronbankClient for FakeIronbankClient {
    async fn get_image_sha(&self, image: &str) -> Result<String> {
        lock(&self.shas)
            .get(image)
            .cloned()
            .ok_or_else(|| anyhow!("failed to get image description for {}", image))
    }
}

/// Repository files keyed by `repository:path@branch`
pub struct FakeGitLabClient {
    files: Shared<HashMap<String, Vec<u8>>>,
}

fn file_key(repository: &str, path: &str, branch: &str) -> String {
    format!("{}:{}@{}", repository, path, branch)
}

#[async_trait]
impl GitLabClient for FakeGitLabClient {
    async fn get_file(&self, repository: &str, path: &str, branch: &str) -> Result<Vec<u8>> {
        lock(&self.files)
            .get(&file_key(repository, path, branch))
            .cloned()
            .ok_or_else(|| anyhow!("404 File Not Found: {}/{}", repository, path))
    }
}

#[derive(Default, Clone)]
struct AwsState {
    identity: Option<CallerIdentity>,
    ips: Vec<ClusterIp>,
}

pub struct FakeAwsClient {
    state: Shared<AwsState>,
}

#[async_trait]
impl AwsClient for FakeAwsClient {
    async fn get_identity(&self) -> Result<CallerIdentity> {
        lock(&self.state)
            .identity
            .clone()
            .ok_or_else(|| anyhow!("failed to get caller identity"))
    }

    async fn get_cluster_ips(
        &self,
        username: &str,
        exposure: FilterExposure,
    ) -> Result<Vec<ClusterIp>> {
        let ips: Vec<ClusterIp> = lock(&self.state)
            .ips
            .iter()
            .filter(|ip| match exposure {
                FilterExposure::Public => ip.is_public,
                FilterExposure::Private => !ip.is_public,
                FilterExposure::All => true,
            })
            .cloned()
            .collect();
        if ips.is_empty() {
            bail!("no filtered cluster IPs found for user {}", username);
        }
        Ok(ips)
    }
}

/// In-memory filesystem rooted at a fake home directory
pub struct FakeFileSystem {
    home: PathBuf,
    files: Shared<BTreeMap<PathBuf, Vec<u8>>>,
}

impl Default for FakeFileSystem {
    fn default() -> Self {
        Self {
            home: PathBuf::from("/home/bbctl"),
            files: Arc::default(),
        }
    }
}

impl FakeFileSystem {
    pub fn contents(&self, path: &Path) -> Option<String> {
        lock(&self.files)
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        lock(&self.files).keys().cloned().collect()
    }
}

struct FakeFile {
    path: PathBuf,
    files: Shared<BTreeMap<PathBuf, Vec<u8>>>,
}

impl Write for FakeFile {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        lock(&self.files)
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl FileSystemClient for FakeFileSystem {
    fn user_home_dir(&self) -> Result<PathBuf> {
        Ok(self.home.clone())
    }

    fn create(&self, path: &Path) -> Result<Box<dyn Write + Send>> {
        lock(&self.files).insert(path.to_path_buf(), Vec::new());
        Ok(Box::new(FakeFile {
            path: path.to_path_buf(),
            files: self.files.clone(),
        }))
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.contents(path)
            .with_context(|| format!("error reading file: {}", path.display()))
    }
}

/// [`Factory`] whose clients all share in-memory state
pub struct FakeFactory {
    resolver: RwLock<Arc<Resolver>>,
    streams: IoStreams,
    out: SharedBuffer,
    err: SharedBuffer,
    sink: Arc<MemorySink>,
    failures: Failures,
    cluster: Shared<FakeClusterState>,
    releases: Shared<Vec<Release>>,
    dynamic: Shared<Vec<(GroupVersionResource, DynamicObject)>>,
    flux: Shared<Vec<(FluxKind, DynamicObject)>>,
    virtual_services: Shared<Vec<VirtualService>>,
    exec_outputs: Shared<HashMap<String, String>>,
    executed: Shared<Vec<String>>,
    commands: Shared<CommandBook>,
    credentials: Shared<HashMap<(String, String), String>>,
    shas: Shared<HashMap<String, String>>,
    files: Shared<HashMap<String, Vec<u8>>>,
    aws: Shared<AwsState>,
    filesystem: Arc<FakeFileSystem>,
}

impl Default for FakeFactory {
    fn default() -> Self {
        Self::with_input("")
    }
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory whose input stream serves `input`
    pub fn with_input(input: &str) -> Self {
        let (streams, out, err) = IoStreams::buffered(input);
        Self {
            resolver: RwLock::new(Arc::new(Resolver::isolated())),
            streams,
            out,
            err,
            sink: Arc::new(MemorySink::default()),
            failures: Failures::default(),
            cluster: Arc::default(),
            releases: Arc::default(),
            dynamic: Arc::default(),
            flux: Arc::default(),
            virtual_services: Arc::default(),
            exec_outputs: Arc::default(),
            executed: Arc::default(),
            commands: Arc::default(),
            credentials: Arc::default(),
            shas: Arc::default(),
            files: Arc::default(),
            aws: Arc::default(),
            filesystem: Arc::new(FakeFileSystem::default()),
        }
    }

    /// The resolver currently handed out by [`Factory::get_viper`]
    pub fn resolver(&self) -> Arc<Resolver> {
        self.resolver
            .read()
            .map(|r| r.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Everything written to the output stream so far
    pub fn out(&self) -> String {
        self.out.contents()
    }

    /// Everything written to the error stream so far
    pub fn err(&self) -> String {
        self.err.contents()
    }

    /// The sink behind every logging client without an explicit logger
    pub fn sink(&self) -> &Arc<MemorySink> {
        &self.sink
    }

    pub fn cluster(&self) -> MutexGuard<'_, FakeClusterState> {
        lock(&self.cluster)
    }

    /// A typed cluster client sharing this factory's state
    pub fn k8s(&self) -> FakeK8sClient {
        FakeK8sClient {
            state: self.cluster.clone(),
            failures: self.failures.clone(),
        }
    }

    /// Make `operation` fail with `message`
    ///
    /// Besides the per-client names documented on each fake, the factory itself
    /// honors `get_k8s_client`, `get_dynamic_client`, `get_runtime_client`,
    /// `get_helm_client`, `get_rest_config` and `get_command_executor`.
    pub fn fail(&self, operation: &str, message: &str) {
        lock(&self.failures.0).insert(operation.to_string(), message.to_string());
    }

    pub fn add_release(&self, release: Release) {
        lock(&self.releases).push(release);
    }

    pub fn add_object(&self, gvr: &GroupVersionResource, object: DynamicObject) {
        lock(&self.dynamic).push((gvr.clone(), object));
    }

    pub fn add_flux_object(&self, kind: FluxKind, object: DynamicObject) {
        lock(&self.flux).push((kind, object));
    }

    pub fn add_virtual_service(&self, service: VirtualService) {
        lock(&self.virtual_services).push(service);
    }

    /// Output of `command` run through a pod executor
    pub fn set_exec_output(&self, command: &[&str], output: &str) {
        lock(&self.exec_outputs).insert(command.join(" "), output.to_string());
    }

    /// Commands run through pod executors, space-joined, in order
    pub fn executed(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }

    /// Result of a local command, keyed by its full command line
    pub fn set_command_result(&self, command_line: &str, result: Result<String, String>) {
        lock(&self.commands)
            .results
            .insert(command_line.to_string(), result);
    }

    /// Local command lines run, in order
    pub fn invocations(&self) -> Vec<String> {
        lock(&self.commands).invocations.clone()
    }

    /// Local command lines run attached to the terminal, in order
    pub fn attached_invocations(&self) -> Vec<String> {
        lock(&self.commands).attached.clone()
    }

    /// Stdin handed to each local command, in order
    pub fn command_stdin(&self) -> Vec<Vec<u8>> {
        lock(&self.commands).stdin.clone()
    }

    pub fn set_credential(&self, component: &str, uri: &str, value: &str) {
        lock(&self.credentials).insert(
            (component.to_string(), uri.to_string()),
            value.to_string(),
        );
    }

    pub fn set_image_sha(&self, image: &str, sha: &str) {
        lock(&self.shas).insert(image.to_string(), sha.to_string());
    }

    pub fn set_gitlab_file(&self, repository: &str, path: &str, branch: &str, contents: &str) {
        lock(&self.files).insert(
            file_key(repository, path, branch),
            contents.as_bytes().to_vec(),
        );
    }

    pub fn set_aws(&self, identity: CallerIdentity, ips: Vec<ClusterIp>) {
        *lock(&self.aws) = AwsState {
            identity: Some(identity),
            ips,
        };
    }

    pub fn filesystem(&self) -> &Arc<FakeFileSystem> {
        &self.filesystem
    }
}

#[async_trait]
impl Factory for FakeFactory {
    async fn get_k8s_client(&self) -> Result<Arc<dyn K8sClient>> {
        self.failures.check("get_k8s_client")?;
        Ok(Arc::new(self.k8s()))
    }

    async fn get_dynamic_client(&self) -> Result<Arc<dyn DynamicClient>> {
        self.failures.check("get_dynamic_client")?;
        Ok(Arc::new(FakeDynamicClient {
            objects: self.dynamic.clone(),
            failures: self.failures.clone(),
        }))
    }

    async fn get_runtime_client(&self, scheme: &Arc<Scheme>) -> Result<Arc<dyn RuntimeClient>> {
        self.failures.check("get_runtime_client")?;
        Ok(Arc::new(FakeRuntimeClient {
            scheme: scheme.clone(),
            objects: self.flux.clone(),
            failures: self.failures.clone(),
        }))
    }

    async fn get_helm_client(&self, namespace: &str) -> Result<Arc<dyn HelmClient>> {
        self.failures.check("get_helm_client")?;
        Ok(Arc::new(FakeHelmClient {
            namespace: namespace.to_string(),
            releases: self.releases.clone(),
            failures: self.failures.clone(),
        }))
    }

    async fn get_istio_client(&self, _config: &Arc<kube::Config>) -> Result<Arc<dyn IstioClient>> {
        Ok(Arc::new(FakeIstioClient {
            services: self.virtual_services.clone(),
            failures: self.failures.clone(),
        }))
    }

    async fn get_rest_config(&self) -> Result<Arc<kube::Config>> {
        self.failures.check("get_rest_config")?;
        Ok(Arc::new(kube::Config::new(
            "https://127.0.0.1:6443".parse()?,
        )))
    }

    async fn get_command_executor(
        &self,
        pod: &Pod,
        _container: &str,
        command: &[String],
        stdout: SharedWriter,
        stderr: SharedWriter,
    ) -> Result<Box<dyn CommandExecutor>> {
        self.failures.check("get_command_executor")?;
        if pod.metadata.name.is_none() {
            bail!("pod has no name");
        }
        let command = command.join(" ");
        lock(&self.executed).push(command.clone());
        Ok(Box::new(FakeCommandExecutor {
            command,
            outputs: self.exec_outputs.clone(),
            stdout,
            stderr,
        }))
    }

    fn get_command_wrapper(&self, name: &str, args: &[String]) -> Result<Box<dyn CommandRunner>> {
        Ok(Box::new(FakeCommandRunner {
            program: name.to_string(),
            args: args.to_vec(),
            stdin: Vec::new(),
            stdout: None,
            stderr: None,
            interactive: false,
            book: self.commands.clone(),
        }))
    }

    fn get_credential_helper(&self) -> Result<SharedCredentialHelper> {
        Ok(Arc::new(FakeCredentialHelper {
            values: self.credentials.clone(),
        }))
    }

    fn get_ironbank_client(&self) -> Result<Arc<dyn IronbankClient>> {
        Ok(Arc::new(FakeIronbankClient {
            shas: self.shas.clone(),
        }))
    }

    fn get_gitlab_client(&self) -> Result<Arc<dyn GitLabClient>> {
        Ok(Arc::new(FakeGitLabClient {
            files: self.files.clone(),
        }))
    }

    fn get_aws_client(&self) -> Result<Arc<dyn AwsClient>> {
        Ok(Arc::new(FakeAwsClient {
            state: self.aws.clone(),
        }))
    }

    fn get_config_client(&self) -> Result<ConfigClient> {
        Ok(ConfigClient::new(self.resolver(), self.get_logging_client()?))
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
        let logger = logger
            .cloned()
            .unwrap_or_else(|| self.sink.clone() as Logger);
        Ok(LoggingClient::new(logger))
    }

    fn get_output_client(&self, streams: &IoStreams) -> Result<OutputClient> {
        let config = self.get_config_client()?.get_config()?;
        Ok(OutputClient::new(config.output.format, streams))
    }
}
