//! Preflight checks
//!
//! Four checks run in a fixed order against the target cluster before Big Bang
//! is installed. Each check records the progress lines it printed and resolves
//! to [`CheckStatus::Passed`], [`CheckStatus::Failed`] or
//! [`CheckStatus::Unknown`]; a check that cannot run never stops the next one.
//!
//! The system parameter check reads node settings through a short-lived job:
//! a namespace, an image pull secret and a `sleep` job whose pod the commands
//! are executed in. Once the namespace has been created it is always deleted
//! again, whether or not the job came up.

use crate::config::{GlobalConfiguration, schema::PreflightCheckConfiguration};
use crate::constants::FLUX_NAMESPACE;
use crate::factory::{self, Factory};
use crate::kube::{K8sClient, with_list_timeout};
use crate::output::schemas::{CheckStepOutput, PreflightCheckOutput};
use crate::streams::SharedBuffer;
use anyhow::{Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use k8s_openapi::ByteString;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, LocalObjectReference, Pod, PodSpec, PodTemplateSpec, Secret,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub const PREFLIGHT_SUMMARY_NAME: &str = "Preflight Check Summary";

pub const CHECK_NAMESPACE: &str = "preflight-check";
pub const CHECK_JOB_NAME: &str = "preflightcheck";
pub const CHECK_IMAGE: &str = "registry1.dso.mil/ironbank/redhat/ubi/ubi8-minimal:8.4";
pub const CHECK_IMAGE_PULL_SECRET: &str = "registry-secret";

const DEFAULT_STORAGE_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";
const METRICS_API_GROUP: &str = "metrics.k8s.io";
const SUPPORTED_METRICS_VERSIONS: &[&str] = &["v1beta1"];

pub const FLUX_CONTROLLERS: &[&str] = &[
    "helm-controller",
    "kustomize-controller",
    "source-controller",
    "notification-controller",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Failed,
    /// The check could not be carried out
    Unknown,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Passed => "Passed",
            CheckStatus::Failed => "Failed",
            CheckStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    MetricsServer,
    DefaultStorageClass,
    FluxController,
    SystemParameters,
}

/// One step of the preflight run
#[derive(Debug, Clone, Copy)]
pub struct PreflightCheck {
    pub desc: &'static str,
    pub kind: CheckKind,
    pub failure_message: &'static str,
    pub success_message: &'static str,
}

impl PreflightCheck {
    /// The summary message for `status`
    pub fn message(&self, status: CheckStatus) -> String {
        match status {
            CheckStatus::Passed => self.success_message.to_string(),
            CheckStatus::Failed => self.failure_message.to_string(),
            CheckStatus::Unknown => {
                format!("System Error - Execute command again to run {}", self.desc)
            }
        }
    }
}

pub const PREFLIGHT_CHECKS: &[PreflightCheck] = &[
    PreflightCheck {
        desc: "Metrics Server Check",
        kind: CheckKind::MetricsServer,
        failure_message: "Metrics Server needs to be running in the cluster for Horizontal Pod Autoscaler to work.",
        success_message: "Metrics Server is running in the cluster for Horizontal Pod Autoscaler to work.",
    },
    PreflightCheck {
        desc: "Default Storage Class Check",
        kind: CheckKind::DefaultStorageClass,
        failure_message: "A Default Storage Class must be defined for Stateful workloads.\nIf you don't have a need for Persistent Volumes, this error can be ignored.",
        success_message: "Default Storage Class exists for Stateful workloads to work.",
    },
    PreflightCheck {
        desc: "Flux Controller Check",
        kind: CheckKind::FluxController,
        failure_message: "Flux Controller is required for successful installation of Big Bang packages using GitOps.",
        success_message: "Flux Controller is running and allows for successful installation of Big Bang packages using GitOps.",
    },
    PreflightCheck {
        desc: "System Parameters Check",
        kind: CheckKind::SystemParameters,
        failure_message: concat!(
            "Some packages installed by Big Bang require system parameters to be equal or greater than the recommended value.\n",
            "You can ignore this error if not planning to install packages that failed the check.\n",
            "For more information refer to https://repo1.dso.mil/big-bang/bigbang/-/blob/master/docs/prerequisites/os-preconfiguration.md"
        ),
        success_message: concat!(
            "System parameters determined to be equal or greater than the recommended value.\n",
            "This will allow for successful installation of packages that passed the check.\n",
            "For more information refer to https://repo1.dso.mil/big-bang/bigbang/-/blob/master/docs/prerequisites/os-preconfiguration.md"
        ),
    },
];

/// A node setting and the minimum each package needs
#[derive(Debug, Clone, Copy)]
pub struct SystemParameter {
    pub name: &'static str,
    pub command: &'static [&'static str],
    pub description: &'static str,
    /// Package name to minimum value, evaluated in this order
    pub thresholds: &'static [(&'static str, i64)],
}

pub const SYSTEM_PARAMETERS: &[SystemParameter] = &[
    SystemParameter {
        name: "vm.max_map_count",
        command: &["cat", "/proc/sys/vm/max_map_count"],
        description: "max number of memory map areas",
        thresholds: &[("ECK", 262144), ("Sonarqube", 524288)],
    },
    SystemParameter {
        name: "fs.file-max",
        command: &["cat", "/proc/sys/fs/file-max"],
        description: "max number of file handles",
        thresholds: &[("Sonarqube", 131072)],
    },
    SystemParameter {
        name: "ulimit -n",
        command: &["ulimit", "-n"],
        description: "max number of open files",
        thresholds: &[("Sonarqube", 131072)],
    },
    SystemParameter {
        name: "ulimit -u",
        command: &["ulimit", "-u"],
        description: "max number of user processes",
        thresholds: &[("Sonarqube", 8192)],
    },
];

/// Lines printed by the check in progress
#[derive(Debug, Default)]
struct Progress {
    lines: Vec<String>,
}

impl Progress {
    fn line(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(target: "bbctl::preflight", "{}", line);
        self.lines.push(line);
    }

    fn error(&mut self, err: &anyhow::Error) {
        tracing::warn!(target: "bbctl::preflight", "{:#}", err);
        self.lines.push(format!("{:#}", err));
    }
}

/// Run every check in [`PREFLIGHT_CHECKS`] and collect the summary
pub async fn run_preflight_checks(factory: &dyn Factory) -> Result<PreflightCheckOutput> {
    run_checks(factory, PREFLIGHT_CHECKS).await
}

pub async fn run_checks(
    factory: &dyn Factory,
    checks: &[PreflightCheck],
) -> Result<PreflightCheckOutput> {
    let config = factory::config_client(factory)?.get_config()?;

    let mut steps = Vec::with_capacity(checks.len());
    for check in checks {
        let mut progress = Progress::default();
        let status = run_check(factory, &config, check.kind, &mut progress).await;
        steps.push(CheckStepOutput {
            name: check.desc.to_string(),
            output: progress.lines,
            status: status.to_string(),
            message: check.message(status),
        });
    }

    Ok(PreflightCheckOutput::new(PREFLIGHT_SUMMARY_NAME, steps))
}

async fn run_check(
    factory: &dyn Factory,
    config: &GlobalConfiguration,
    kind: CheckKind,
    progress: &mut Progress,
) -> CheckStatus {
    let k8s = match factory.get_k8s_client().await {
        Ok(k8s) => k8s,
        Err(err) => {
            progress.error(&err);
            return CheckStatus::Unknown;
        }
    };
    let result = match kind {
        CheckKind::MetricsServer => check_metrics_server(k8s.as_ref(), progress).await,
        CheckKind::DefaultStorageClass => {
            check_default_storage_class(k8s.as_ref(), progress).await
        }
        CheckKind::FluxController => check_flux_controller(k8s.as_ref(), progress).await,
        CheckKind::SystemParameters => {
            check_system_parameters(factory, k8s.as_ref(), &config.preflight_check, progress)
                .await
        }
    };
    result.unwrap_or_else(|err| {
        progress.error(&err);
        CheckStatus::Unknown
    })
}

async fn check_metrics_server(k8s: &dyn K8sClient, progress: &mut Progress) -> Result<CheckStatus> {
    progress.line("Checking metrics server...");
    let groups = with_list_timeout(k8s.api_groups()).await?;
    let available = groups
        .groups
        .iter()
        .filter(|group| group.name == METRICS_API_GROUP)
        .flat_map(|group| &group.versions)
        .any(|v| SUPPORTED_METRICS_VERSIONS.contains(&v.version.as_str()));

    if !available {
        progress.line("Check Failed - Metrics API not available.");
        return Ok(CheckStatus::Failed);
    }
    progress.line("Check Passed - Metrics API available.");
    Ok(CheckStatus::Passed)
}

async fn check_default_storage_class(
    k8s: &dyn K8sClient,
    progress: &mut Progress,
) -> Result<CheckStatus> {
    progress.line("Checking default storage class...");
    let classes = with_list_timeout(k8s.list_storage_classes()).await?;
    let defaults: Vec<String> = classes
        .iter()
        .filter(|sc| {
            sc.metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(DEFAULT_STORAGE_CLASS_ANNOTATION))
                .is_some_and(|v| v == "true")
        })
        .map(|sc| sc.metadata.name.clone().unwrap_or_default())
        .collect();

    match defaults.as_slice() {
        [] => {
            progress.line("Check Failed - Default storage class not found.");
            Ok(CheckStatus::Failed)
        }
        [name] => {
            progress.line(format!("Check Passed - Default storage class {} found.", name));
            Ok(CheckStatus::Passed)
        }
        names => {
            progress.line(format!(
                "Check Failed - Multiple default storage classes found: {}.",
                names.join(", ")
            ));
            Ok(CheckStatus::Failed)
        }
    }
}

async fn check_flux_controller(k8s: &dyn K8sClient, progress: &mut Progress) -> Result<CheckStatus> {
    progress.line("Checking flux installation...");
    let mut status = CheckStatus::Passed;
    for controller in FLUX_CONTROLLERS {
        if k8s.get_deployment(FLUX_NAMESPACE, controller).await?.is_none() {
            progress.line(format!(
                "Check Failed - flux {} deployment not found in {} namespace.",
                controller, FLUX_NAMESPACE
            ));
            status = CheckStatus::Failed;
            continue;
        }

        let selector = format!("app={}", controller);
        let pods = with_list_timeout(k8s.list_pods(Some(FLUX_NAMESPACE), Some(&selector))).await?;
        if pods.is_empty() {
            progress.line(format!(
                "Check Failed - flux {} pod not found in {} namespace.",
                controller, FLUX_NAMESPACE
            ));
            status = CheckStatus::Failed;
        } else if pods.iter().all(|pod| pod_phase(pod) == Some("Running")) {
            progress.line(format!("Check Passed - flux {} pod running.", controller));
        } else {
            progress.line(format!(
                "Check Failed - flux {} pod not in running state.",
                controller
            ));
            status = CheckStatus::Failed;
        }
    }
    Ok(status)
}

fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}

async fn check_system_parameters(
    factory: &dyn Factory,
    k8s: &dyn K8sClient,
    settings: &PreflightCheckConfiguration,
    progress: &mut Progress,
) -> Result<CheckStatus> {
    let job = CheckJob { k8s, settings };
    job.create_namespace(progress).await?;

    let status = match job.start(progress).await {
        Ok(pod) => measure_parameters(factory, &pod, progress).await,
        Err(err) => {
            progress.error(&err);
            CheckStatus::Unknown
        }
    };

    job.delete(progress).await?;
    Ok(status)
}

async fn measure_parameters(factory: &dyn Factory, pod: &Pod, progress: &mut Progress) -> CheckStatus {
    progress.line("Checking system parameters...");
    let mut failed = false;
    let mut unknown = false;
    for param in SYSTEM_PARAMETERS {
        progress.line(format!("Checking {}", param.name));
        let value = match exec_command(factory, pod, param.command).await {
            Ok(value) => value,
            Err(err) => {
                progress.error(&err);
                unknown = true;
                continue;
            }
        };
        for (package, threshold) in param.thresholds {
            if !check_system_parameter(progress, package, param.name, &value, *threshold) {
                failed = true;
            }
        }
    }

    if failed {
        CheckStatus::Failed
    } else if unknown {
        CheckStatus::Unknown
    } else {
        CheckStatus::Passed
    }
}

/// Compare one measured value against a package minimum
///
/// `unlimited` always passes; a value that is not an integer is reported as
/// undetermined and does not pass.
fn check_system_parameter(
    progress: &mut Progress,
    package: &str,
    param: &str,
    value: &str,
    threshold: i64,
) -> bool {
    progress.line(format!("{} = {}", param, value));
    if value == "unlimited" {
        progress.line(format!(
            "Check Passed - {} {} is suitable for {} to work.",
            param, value, package
        ));
        return true;
    }

    match value.parse::<i64>() {
        Ok(val) if val < threshold => {
            progress.line(format!(
                "Check Failed - {} needs to be at least {} for {} to work.",
                param, threshold, package
            ));
            false
        }
        Ok(val) => {
            progress.line(format!(
                "Check Passed - {} {} is suitable for {} to work.",
                param, val, package
            ));
            true
        }
        Err(_) => {
            progress.line(format!(
                "Check Undetermined - {} needs to be at least {} for {} to work. Current value {}",
                param, threshold, package, value
            ));
            false
        }
    }
}

/// Run `command` in the check pod and return its trimmed stdout
async fn exec_command(factory: &dyn Factory, pod: &Pod, command: &[&str]) -> Result<String> {
    let stdout = SharedBuffer::default();
    let stderr = SharedBuffer::default();
    let command: Vec<String> = command.iter().map(|s| s.to_string()).collect();
    let mut executor = factory
        .get_command_executor(pod, "", &command, stdout.writer(), stderr.writer())
        .await?;
    if let Err(err) = executor.stream().await {
        let detail = stderr.contents();
        return Err(match detail.trim() {
            "" => err,
            detail => err.context(detail.to_string()),
        });
    }
    Ok(stdout.contents().replace('\n', "").trim().to_string())
}

/// Parameters of the check job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDesc {
    pub name: String,
    pub container_name: String,
    pub container_image: String,
    pub image_pull_secret: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub ttl_seconds_on_finish: i32,
}

impl JobDesc {
    pub fn system_check() -> Self {
        Self {
            name: CHECK_JOB_NAME.to_string(),
            container_name: "executor".to_string(),
            container_image: CHECK_IMAGE.to_string(),
            image_pull_secret: CHECK_IMAGE_PULL_SECRET.to_string(),
            command: vec!["/bin/sleep".to_string()],
            args: vec!["30".to_string()],
            ttl_seconds_on_finish: 0,
        }
    }

    pub fn to_job(&self, namespace: &str) -> Job {
        let mut job = Job {
            spec: Some(JobSpec {
                ttl_seconds_after_finished: Some(self.ttl_seconds_on_finish),
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: self.container_name.clone(),
                            image: Some(self.container_image.clone()),
                            command: Some(self.command.clone()),
                            args: Some(self.args.clone()),
                            ..Default::default()
                        }],
                        image_pull_secrets: Some(vec![LocalObjectReference {
                            name: self.image_pull_secret.clone(),
                        }]),
                        restart_policy: Some("Never".to_string()),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        };
        job.metadata.name = Some(self.name.clone());
        job.metadata.namespace = Some(namespace.to_string());
        job
    }
}

/// A `kubernetes.io/dockerconfigjson` secret for one registry
pub fn registry_secret(
    namespace: &str,
    name: &str,
    server: &str,
    username: &str,
    password: &str,
) -> Result<Secret> {
    let auth = STANDARD.encode(format!("{}:{}", username, password));
    let config = json!({
        "auths": {
            server: {
                "username": username,
                "password": password,
                "auth": auth,
            }
        }
    });
    let mut secret = Secret {
        type_: Some("kubernetes.io/dockerconfigjson".to_string()),
        data: Some(BTreeMap::from([(
            ".dockerconfigjson".to_string(),
            ByteString(serde_json::to_vec(&config)?),
        )])),
        ..Default::default()
    };
    secret.metadata.name = Some(name.to_string());
    secret.metadata.namespace = Some(namespace.to_string());
    Ok(secret)
}

struct CheckJob<'a> {
    k8s: &'a dyn K8sClient,
    settings: &'a PreflightCheckConfiguration,
}

impl CheckJob<'_> {
    fn delay(&self) -> Duration {
        Duration::from_secs(self.settings.retrydelay)
    }

    /// Create the check namespace, replacing one left behind by an earlier run
    async fn create_namespace(&self, progress: &mut Progress) -> Result<()> {
        progress.line("Creating namespace for command execution...");
        if self.k8s.get_namespace(CHECK_NAMESPACE).await?.is_none() {
            self.k8s.create_namespace(CHECK_NAMESPACE).await?;
            return Ok(());
        }

        progress.line(format!(
            "Namespace {} already exists... It will be recreated",
            CHECK_NAMESPACE
        ));
        self.k8s.delete_namespace(CHECK_NAMESPACE).await?;

        // deletion finishes asynchronously; keep trying until it has
        let mut last_err = None;
        for _ in 0..=self.settings.retrycount {
            match self.k8s.create_namespace(CHECK_NAMESPACE).await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    last_err = Some(err);
                    tokio::time::sleep(self.delay()).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("namespace {} was not recreated", CHECK_NAMESPACE)))
    }

    /// Create the pull secret and job, then wait for a running job pod
    async fn start(&self, progress: &mut Progress) -> Result<Pod> {
        progress.line("Creating registry secret for command execution...");
        let settings = self.settings;
        if settings.registryserver.is_empty()
            || settings.registryusername.is_empty()
            || settings.registrypassword.is_empty()
        {
            bail!(
                "\n***Invalid registry credentials provided. Ensure the registry server, username, and password values are all set!***"
            );
        }
        let secret = registry_secret(
            CHECK_NAMESPACE,
            CHECK_IMAGE_PULL_SECRET,
            &settings.registryserver,
            &settings.registryusername,
            &settings.registrypassword,
        )?;
        self.k8s.create_secret(CHECK_NAMESPACE, &secret).await?;

        progress.line("Creating job for command execution...");
        let desc = JobDesc::system_check();
        let job = self
            .k8s
            .create_job(CHECK_NAMESPACE, &desc.to_job(CHECK_NAMESPACE))
            .await?;
        let job_name = job.metadata.name.unwrap_or(desc.name);

        progress.line(format!("Waiting for job {} to be ready...", job_name));
        let selector = format!("job-name={}", job_name);
        for _ in 0..settings.retrycount {
            let pods = self
                .k8s
                .list_pods(Some(CHECK_NAMESPACE), Some(&selector))
                .await?;
            if let Some(pod) = pods.into_iter().find(|p| pod_phase(p) == Some("Running")) {
                return Ok(pod);
            }
            tokio::time::sleep(self.delay()).await;
        }
        bail!("timeout waiting for command execution job to be ready")
    }

    async fn delete(&self, progress: &mut Progress) -> Result<()> {
        progress.line("Deleting namespace for command execution...");
        self.k8s.delete_namespace(CHECK_NAMESPACE).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeFactory;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::{Namespace, PodStatus};
    use k8s_openapi::api::storage::v1::StorageClass;

    fn factory_with_registry() -> FakeFactory {
        let factory = FakeFactory::new();
        let resolver = factory.resolver();
        resolver.bind_flag("registryserver", "", Some("registry1.dso.mil"));
        resolver.bind_flag("registryusername", "", Some("user"));
        resolver.bind_flag("registrypassword", "", Some("pass"));
        resolver.bind_flag("retrycount", 5, Some(2));
        resolver.bind_flag("retrydelay", 5, Some(0));
        factory
    }

    fn step<'a>(output: &'a PreflightCheckOutput, name: &str) -> &'a CheckStepOutput {
        output
            .steps
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("no step {}", name))
    }

    fn system_parameter_check() -> [PreflightCheck; 1] {
        [PREFLIGHT_CHECKS[3]]
    }

    fn seed_sysctls(factory: &FakeFactory, max_map_count: &str) {
        factory.cluster().job_pod_phase = Some("Running".to_string());
        factory.set_exec_output(&["cat", "/proc/sys/vm/max_map_count"], max_map_count);
        factory.set_exec_output(&["cat", "/proc/sys/fs/file-max"], "9223372036854775807\n");
        factory.set_exec_output(&["ulimit", "-n"], "unlimited\n");
        factory.set_exec_output(&["ulimit", "-u"], "unlimited\n");
    }

    #[tokio::test]
    async fn test_low_max_map_count_fails_for_eck() {
        let factory = factory_with_registry();
        seed_sysctls(&factory, "262100\n");

        let output = run_checks(&factory, &system_parameter_check()).await.unwrap();
        let params = step(&output, "System Parameters Check");
        assert_eq!(params.status, "Failed");
        assert!(params.output.contains(
            &"Check Failed - vm.max_map_count needs to be at least 262144 for ECK to work.".to_string()
        ));
        assert!(params.output.contains(
            &"Check Passed - ulimit -n unlimited is suitable for Sonarqube to work.".to_string()
        ));
        assert_eq!(output.overall_status, "Failed");
        assert_eq!(factory.cluster().deleted_namespaces, vec![CHECK_NAMESPACE]);
        assert!(!factory.cluster().has_namespace(CHECK_NAMESPACE));
    }

    #[tokio::test]
    async fn test_sufficient_parameters_pass() {
        let factory = factory_with_registry();
        seed_sysctls(&factory, "524288");

        let output = run_checks(&factory, &system_parameter_check()).await.unwrap();
        let params = step(&output, "System Parameters Check");
        assert_eq!(params.status, "Passed");
        assert_eq!(params.message, PREFLIGHT_CHECKS[3].success_message);
        assert_eq!(
            factory.executed(),
            vec![
                "cat /proc/sys/vm/max_map_count",
                "cat /proc/sys/fs/file-max",
                "ulimit -n",
                "ulimit -u",
            ]
        );
    }

    #[tokio::test]
    async fn test_non_integer_value_is_undetermined() {
        let factory = factory_with_registry();
        seed_sysctls(&factory, "lots");

        let output = run_checks(&factory, &system_parameter_check()).await.unwrap();
        let params = step(&output, "System Parameters Check");
        assert_eq!(params.status, "Failed");
        assert!(params.output.contains(
            &"Check Undetermined - vm.max_map_count needs to be at least 262144 for ECK to work. Current value lots"
                .to_string()
        ));
    }

    #[tokio::test]
    async fn test_job_timeout_is_unknown_and_cleans_up() {
        let factory = factory_with_registry();
        factory.cluster().job_pod_phase = Some("Pending".to_string());

        let output = run_checks(&factory, &system_parameter_check()).await.unwrap();
        let params = step(&output, "System Parameters Check");
        assert_eq!(params.status, "Unknown");
        assert_eq!(
            params.message,
            "System Error - Execute command again to run System Parameters Check"
        );
        assert!(params
            .output
            .contains(&"timeout waiting for command execution job to be ready".to_string()));
        assert_eq!(
            params.output.last().map(String::as_str),
            Some("Deleting namespace for command execution...")
        );
        assert_eq!(factory.cluster().deleted_namespaces, vec![CHECK_NAMESPACE]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_wait_takes_ten_attempts_by_default() {
        let factory = FakeFactory::new();
        let resolver = factory.resolver();
        resolver.bind_flag("registryserver", "", Some("registry1.dso.mil"));
        resolver.bind_flag("registryusername", "", Some("user"));
        resolver.bind_flag("registrypassword", "", Some("pass"));
        factory.cluster().job_pod_phase = Some("Pending".to_string());

        let started = tokio::time::Instant::now();
        let output = run_checks(&factory, &system_parameter_check()).await.unwrap();

        assert_eq!(step(&output, "System Parameters Check").status, "Unknown");
        assert_eq!(started.elapsed(), Duration::from_secs(50));
    }

    #[tokio::test]
    async fn test_missing_registry_credentials_still_cleans_up() {
        let factory = FakeFactory::new();
        factory.resolver().bind_flag("retrydelay", 5, Some(0));

        let output = run_checks(&factory, &system_parameter_check()).await.unwrap();
        let params = step(&output, "System Parameters Check");
        assert_eq!(params.status, "Unknown");
        assert!(params
            .output
            .iter()
            .any(|l| l.contains("Invalid registry credentials provided")));
        assert!(factory.cluster().jobs.is_empty());
        assert_eq!(factory.cluster().deleted_namespaces, vec![CHECK_NAMESPACE]);
    }

    #[tokio::test]
    async fn test_existing_namespace_is_recreated() {
        let factory = factory_with_registry();
        seed_sysctls(&factory, "262144");
        let mut leftover = Namespace::default();
        leftover.metadata.name = Some(CHECK_NAMESPACE.to_string());
        factory.cluster().namespaces.push(leftover);

        let output = run_checks(&factory, &system_parameter_check()).await.unwrap();
        let params = step(&output, "System Parameters Check");
        assert_eq!(
            params.output[1],
            "Namespace preflight-check already exists... It will be recreated"
        );
        assert_eq!(params.status, "Passed");
        assert_eq!(
            factory.cluster().deleted_namespaces,
            vec![CHECK_NAMESPACE, CHECK_NAMESPACE]
        );
    }

    #[tokio::test]
    async fn test_exec_failure_is_unknown() {
        let factory = factory_with_registry();
        seed_sysctls(&factory, "262144");
        factory.fail("get_command_executor", "exec not permitted");

        let output = run_checks(&factory, &system_parameter_check()).await.unwrap();
        assert_eq!(step(&output, "System Parameters Check").status, "Unknown");
    }

    #[tokio::test]
    async fn test_cluster_checks() {
        let factory = factory_with_registry();
        {
            let mut cluster = factory.cluster();
            cluster.add_api_group("metrics.k8s.io", &["v1beta1"]);

            let mut sc = StorageClass::default();
            sc.metadata.name = Some("local-path".to_string());
            sc.metadata.annotations = Some(BTreeMap::from([(
                DEFAULT_STORAGE_CLASS_ANNOTATION.to_string(),
                "true".to_string(),
            )]));
            cluster.storage_classes.push(sc);

            for controller in FLUX_CONTROLLERS {
                let mut deploy = Deployment::default();
                deploy.metadata.name = Some(controller.to_string());
                deploy.metadata.namespace = Some(FLUX_NAMESPACE.to_string());
                cluster.deployments.push(deploy);

                let phase = if *controller == "source-controller" { "Pending" } else { "Running" };
                let mut pod = Pod {
                    status: Some(PodStatus {
                        phase: Some(phase.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                };
                pod.metadata.name = Some(format!("{}-abc", controller));
                pod.metadata.namespace = Some(FLUX_NAMESPACE.to_string());
                pod.metadata.labels =
                    Some(BTreeMap::from([("app".to_string(), controller.to_string())]));
                cluster.pods.push(pod);
            }
        }

        let output = run_checks(&factory, &PREFLIGHT_CHECKS[..3]).await.unwrap();
        assert_eq!(step(&output, "Metrics Server Check").status, "Passed");
        let storage = step(&output, "Default Storage Class Check");
        assert_eq!(storage.status, "Passed");
        assert_eq!(storage.output[1], "Check Passed - Default storage class local-path found.");

        let flux = step(&output, "Flux Controller Check");
        assert_eq!(flux.status, "Failed");
        assert!(flux
            .output
            .contains(&"Check Failed - flux source-controller pod not in running state.".to_string()));
        assert!(flux
            .output
            .contains(&"Check Passed - flux helm-controller pod running.".to_string()));
    }

    #[tokio::test]
    async fn test_list_failure_does_not_stop_later_checks() {
        let factory = factory_with_registry();
        factory.fail("api_groups", "discovery unavailable");

        let output = run_checks(&factory, &PREFLIGHT_CHECKS[..2]).await.unwrap();
        assert_eq!(step(&output, "Metrics Server Check").status, "Unknown");
        assert_eq!(step(&output, "Default Storage Class Check").status, "Failed");
    }

    #[test]
    fn test_registry_secret_payload() {
        let secret = registry_secret("ns", "registry-secret", "registry1.dso.mil", "user", "pass")
            .unwrap();
        assert_eq!(secret.type_.as_deref(), Some("kubernetes.io/dockerconfigjson"));
        let data = secret.data.unwrap();
        let payload: serde_json::Value =
            serde_json::from_slice(&data[".dockerconfigjson"].0).unwrap();
        assert_eq!(
            payload["auths"]["registry1.dso.mil"]["auth"],
            STANDARD.encode("user:pass")
        );
    }

    #[test]
    fn test_check_job_spec() {
        let job = JobDesc::system_check().to_job(CHECK_NAMESPACE);
        let spec = job.spec.unwrap();
        assert_eq!(spec.ttl_seconds_after_finished, Some(0));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.containers[0].image.as_deref(), Some(CHECK_IMAGE));
        assert_eq!(
            pod.image_pull_secrets.unwrap()[0].name,
            CHECK_IMAGE_PULL_SECRET
        );
    }
}
