//! Cluster status report
//!
//! Collects one [`CheckStatusOutput`] per group, always in the same order: the
//! Big Bang Helm release, pods, StatefulSets, Deployments, DaemonSets, then the
//! Flux HelmReleases, GitRepositories and Kustomizations. A group whose list
//! call fails reports the error as its only line; the rest of the report is
//! still produced.

use crate::constants::{BIG_BANG_HELM_RELEASE_NAME, BIG_BANG_NAMESPACE};
use crate::error::{BbctlError, is_kind};
use crate::factory::Factory;
use crate::helm::HelmClient;
use crate::kube::{FluxKind, K8sClient, RuntimeClient, Scheme, nested_value, with_list_timeout};
use crate::output::schemas::{CheckStatusOutput, StatusOutput};
use anyhow::Result;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use kube::core::DynamicObject;
use serde_json::Value;
use std::sync::Arc;

pub const STATUS_REPORT_NAME: &str = "Big Bang Status";

/// A resource that is not ready, with what to run next
#[derive(Debug, Clone, PartialEq, Eq)]
struct NotReady {
    namespace: String,
    name: String,
    status: String,
    hint: String,
}

impl NotReady {
    fn lines(&self) -> [String; 2] {
        [
            format!(
                "namespace: {}, name: {}, status: {}",
                self.namespace, self.name, self.status
            ),
            format!("  hint: {}", self.hint),
        ]
    }
}

fn describe_hint(kind: &str, namespace: &str, name: &str) -> String {
    format!("kubectl describe {} {} -n {}", kind, name, namespace)
}

fn reconcile_hint(kind: FluxKind, namespace: &str, name: &str) -> String {
    format!(
        "flux reconcile {} {} -n {} --with-source",
        kind.flux_noun(),
        name,
        namespace
    )
}

/// Render a group: `empty` when nothing exists, `ready` when nothing is
/// failing, otherwise the header followed by every failing item
fn summarize(
    total: usize,
    failing: Vec<NotReady>,
    empty: Option<&str>,
    ready: &str,
    header: impl FnOnce(usize) -> String,
) -> Vec<String> {
    if total == 0
        && let Some(empty) = empty
    {
        return vec![empty.to_string()];
    }
    if failing.is_empty() {
        return vec![ready.to_string()];
    }
    let mut lines = vec![header(failing.len())];
    lines.extend(failing.iter().flat_map(NotReady::lines));
    lines
}

fn error_lines(err: anyhow::Error) -> Vec<String> {
    vec![format!("{:#}", err)]
}

/// Run every status group and collect the report
pub async fn get_status(factory: &dyn Factory) -> Result<StatusOutput> {
    let k8s = factory.get_k8s_client().await?;
    let scheme = Arc::new(Scheme::flux());
    let flux = factory.get_runtime_client(&scheme).await?;
    let helm = factory.get_helm_client(BIG_BANG_NAMESPACE).await?;

    let statuses = vec![
        CheckStatusOutput::new("Big Bang Helm Release", big_bang_status(helm.as_ref()).await),
        CheckStatusOutput::new("Pods", pod_status(k8s.as_ref()).await),
        CheckStatusOutput::new("StatefulSets", stateful_set_status(k8s.as_ref()).await),
        CheckStatusOutput::new("Deployments", deployment_status(k8s.as_ref()).await),
        CheckStatusOutput::new("DaemonSets", daemon_set_status(k8s.as_ref()).await),
        CheckStatusOutput::new(
            "Flux HelmReleases",
            flux_status(flux.as_ref(), FluxKind::HelmRelease).await,
        ),
        CheckStatusOutput::new(
            "Flux GitRepositories",
            flux_status(flux.as_ref(), FluxKind::GitRepository).await,
        ),
        CheckStatusOutput::new(
            "Flux Kustomizations",
            flux_status(flux.as_ref(), FluxKind::Kustomization).await,
        ),
    ];

    Ok(StatusOutput {
        name: STATUS_REPORT_NAME.to_string(),
        statuses,
    })
}

pub async fn big_bang_status(helm: &dyn HelmClient) -> Vec<String> {
    match helm.get_release(BIG_BANG_HELM_RELEASE_NAME).await {
        Ok(release) => vec![format!(
            "Found {} release version {} status: {}",
            release.chart.metadata.name, release.chart.metadata.version, release.info.status
        )],
        Err(err) if is_kind(&err, &BbctlError::ReleaseNotFound) => {
            vec!["No Big Bang release was found.".to_string()]
        }
        Err(err) => {
            tracing::debug!("big bang release lookup failed: {:#}", err);
            vec![format!("Error getting Big Bang release: {:#}", err)]
        }
    }
}

/// Why a pod is not ready, if it is not
///
/// Running pods are judged by their containers, every other phase except
/// Succeeded by its init containers. A CrashLoopBackOff reason sticks once
/// seen; a not-ready container without a waiting reason reports `error`.
pub fn pod_not_ready_reason(pod: &Pod) -> Option<String> {
    let status = pod.status.as_ref()?;
    let (statuses, prefix): (&[ContainerStatus], &str) = match status.phase.as_deref() {
        Some("Succeeded") => return None,
        Some("Running") => (status.container_statuses.as_deref().unwrap_or_default(), ""),
        _ => (
            status.init_container_statuses.as_deref().unwrap_or_default(),
            "init:",
        ),
    };

    let crash_loop = format!("{}CrashLoopBackOff", prefix);
    let mut ready = true;
    let mut reason = String::new();
    for container in statuses.iter().filter(|c| !c.ready) {
        ready = false;
        let waiting = container
            .state
            .as_ref()
            .and_then(|state| state.waiting.as_ref());
        if let Some(waiting) = waiting
            && reason != crash_loop
        {
            reason = format!("{}{}", prefix, waiting.reason.clone().unwrap_or_default());
        }
    }

    if ready {
        return None;
    }
    if reason.is_empty() {
        reason = "error".to_string();
    }
    Some(reason)
}

pub async fn pod_status(k8s: &dyn K8sClient) -> Vec<String> {
    let pods = match with_list_timeout(k8s.list_pods(None, None)).await {
        Ok(pods) => pods,
        Err(err) => return error_lines(err),
    };
    let failing = pods
        .iter()
        .filter_map(|pod| {
            let status = pod_not_ready_reason(pod)?;
            let namespace = pod.metadata.namespace.clone().unwrap_or_default();
            let name = pod.metadata.name.clone().unwrap_or_default();
            Some(NotReady {
                hint: describe_hint("pod", &namespace, &name),
                namespace,
                name,
                status,
            })
        })
        .collect();
    summarize(pods.len(), failing, None, "All pods are ready.", |n| {
        format!("There are {} pods that are not ready:", n)
    })
}

/// Ready/desired replica counts as a not-ready record, when short
fn replica_shortfall(
    kind: &str,
    namespace: Option<&String>,
    name: Option<&String>,
    ready: i32,
    desired: i32,
    label: &str,
) -> Option<NotReady> {
    if ready >= desired {
        return None;
    }
    let namespace = namespace.cloned().unwrap_or_default();
    let name = name.cloned().unwrap_or_default();
    Some(NotReady {
        hint: describe_hint(kind, &namespace, &name),
        namespace,
        name,
        status: format!("{} {}/{}", label, ready, desired),
    })
}

pub async fn stateful_set_status(k8s: &dyn K8sClient) -> Vec<String> {
    let items = match with_list_timeout(k8s.list_stateful_sets(None)).await {
        Ok(items) => items,
        Err(err) => return error_lines(err),
    };
    let failing = items
        .iter()
        .filter_map(|sts| {
            let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            let ready = sts.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
            replica_shortfall(
                "statefulset",
                sts.metadata.namespace.as_ref(),
                sts.metadata.name.as_ref(),
                ready,
                desired,
                "Not Ready",
            )
        })
        .collect();
    summarize(
        items.len(),
        failing,
        Some("No StatefulSets were found."),
        "All StatefulSets are ready.",
        |n| format!("There are {} StatefulSets that are not ready:", n),
    )
}

pub async fn deployment_status(k8s: &dyn K8sClient) -> Vec<String> {
    let items = match with_list_timeout(k8s.list_deployments(None)).await {
        Ok(items) => items,
        Err(err) => return error_lines(err),
    };
    let failing = items
        .iter()
        .filter_map(|deploy| {
            let desired = deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            let ready = deploy
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0);
            replica_shortfall(
                "deployment",
                deploy.metadata.namespace.as_ref(),
                deploy.metadata.name.as_ref(),
                ready,
                desired,
                "Not Ready",
            )
        })
        .collect();
    summarize(
        items.len(),
        failing,
        Some("No Deployments were found."),
        "All Deployments are ready.",
        |n| format!("There are {} k8s Deployments that are not ready:", n),
    )
}

pub async fn daemon_set_status(k8s: &dyn K8sClient) -> Vec<String> {
    let items = match with_list_timeout(k8s.list_daemon_sets(None)).await {
        Ok(items) => items,
        Err(err) => return error_lines(err),
    };
    let failing = items
        .iter()
        .filter_map(|ds| {
            let status = ds.status.as_ref();
            let desired = status.map(|s| s.desired_number_scheduled).unwrap_or(0);
            let available = status.and_then(|s| s.number_available).unwrap_or(0);
            replica_shortfall(
                "daemonset",
                ds.metadata.namespace.as_ref(),
                ds.metadata.name.as_ref(),
                available,
                desired,
                "Not Available",
            )
        })
        .collect();
    summarize(
        items.len(),
        failing,
        Some("No Daemonsets were found."),
        "All Daemonsets are available.",
        |n| format!("There are {} DaemonSets that are not available:", n),
    )
}

/// Message of the `Ready` condition, if any
fn ready_message(obj: &DynamicObject) -> String {
    nested_value(&obj.data, &["status", "conditions"])
        .and_then(Value::as_array)
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.get("type").and_then(Value::as_str) == Some("Ready"))
        })
        .and_then(|c| c.get("message").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

fn flux_wording(kind: FluxKind) -> (&'static str, &'static str, &'static str) {
    match kind {
        FluxKind::HelmRelease => ("helm releases", "reconciled", "reconciled"),
        FluxKind::GitRepository => ("git repositories", "ready", "ready"),
        FluxKind::Kustomization => ("kustomizations", "ready", "ready"),
    }
}

pub async fn flux_status(flux: &dyn RuntimeClient, kind: FluxKind) -> Vec<String> {
    let items = match with_list_timeout(flux.list(kind, None)).await {
        Ok(items) => items,
        Err(err) => return error_lines(err),
    };
    let failing = items
        .iter()
        .filter(|obj| !crate::kube::is_ready(obj))
        .map(|obj| {
            let namespace = obj.metadata.namespace.clone().unwrap_or_default();
            let name = obj.metadata.name.clone().unwrap_or_default();
            NotReady {
                hint: reconcile_hint(kind, &namespace, &name),
                status: ready_message(obj),
                namespace,
                name,
            }
        })
        .collect();

    let (noun, ready, not_ready) = flux_wording(kind);
    let empty = format!("No Flux {} were found.", noun);
    let all_ready = format!("All Flux {} are {}.", noun, ready);
    summarize(items.len(), failing, Some(empty.as_str()), &all_ready, |n| {
        format!("There are {} Flux {} that are not {}:", n, noun, not_ready)
    })
}
