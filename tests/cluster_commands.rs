//! Cluster command tests
//!
//! Each test seeds the fake cluster, runs a command the way the binary does,
//! and checks what reached the output stream.

use bbctl::cli::{self, Cli};
use bbctl::constants::{FLUX_NAMESPACE, REGISTRY1_HOST};
use bbctl::credential_helper::{PASSWORD, USERNAME};
use bbctl::fakes::{FakeFactory, dynamic_object};
use bbctl::kube::{GroupVersionResource, VirtualService};
use bbctl::policy::PolicyEngine;
use bbctl::preflight::{FLUX_CONTROLLERS, CHECK_NAMESPACE};
use clap::Parser;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, PodStatus, Service, ServiceSpec};
use k8s_openapi::api::storage::v1::StorageClass;
use serde_json::json;
use std::collections::BTreeMap;

async fn run(factory: &FakeFactory, args: &[&str]) -> anyhow::Result<()> {
    let cli = Cli::try_parse_from(std::iter::once("bbctl").chain(args.iter().copied()))?;
    cli::run(cli, factory).await
}

fn labels(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
    Some(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

fn policy_crd(factory: &FakeFactory, name: &str, engine: &str) {
    let gvr = GroupVersionResource::crds();
    let mut crd = dynamic_object(&gvr, "CustomResourceDefinition", None, name, json!({}));
    crd.metadata.labels = labels(&[("app.kubernetes.io/name", engine)]);
    factory.add_object(&gvr, crd);
}

fn constraint(factory: &FakeFactory, resource: &str, kind: &str, name: &str, data: serde_json::Value) {
    let gvr = PolicyEngine::Gatekeeper.policies_gvr(&format!("{}.constraints.gatekeeper.sh", resource));
    let mut obj = dynamic_object(&gvr, kind, None, name, data);
    obj.metadata.annotations = labels(&[(
        "constraints.gatekeeper/description",
        &format!("{} description", name),
    )]);
    factory.add_object(&gvr, obj);
}

#[tokio::test]
async fn test_gatekeeper_policies_text() {
    let factory = FakeFactory::new();
    policy_crd(&factory, "foos.constraints.gatekeeper.sh", "gatekeeper");
    constraint(&factory, "foos", "Foo", "foo-1", json!({"spec": {"enforcementAction": "deny"}}));
    constraint(&factory, "foos", "Foo", "foo-2", json!({"spec": {"enforcementAction": "dryrun"}}));

    run(&factory, &["policy", "--gatekeeper", "-o", "text"])
        .await
        .unwrap();

    let out = factory.out();
    assert!(out.starts_with("\nGatekeeper Policies\n\n"));
    assert!(out.contains("\nfoos.constraints.gatekeeper.sh\n"));
    assert!(out.contains("\nKind: Foo, Name: foo-1, EnforcementAction: deny\n\nfoo-1 description\n"));
    assert!(out.contains("\nKind: Foo, Name: foo-2, EnforcementAction: dryrun\n\nfoo-2 description\n"));
}

#[tokio::test]
async fn test_gatekeeper_policy_by_kind() {
    let factory = FakeFactory::new();
    policy_crd(&factory, "foos.constraints.gatekeeper.sh", "gatekeeper");
    policy_crd(&factory, "bars.constraints.gatekeeper.sh", "gatekeeper");
    constraint(&factory, "foos", "Foo", "foo-1", json!({"spec": {"enforcementAction": "deny"}}));
    constraint(&factory, "bars", "Bar", "bar-1", json!({"spec": {"enforcementAction": "warn"}}));

    run(&factory, &["policy", "--gatekeeper", "bars", "-o", "json"])
        .await
        .unwrap();

    let json: serde_json::Value = serde_json::from_str(&factory.out()).unwrap();
    let crds = json["crdPolicies"].as_array().unwrap();
    assert_eq!(crds.len(), 1);
    assert_eq!(crds[0]["crdName"], "bars.constraints.gatekeeper.sh");
    assert_eq!(crds[0]["policies"][0]["name"], "bar-1");
}

#[tokio::test]
async fn test_policy_requires_one_engine() {
    let factory = FakeFactory::new();
    let err = run(&factory, &["policy"]).await.unwrap_err();
    assert!(format!("{:#}", err).contains("either --gatekeeper or --kyverno must be specified"));
    assert!(factory.out().is_empty());
}

#[tokio::test]
async fn test_audit_violations_filtered_by_namespace() {
    let factory = FakeFactory::new();
    policy_crd(&factory, "foos.constraints.gatekeeper.sh", "gatekeeper");
    constraint(
        &factory,
        "foos",
        "Foo",
        "foo-1",
        json!({"status": {"violations": [
            {"kind": "k1", "name": "r1", "namespace": "ns1", "message": "invalid config"}
        ]}}),
    );

    run(&factory, &["violations", "--audit", "-n", "ns0", "-o", "text"])
        .await
        .unwrap();
    assert_eq!(factory.out(), "No violations found in audit\n");
}

#[tokio::test]
async fn test_audit_violations_listed() {
    let factory = FakeFactory::new();
    policy_crd(&factory, "foos.constraints.gatekeeper.sh", "gatekeeper");
    constraint(
        &factory,
        "foos",
        "Foo",
        "foo-1",
        json!({"status": {"violations": [
            {"kind": "k1", "name": "r1", "namespace": "ns1", "message": "invalid config"}
        ]}}),
    );

    run(&factory, &["violations", "--audit", "--namespace", "ns1", "-o", "json"])
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&factory.out()).unwrap();
    assert_eq!(json["name"], "Violations");
    assert_eq!(json["violations"][0]["name"], "r1");
    assert_eq!(json["violations"][0]["constraint"], "foos:foo-1");
}

fn healthy_cluster(factory: &FakeFactory) {
    let mut cluster = factory.cluster();
    cluster.add_api_group("metrics.k8s.io", &["v1beta1"]);

    let mut sc = StorageClass::default();
    sc.metadata.name = Some("local-path".to_string());
    sc.metadata.annotations = labels(&[("storageclass.kubernetes.io/is-default-class", "true")]);
    cluster.storage_classes.push(sc);

    for controller in FLUX_CONTROLLERS {
        let mut deploy = Deployment::default();
        deploy.metadata.name = Some(controller.to_string());
        deploy.metadata.namespace = Some(FLUX_NAMESPACE.to_string());
        cluster.deployments.push(deploy);

        let mut pod = Pod {
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        pod.metadata.name = Some(format!("{}-abc", controller));
        pod.metadata.namespace = Some(FLUX_NAMESPACE.to_string());
        pod.metadata.labels = labels(&[("app", controller)]);
        cluster.pods.push(pod);
    }
    cluster.job_pod_phase = Some("Running".to_string());
}

fn seed_sysctls(factory: &FakeFactory, max_map_count: &str) {
    factory.set_exec_output(&["cat", "/proc/sys/vm/max_map_count"], max_map_count);
    factory.set_exec_output(&["cat", "/proc/sys/fs/file-max"], "9223372036854775807\n");
    factory.set_exec_output(&["ulimit", "-n"], "unlimited\n");
    factory.set_exec_output(&["ulimit", "-u"], "unlimited\n");
}

async fn run_preflight(factory: &FakeFactory, format: &str) {
    let resolver = factory.resolver();
    resolver.bind_flag("retrycount", 5, Some(2));
    resolver.bind_flag("retrydelay", 5, Some(0));
    run(
        factory,
        &[
            "preflight-check",
            "--registryserver",
            "registry1.dso.mil",
            "--registryusername",
            "user",
            "--registrypassword",
            "pass",
            "-o",
            format,
        ],
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_preflight_low_max_map_count() {
    let factory = FakeFactory::new();
    healthy_cluster(&factory);
    seed_sysctls(&factory, "262100\n");

    run_preflight(&factory, "text").await;

    let out = factory.out();
    assert!(out.contains("Check Failed - vm.max_map_count needs to be at least 262144 for ECK to work.\n"));
    assert!(out.contains("\n\nPreflight Check Summary\n\n"));
    assert!(out.contains("Metrics Server Check Passed...\n"));
    assert!(out.contains("System Parameters Check Failed...\n"));
    assert!(out.ends_with("Overall Status: Failed\n"));
    assert_eq!(factory.cluster().deleted_namespaces, vec![CHECK_NAMESPACE]);
}

#[tokio::test]
async fn test_preflight_all_checks_pass() {
    let factory = FakeFactory::new();
    healthy_cluster(&factory);
    seed_sysctls(&factory, "524288");

    run_preflight(&factory, "json").await;

    let json: serde_json::Value = serde_json::from_str(&factory.out()).unwrap();
    let statuses: Vec<&str> = json["steps"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|s| s["status"].as_str())
        .collect();
    assert_eq!(statuses, vec!["Passed"; 4]);
    assert_eq!(json["overallStatus"], "Passed");
}

#[tokio::test]
async fn test_status_reports_every_group() {
    let factory = FakeFactory::new();
    factory.fail("list_pods", "pods is forbidden");

    run(&factory, &["status", "-o", "json"]).await.unwrap();

    let json: serde_json::Value = serde_json::from_str(&factory.out()).unwrap();
    let statuses = json["statuses"].as_array().unwrap();
    assert_eq!(statuses.len(), 8);
    assert_eq!(statuses[1]["name"], "Pods");
    assert!(
        statuses[1]["output"][0]
            .as_str()
            .unwrap()
            .contains("pods is forbidden")
    );
}

#[tokio::test]
async fn test_k3d_hosts() {
    let factory = FakeFactory::new();
    let mut svc = Service::default();
    svc.metadata.name = Some("public-ingressgateway".to_string());
    svc.metadata.namespace = Some("istio-system".to_string());
    svc.spec = Some(ServiceSpec {
        type_: Some("LoadBalancer".to_string()),
        cluster_ips: Some(vec!["172.20.1.240".to_string()]),
        ..Default::default()
    });
    factory.cluster().services.push(svc);
    factory.add_virtual_service(VirtualService {
        name: "grafana".to_string(),
        namespace: "monitoring".to_string(),
        hosts: vec!["grafana.dev.bigbang.mil".to_string()],
        gateways: vec!["istio-system/public".to_string()],
    });

    run(&factory, &["k3d", "hosts", "-o", "text"]).await.unwrap();
    assert_eq!(factory.out(), "172.20.1.240\tgrafana.dev.bigbang.mil\n");
}

#[tokio::test]
async fn test_k3d_hosts_binds_private_ip() {
    let factory = FakeFactory::new();
    run(&factory, &["k3d", "hosts", "--private-ip", "-o", "json"])
        .await
        .unwrap();
    assert!(factory.resolver().get_bool("private-ip"));
    let json: serde_json::Value = serde_json::from_str(&factory.out()).unwrap();
    assert_eq!(json, json!({"hosts": {}}));
}

#[tokio::test]
async fn test_k3d_create_passes_trailing_args() {
    let factory = FakeFactory::new();
    let script = "/src/bb/docs/assets/scripts/developer/k3d-dev.sh";
    factory.set_command_result(
        &format!("{} -b -p", script),
        Ok("Warning: instance type m5a.4xlarge\nCreating jdoe-dev\n".to_string()),
    );
    run(
        &factory,
        &["k3d", "create", "--big-bang-repo", "/src/bb", "-o", "json", "--", "-b", "-p"],
    )
    .await
    .unwrap();

    assert_eq!(factory.invocations(), vec![format!("{} -b -p", script)]);
    let json: serde_json::Value = serde_json::from_str(&factory.out()).unwrap();
    assert_eq!(json["actions"], json!(["Creating jdoe-dev"]));
    assert_eq!(json["warnings"], json!(["Warning: instance type m5a.4xlarge"]));
}

#[tokio::test]
async fn test_deploy_bigbang_through_cli() {
    let factory = FakeFactory::new();
    factory.set_credential(USERNAME, REGISTRY1_HOST, "user");
    factory.set_credential(PASSWORD, REGISTRY1_HOST, "pass");
    factory.set_command_result(
        "helm upgrade -i bigbang /src/bb/chart -n bigbang --create-namespace --set registryCredentials.username=user --set registryCredentials.password=pass --set addons.kiali.enabled=true --wait",
        Ok("NAME: bigbang\nNAMESPACE: bigbang\nSTATUS: deployed\nREVISION: 1\n".to_string()),
    );

    run(
        &factory,
        &[
            "--big-bang-repo",
            "/src/bb",
            "-o",
            "json",
            "deploy",
            "bigbang",
            "--addon",
            "kiali",
            "--",
            "--wait",
        ],
    )
    .await
    .unwrap();

    assert_eq!(factory.invocations().len(), 1);
    let json: serde_json::Value = serde_json::from_str(&factory.out()).unwrap();
    assert_eq!(json["status"], "deployed");
    assert_eq!(json["namespace"], "bigbang");
}
