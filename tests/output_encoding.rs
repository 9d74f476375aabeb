//! Output encoding tests
//!
//! Every command result must encode to valid JSON and YAML, and the text
//! encoders must render what users see in a terminal.

use bbctl::cli::{self, Cli};
use bbctl::error::is_kind;
use bbctl::fakes::FakeFactory;
use bbctl::helm::{Chart, ChartMetadata, Release, ReleaseInfo};
use bbctl::output::BasicOutput;
use bbctl::output::schemas::*;
use bbctl::{BbctlError, IoStreams, OutputClient, Outputable};
use clap::Parser;
use std::collections::BTreeMap;

fn violation() -> Violation {
    Violation {
        name: "web".to_string(),
        kind: "Deployment".to_string(),
        namespace: "apps".to_string(),
        policy: String::new(),
        constraint: "k8srequiredlabels:must-have-owner".to_string(),
        message: "missing owner".to_string(),
        action: "deny".to_string(),
        timestamp: "2024-05-01T12:30:00Z".to_string(),
    }
}

fn release(name: &str, chart_version: &str, status: &str) -> Release {
    Release {
        name: name.to_string(),
        namespace: "bigbang".to_string(),
        version: 1,
        info: ReleaseInfo {
            status: status.to_string(),
            ..Default::default()
        },
        chart: Chart {
            metadata: ChartMetadata {
                name: name.to_string(),
                version: chart_version.to_string(),
                app_version: "1.0".to_string(),
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

fn boxed(output: impl Outputable + 'static) -> Box<dyn Outputable> {
    Box::new(output)
}

/// One populated value of every command result
fn every_output() -> Vec<(&'static str, Box<dyn Outputable>)> {
    let mut packages = BTreeMap::new();
    packages.insert(
        CLI_PACKAGE.to_string(),
        PackageVersion {
            version: "1.0.0".to_string(),
            ..Default::default()
        },
    );
    let mut hosts = BTreeMap::new();
    hosts.insert(
        "10.0.0.5".to_string(),
        vec!["grafana.dev.bigbang.mil".to_string()],
    );

    vec![
        ("basic", boxed(BasicOutput::single("msg", "hello"))),
        (
            "list",
            boxed(HelmReleaseTableOutput {
                releases: vec![HelmReleaseOutput {
                    name: "monitoring".to_string(),
                    namespace: "bigbang".to_string(),
                    revision: 2,
                    status: "deployed".to_string(),
                    chart: "monitoring-1.0.0".to_string(),
                    app_version: "0.9".to_string(),
                }],
            }),
        ),
        (
            "policy",
            boxed(PolicyListOutput {
                messages: vec!["Gatekeeper Policies".to_string()],
                crd_policies: vec![CrdPolicyOutput {
                    crd_name: "foos.constraints.gatekeeper.sh".to_string(),
                    policies: vec![PolicyOutput {
                        name: "foo-1".to_string(),
                        kind: "Foo".to_string(),
                        action: "deny".to_string(),
                        ..Default::default()
                    }],
                    message: String::new(),
                }],
            }),
        ),
        (
            "violations",
            boxed(ViolationsOutput {
                name: "Violations".to_string(),
                violations: vec![violation()],
            }),
        ),
        (
            "preflight",
            boxed(PreflightCheckOutput::new(
                "Preflight Check",
                vec![CheckStepOutput {
                    name: "Metrics Server Check".to_string(),
                    output: vec!["Checking metrics server...".to_string()],
                    status: "Passed".to_string(),
                    message: "Check Passed".to_string(),
                }],
            )),
        ),
        (
            "status",
            boxed(StatusOutput {
                name: "Big Bang Status".to_string(),
                statuses: vec![CheckStatusOutput::new("Pods", vec!["All pods are ready.".to_string()])],
            }),
        ),
        ("hosts", boxed(HostsOutput { hosts })),
        (
            "shellprofile",
            boxed(ShellProfileOutput {
                kubeconfig: "~/.kube/jdoe-dev-config".to_string(),
                bb_k3d_publicip: "3.3.3.3".to_string(),
                bb_k3d_privateip: "192.168.1.4".to_string(),
            }),
        ),
        ("version", boxed(VersionOutput { packages })),
        (
            "bigbang",
            boxed(BigbangOutput {
                data: HelmOutput {
                    name: "bigbang".to_string(),
                    status: "deployed".to_string(),
                    ..Default::default()
                },
            }),
        ),
        (
            "k3d",
            boxed(K3dOutput {
                data: K3dOutputData {
                    actions: vec!["Creating instance jdoe-dev".to_string()],
                    warnings: vec!["Warning: no SSH key found".to_string()],
                },
            }),
        ),
        (
            "flux",
            boxed(FluxOutput {
                data: FluxOutputData {
                    actions: vec!["installing components".to_string()],
                    ..Default::default()
                },
            }),
        ),
    ]
}

#[test]
fn test_every_output_encodes_valid_json_and_yaml() {
    for (name, output) in every_output() {
        let json = output.encode_json().unwrap();
        assert!(
            serde_json::from_slice::<serde_json::Value>(&json).is_ok(),
            "{} does not encode valid JSON",
            name
        );

        let yaml = output.encode_yaml().unwrap();
        assert!(
            serde_yaml::from_slice::<serde_yaml::Value>(&yaml).is_ok(),
            "{} does not encode valid YAML",
            name
        );

        assert!(!output.encode_text().unwrap().is_empty(), "{} has no text", name);
    }
}

#[test]
fn test_encoders_are_deterministic() {
    for ((name, a), (_, b)) in every_output().into_iter().zip(every_output()) {
        assert_eq!(a.encode_json().unwrap(), b.encode_json().unwrap(), "{}", name);
        assert_eq!(a.encode_yaml().unwrap(), b.encode_yaml().unwrap(), "{}", name);
        assert_eq!(a.encode_text().unwrap(), b.encode_text().unwrap(), "{}", name);
    }
}

#[test]
fn test_unsupported_format_writes_nothing() {
    let (streams, out, _) = IoStreams::buffered("");
    let client = OutputClient::new("xml", &streams);
    let err = client
        .output(&BasicOutput::single("msg", "hello"))
        .unwrap_err();
    assert!(is_kind(&err, &BbctlError::UnsupportedFormat("xml".to_string())));
    assert_eq!(err.to_string(), "unsupported format: xml");
    assert!(out.contents().is_empty());
}

#[test]
fn test_violation_text() {
    let output = ViolationsOutput {
        name: "Violations".to_string(),
        violations: vec![violation()],
    };
    assert_eq!(
        output.encode_text().unwrap(),
        "Violations:\n  Resource: web\n  Kind: Deployment\n  Namespace: apps\n  Policy: \n  Constraint: k8srequiredlabels:must-have-owner\n  Message: missing owner\n  Action: deny\n  Timestamp: 2024-05-01T12:30:00Z\n\n"
    );
}

#[test]
fn test_status_text() {
    let output = StatusOutput {
        name: "Big Bang Status".to_string(),
        statuses: vec![
            CheckStatusOutput::new("Pods", vec!["All pods are ready.".to_string()]),
            CheckStatusOutput::new(
                "Deployments",
                vec![
                    "There are 1 deployments that are not ready:".to_string(),
                    "namespace: bigbang, name: web, status: 0/1".to_string(),
                ],
            ),
        ],
    };
    let text = output.encode_text().unwrap();
    insta::assert_snapshot!(text.trim(), @r"
    Big Bang Status


    Name: Pods
    Output:
        All pods are ready.


    Name: Deployments
    Output:
        There are 1 deployments that are not ready:
        namespace: bigbang, name: web, status: 0/1
    ");
}

#[tokio::test]
async fn test_list_table_text() {
    let factory = FakeFactory::new();
    factory.add_release(release("foo", "1.0.2", "deployed"));
    factory.add_release(release("bar", "1.0.4", "failed"));

    let cli = Cli::try_parse_from(["bbctl", "list", "-o", "text"]).unwrap();
    cli::run(cli, &factory).await.unwrap();

    let out = factory.out();
    let rows: Vec<&str> = out.lines().collect();
    assert_eq!(rows.len(), 3);
    assert!(rows[0].starts_with("NAME"));
    assert_eq!(rows[1], "bar \tbigbang  \t1       \tfailed  \tbar-1.0.4\t1.0");
    assert_eq!(rows[2], "foo \tbigbang  \t1       \tdeployed\tfoo-1.0.2\t1.0");
}

#[tokio::test]
async fn test_list_json_carries_every_release() {
    let factory = FakeFactory::new();
    factory.add_release(release("foo", "1.0.2", "deployed"));
    factory.add_release(release("bar", "1.0.4", "failed"));

    let cli = Cli::try_parse_from(["bbctl", "list", "--output", "json"]).unwrap();
    cli::run(cli, &factory).await.unwrap();

    let json: serde_json::Value = serde_json::from_str(&factory.out()).unwrap();
    let releases = json["releases"].as_array().unwrap();
    assert_eq!(releases.len(), 2);
    assert_eq!(releases[1]["name"], "foo");
    assert_eq!(releases[1]["chart"], "foo-1.0.2");
    assert_eq!(releases[1]["status"], "deployed");
}

#[tokio::test]
async fn test_config_view_single_key_text() {
    let factory = FakeFactory::new();
    let cli = Cli::try_parse_from([
        "bbctl",
        "--bbctl-log-level",
        "testLogLevel",
        "-o",
        "text",
        "config",
        "view",
        "bbctl-log-level",
    ])
    .unwrap();
    cli::run(cli, &factory).await.unwrap();
    assert_eq!(factory.out(), "bbctl-log-level: testLogLevel\n");
}
