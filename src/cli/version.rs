//! `version` command
//!
//! Reports the CLI version and, unless `--client` is given, the deployed Big
//! Bang chart. `--all-charts` adds every Flux HelmRelease in the bigbang
//! namespace along with a digest comparison of their running images against
//! Ironbank. `--check-for-updates` looks up the newest chart versions on GitLab.

use super::bind_switch;
use crate::constants::{
    BIG_BANG_CLI_VERSION, BIG_BANG_HELM_RELEASE_NAME, BIG_BANG_NAMESPACE, BIG_BANG_PACKAGES_GROUP,
    BIG_BANG_REPO_PATH,
};
use crate::factory::{self, Factory};
use crate::kube::{FluxKind, K8sClient, Scheme, nested_str, nested_value};
use crate::log::LoggingClient;
use crate::output::schemas::{BIG_BANG_PACKAGE, CLI_PACKAGE, PackageVersion, VersionOutput};
use crate::update;
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use kube::core::DynamicObject;
use serde::Deserialize;
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub struct VersionArgs {
    /// Print bbctl version only
    #[arg(short = 'c', long)]
    pub client: bool,

    /// Print the version of every Big Bang chart
    #[arg(long = "all-charts")]
    pub all_charts: bool,

    /// Check the charts for newer versions
    #[arg(long = "check-for-updates")]
    pub check_for_updates: bool,

    /// Skip comparing running image digests against Ironbank
    #[arg(long = "no-shas")]
    pub no_shas: bool,
}

pub async fn run(factory: &dyn Factory, args: VersionArgs) -> Result<()> {
    let resolver = factory.get_viper()?;
    bind_switch(&resolver, "client", args.client);
    bind_switch(&resolver, "all-charts", args.all_charts);
    bind_switch(&resolver, "check-for-updates", args.check_for_updates);
    bind_switch(&resolver, "no-shas", args.no_shas);

    let config = factory::config_client(factory)?
        .get_config()
        .context("error getting config")?;
    if config.version.client {
        let streams = factory.get_io_streams()?;
        return streams.write_out(&format!("bigbang cli version {}\n", BIG_BANG_CLI_VERSION));
    }
    if config.version.check_for_updates {
        config.require_big_bang_repo()?;
    }

    let output = factory::output_client(factory)?;
    let mut versions = VersionOutput::default();
    versions.insert(CLI_PACKAGE, PackageVersion::new(BIG_BANG_CLI_VERSION));

    let helm = factory
        .get_helm_client(BIG_BANG_NAMESPACE)
        .await
        .context("error getting helm client")?;
    let release = helm
        .get_release(BIG_BANG_HELM_RELEASE_NAME)
        .await
        .context("error getting Big Bang release")?;
    versions.insert(
        BIG_BANG_PACKAGE,
        PackageVersion::new(release.chart.metadata.version.clone()),
    );

    let mut charts = vec![ChartRef {
        key: BIG_BANG_PACKAGE.to_string(),
        chart: BIG_BANG_PACKAGE.to_string(),
    }];
    if config.version.all_charts {
        let found = chart_versions(factory, !config.version.no_shas).await?;
        for (chart, version) in found {
            versions.insert(chart.key.clone(), version);
            charts.push(chart);
        }
    }

    if config.version.check_for_updates {
        let gitlab = factory.get_gitlab_client()?;
        for chart in &charts {
            let latest = latest_chart_version(gitlab.as_ref(), &chart.chart)
                .await
                .context("error checking for latest chart version")
                .context("error checking for updates")?;
            if let Some(entry) = versions.packages.get_mut(&chart.key) {
                entry.update_available = is_newer(&latest, &entry.version)?;
                entry.latest_version = latest;
            }
        }
    }

    output.output(&versions)
}

/// Where a reported version came from
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChartRef {
    /// Key in the version output
    key: String,
    /// Chart name, which is also the package project name on GitLab
    chart: String,
}

/// Versions of every Flux HelmRelease Big Bang manages
async fn chart_versions(
    factory: &dyn Factory,
    check_shas: bool,
) -> Result<Vec<(ChartRef, PackageVersion)>> {
    let logging = factory.get_logging_client()?;
    let scheme = Arc::new(Scheme::flux());
    let flux = factory
        .get_runtime_client(&scheme)
        .await
        .context("error getting runtime client")?;
    let releases = flux
        .list(FluxKind::HelmRelease, Some(BIG_BANG_NAMESPACE))
        .await
        .context("error getting helm releases")?;
    let k8s = factory.get_k8s_client().await?;

    let mut found = Vec::with_capacity(releases.len());
    for release in &releases {
        let key = release.metadata.name.clone().unwrap_or_default();
        let chart = nested_str(&release.data, &["spec", "chart", "spec", "chart"])
            .unwrap_or(key.as_str())
            .to_string();
        let mut version = PackageVersion::new(deployed_chart_version(release));
        if check_shas {
            let namespace = nested_str(&release.data, &["spec", "targetNamespace"])
                .or(release.metadata.namespace.as_deref())
                .unwrap_or(BIG_BANG_NAMESPACE);
            version.shas_match = compare_shas(factory, k8s.as_ref(), &logging, namespace).await?;
        }
        found.push((ChartRef { key, chart }, version));
    }
    Ok(found)
}

/// Chart version of the newest history entry, or the last applied revision
fn deployed_chart_version(release: &DynamicObject) -> String {
    nested_value(&release.data, &["status", "history"])
        .and_then(|history| history.get(0))
        .and_then(|entry| entry.get("chartVersion"))
        .and_then(|v| v.as_str())
        .or_else(|| nested_str(&release.data, &["status", "lastAppliedRevision"]))
        .unwrap_or_default()
        .to_string()
}

/// Compare the digest of every running container image in `namespace` with Ironbank
async fn compare_shas(
    factory: &dyn Factory,
    k8s: &dyn K8sClient,
    logging: &LoggingClient,
    namespace: &str,
) -> Result<String> {
    let ironbank = factory.get_ironbank_client()?;
    let pods = k8s
        .list_pods(Some(namespace), None)
        .await
        .with_context(|| format!("error listing pods in namespace {}", namespace))?;

    let mut mismatched: Vec<String> = Vec::new();
    let statuses = pods
        .iter()
        .filter_map(|pod| pod.status.as_ref())
        .flat_map(|status| status.container_statuses.iter().flatten());
    for status in statuses {
        let Some((_, running)) = status.image_id.split_once("sha256:") else {
            continue;
        };
        match ironbank.get_image_sha(&status.image).await {
            Ok(expected) if expected == running => {}
            Ok(_) => mismatched.push(status.image.clone()),
            Err(err) => {
                logging.warn(format!("unable to verify {}: {:#}", status.image, err));
                mismatched.push(status.image.clone());
            }
        }
    }
    mismatched.sort();
    mismatched.dedup();

    if mismatched.is_empty() {
        Ok("All SHAs match".to_string())
    } else {
        Ok(format!("SHAs do not match for: {}", mismatched.join(", ")))
    }
}

#[derive(Debug, Deserialize)]
struct ChartFile {
    version: String,
}

/// Version in the newest `chart/Chart.yaml` of `chart`
async fn latest_chart_version(
    gitlab: &dyn crate::gitlab::GitLabClient,
    chart: &str,
) -> Result<String> {
    let (repository, branch) = if chart == BIG_BANG_PACKAGE {
        (BIG_BANG_REPO_PATH.to_string(), "master")
    } else {
        (format!("{}/{}", BIG_BANG_PACKAGES_GROUP, chart), "main")
    };
    let contents = gitlab
        .get_file(&repository, "chart/Chart.yaml", branch)
        .await
        .context("error getting Chart.yaml")?;
    let parsed: ChartFile =
        serde_yaml::from_slice(&contents).context("error parsing Chart.yaml")?;
    Ok(parsed.version)
}

/// Whether `latest` sorts after `current`
///
/// Prerelease identifiers (`bb.N`) are compared field by field, numerically
/// where both sides are numbers.
fn is_newer(latest: &str, current: &str) -> Result<bool> {
    let now = Utc::now();
    let latest = update::Version::parse(latest, now)?;
    let current = update::Version::parse(current, now)?;
    let ordering = (latest.major, latest.minor, latest.patch)
        .cmp(&(current.major, current.minor, current.patch))
        .then_with(|| compare_prerelease(&latest.prerelease, &current.prerelease));
    Ok(ordering == Ordering::Greater)
}

fn compare_prerelease(a: &str, b: &str) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeFactory, dynamic_object};
    use crate::helm::{Chart, ChartMetadata, Release};
    use k8s_openapi::api::core::v1::{ContainerStatus, Pod, PodStatus};
    use serde_json::json;

    fn seeded() -> FakeFactory {
        let factory = FakeFactory::new();
        factory.resolver().bind_flag("format", "", Some("json"));
        factory.add_release(Release {
            name: "bigbang".into(),
            namespace: "bigbang".into(),
            version: 1,
            chart: Chart {
                metadata: ChartMetadata {
                    name: "bigbang".into(),
                    version: "2.40.0".into(),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        });
        factory
    }

    fn add_monitoring(factory: &FakeFactory) {
        factory.add_flux_object(
            FluxKind::HelmRelease,
            dynamic_object(
                &FluxKind::HelmRelease.gvr(),
                "HelmRelease",
                Some("bigbang"),
                "monitoring",
                json!({
                    "spec": {
                        "targetNamespace": "monitoring",
                        "chart": {"spec": {"chart": "kube-prometheus-stack"}}
                    },
                    "status": {"history": [{"chartVersion": "60.1.0-bb.2"}]}
                }),
            ),
        );
    }

    fn running_pod(ns: &str, image: &str, digest: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some("prometheus-0".into());
        pod.metadata.namespace = Some(ns.into());
        pod.status = Some(PodStatus {
            container_statuses: Some(vec![ContainerStatus {
                name: "prometheus".into(),
                image: image.into(),
                image_id: format!("{}@sha256:{}", image, digest),
                ..Default::default()
            }]),
            ..Default::default()
        });
        pod
    }

    #[tokio::test]
    async fn test_client_only_prints_one_line() {
        let factory = FakeFactory::new();
        factory.fail("get_helm_client", "no cluster");
        run(
            &factory,
            VersionArgs {
                client: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let out = factory.out();
        assert_eq!(out.lines().count(), 1);
        assert!(out.starts_with("bigbang cli version "));
    }

    #[tokio::test]
    async fn test_reports_release_version() {
        let factory = seeded();
        run(&factory, VersionArgs::default()).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&factory.out()).unwrap();
        assert_eq!(json["bbctl"]["version"], BIG_BANG_CLI_VERSION);
        assert_eq!(json["bigbang"]["version"], "2.40.0");
        assert!(json.get("monitoring").is_none());
    }

    #[tokio::test]
    async fn test_all_charts_with_shas() {
        let factory = seeded();
        add_monitoring(&factory);
        let image = "registry1.dso.mil/ironbank/opensource/prometheus/prometheus:v2.53.0";
        factory.cluster().pods.push(running_pod("monitoring", image, "abc123"));
        factory.set_image_sha(image, "abc123");

        run(
            &factory,
            VersionArgs {
                all_charts: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&factory.out()).unwrap();
        assert_eq!(json["monitoring"]["version"], "60.1.0-bb.2");
        assert_eq!(json["monitoring"]["shasMatch"], "All SHAs match");
    }

    #[tokio::test]
    async fn test_sha_mismatch_is_reported() {
        let factory = seeded();
        add_monitoring(&factory);
        let image = "registry1.dso.mil/ironbank/opensource/prometheus/prometheus:v2.53.0";
        factory.cluster().pods.push(running_pod("monitoring", image, "abc123"));
        factory.set_image_sha(image, "def456");

        run(
            &factory,
            VersionArgs {
                all_charts: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&factory.out()).unwrap();
        assert_eq!(
            json["monitoring"]["shasMatch"],
            format!("SHAs do not match for: {}", image)
        );
    }

    #[tokio::test]
    async fn test_check_for_updates() {
        let factory = seeded();
        factory.resolver().set("big-bang-repo", "/src/bb");
        add_monitoring(&factory);
        factory.set_gitlab_file(
            "big-bang/bigbang",
            "chart/Chart.yaml",
            "master",
            "apiVersion: v2\nname: bigbang\nversion: 2.41.0\n",
        );
        factory.set_gitlab_file(
            "big-bang/product/packages/kube-prometheus-stack",
            "chart/Chart.yaml",
            "main",
            "name: kube-prometheus-stack\nversion: 60.1.0-bb.2\n",
        );

        run(
            &factory,
            VersionArgs {
                all_charts: true,
                check_for_updates: true,
                no_shas: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&factory.out()).unwrap();
        assert_eq!(json["bigbang"]["latestVersion"], "2.41.0");
        assert_eq!(json["bigbang"]["updateAvailable"], true);
        assert_eq!(json["monitoring"]["latestVersion"], "60.1.0-bb.2");
        assert_eq!(json["monitoring"]["updateAvailable"], false);
        assert!(json["monitoring"].get("shasMatch").is_none());
    }

    #[tokio::test]
    async fn test_check_for_updates_errors() {
        let factory = seeded();
        let err = run(
            &factory,
            VersionArgs {
                check_for_updates: true,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "big-bang-repo is required but was not set");

        factory.resolver().set("big-bang-repo", "/src/bb");
        let err = run(
            &factory,
            VersionArgs {
                check_for_updates: true,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(
            format!("{:#}", err),
            "error checking for updates: error checking for latest chart version: error getting Chart.yaml: 404 File Not Found: big-bang/bigbang/chart/Chart.yaml"
        );
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer("2.41.0", "2.40.0").unwrap());
        assert!(!is_newer("2.40.0", "2.40.0").unwrap());
        assert!(is_newer("1.0.0-bb.10", "1.0.0-bb.9").unwrap());
        assert!(is_newer("1.0.0", "1.0.0-bb.9").unwrap());
        assert!(!is_newer("0.9.9", "1.0.0").unwrap());
        assert!(is_newer("not a version", "1.0.0").is_err());
    }
}
