//! `list` command

use crate::constants::BIG_BANG_NAMESPACE;
use crate::factory::{self, Factory};
use crate::output::schemas::{HelmReleaseOutput, HelmReleaseTableOutput};
use anyhow::{Context, Result};

/// Output the Helm releases deployed by Big Bang
pub async fn run(factory: &dyn Factory) -> Result<()> {
    let output = factory::output_client(factory)?;
    let helm = factory
        .get_helm_client(BIG_BANG_NAMESPACE)
        .await
        .context("error getting helm client")?;
    let releases = helm
        .get_list()
        .await
        .with_context(|| format!("error getting helm releases in namespace {}", BIG_BANG_NAMESPACE))?;

    let table = HelmReleaseTableOutput {
        releases: releases
            .iter()
            .map(|r| HelmReleaseOutput {
                name: r.name.clone(),
                namespace: r.namespace.clone(),
                revision: r.version,
                status: r.info.status.clone(),
                chart: r.chart_label(),
                app_version: r.chart.metadata.app_version.clone(),
            })
            .collect(),
    };
    output.output(&table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeFactory;
    use crate::helm::{Chart, ChartMetadata, Release, ReleaseInfo};

    fn release(name: &str, namespace: &str, version: i64, status: &str) -> Release {
        Release {
            name: name.into(),
            namespace: namespace.into(),
            version,
            info: ReleaseInfo {
                status: status.into(),
                ..Default::default()
            },
            chart: Chart {
                metadata: ChartMetadata {
                    name: name.into(),
                    version: "1.0.0".into(),
                    app_version: "0.9".into(),
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_lists_latest_releases_in_bigbang_namespace() {
        let factory = FakeFactory::new();
        factory.resolver().bind_flag("format", "", Some("text"));
        factory.add_release(release("monitoring", "bigbang", 1, "superseded"));
        factory.add_release(release("monitoring", "bigbang", 2, "deployed"));
        factory.add_release(release("istio", "bigbang", 1, "failed"));
        factory.add_release(release("other", "default", 1, "deployed"));

        run(&factory).await.unwrap();
        insta::assert_snapshot!(factory.out().trim_end(), @r"
        NAME      	NAMESPACE	REVISION	STATUS  	CHART           	APPVERSION
        istio     	bigbang  	1       	failed  	istio-1.0.0     	0.9
        monitoring	bigbang  	2       	deployed	monitoring-1.0.0	0.9
        ");
    }

    #[tokio::test]
    async fn test_helm_failure_is_wrapped() {
        let factory = FakeFactory::new();
        factory.fail("helm", "secrets is forbidden");
        let err = run(&factory).await.unwrap_err();
        assert_eq!(
            format!("{:#}", err),
            "error getting helm releases in namespace bigbang: secrets is forbidden"
        );
    }
}
