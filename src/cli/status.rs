//! `status` command

use crate::factory::{self, Factory};
use crate::status::get_status;
use anyhow::Result;

pub async fn run(factory: &dyn Factory) -> Result<()> {
    let output = factory::output_client(factory)?;
    let status = get_status(factory).await?;
    output.output(&status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeFactory;

    #[tokio::test]
    async fn test_reports_groups_in_order() {
        let factory = FakeFactory::new();
        factory.resolver().bind_flag("format", "", Some("json"));
        run(&factory).await.unwrap();

        let json: serde_json::Value = serde_json::from_str(&factory.out()).unwrap();
        let names: Vec<&str> = json["statuses"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|s| s["name"].as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "Big Bang Helm Release",
                "Pods",
                "StatefulSets",
                "Deployments",
                "DaemonSets",
                "Flux HelmReleases",
                "Flux GitRepositories",
                "Flux Kustomizations",
            ]
        );
    }
}
