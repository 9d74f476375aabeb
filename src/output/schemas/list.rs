//! `list` output

use super::render_table;
use crate::output::{Outputable, json_bytes, yaml_bytes};
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmReleaseOutput {
    pub name: String,
    pub namespace: String,
    pub revision: i64,
    pub status: String,
    /// `{chart name}-{chart version}`
    pub chart: String,
    pub app_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmReleaseTableOutput {
    pub releases: Vec<HelmReleaseOutput>,
}

impl Outputable for HelmReleaseTableOutput {
    fn encode_yaml(&self) -> Result<Vec<u8>> {
        yaml_bytes(self)
    }

    fn encode_json(&self) -> Result<Vec<u8>> {
        json_bytes(self)
    }

    fn encode_text(&self) -> Result<String> {
        let mut rows = vec![
            ["NAME", "NAMESPACE", "REVISION", "STATUS", "CHART", "APPVERSION"]
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>(),
        ];
        rows.extend(self.releases.iter().map(|r| {
            vec![
                r.name.clone(),
                r.namespace.clone(),
                r.revision.to_string(),
                r.status.clone(),
                r.chart.clone(),
                r.app_version.clone(),
            ]
        }));
        Ok(render_table(&rows))
    }
}
