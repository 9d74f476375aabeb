//! `version` output

use crate::output::{Outputable, json_bytes, yaml_bytes};
use anyhow::Result;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Version details for one chart (or the CLI itself)
///
/// Empty fields are omitted from every encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageVersion {
    pub version: String,
    pub latest_version: String,
    pub update_available: bool,
    pub shas_match: String,
}

impl PackageVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if !self.version.is_empty() {
            map.insert("version".into(), Value::String(self.version.clone()));
        }
        if !self.latest_version.is_empty() {
            map.insert(
                "latestVersion".into(),
                Value::String(self.latest_version.clone()),
            );
            map.insert("updateAvailable".into(), Value::Bool(self.update_available));
        }
        if !self.shas_match.is_empty() {
            map.insert("shasMatch".into(), Value::String(self.shas_match.clone()));
        }
        map
    }

    /// One line: `{label} version {v}` plus whatever else is known
    fn render(&self, label: &str) -> String {
        let mut line = format!("{} version {}", label, self.version);
        if !self.latest_version.is_empty() {
            let _ = write!(
                line,
                ", latest version {}, update available: {}",
                self.latest_version, self.update_available
            );
        }
        if !self.shas_match.is_empty() {
            let _ = write!(line, ", {}", self.shas_match);
        }
        line
    }
}

/// Key under which the CLI's own version is reported
pub const CLI_PACKAGE: &str = "bbctl";
/// Key under which the Big Bang umbrella chart is reported
pub const BIG_BANG_PACKAGE: &str = "bigbang";

fn package_label(name: &str) -> &str {
    match name {
        CLI_PACKAGE => "bigbang cli",
        BIG_BANG_PACKAGE => "bigbang release",
        other => other,
    }
}

/// Version details keyed by chart name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionOutput {
    pub packages: BTreeMap<String, PackageVersion>,
}

impl VersionOutput {
    pub fn insert(&mut self, name: impl Into<String>, version: PackageVersion) {
        self.packages.insert(name.into(), version);
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.packages
            .iter()
            .map(|(name, version)| (name.clone(), Value::Object(version.to_map())))
            .collect()
    }
}

impl Outputable for VersionOutput {
    fn encode_yaml(&self) -> Result<Vec<u8>> {
        yaml_bytes(&self.to_map())
    }

    fn encode_json(&self) -> Result<Vec<u8>> {
        json_bytes(&self.to_map())
    }

    fn encode_text(&self) -> Result<String> {
        // CLI first, then the umbrella chart, then packages by name
        let order = |name: &str| match name {
            CLI_PACKAGE => 0,
            BIG_BANG_PACKAGE => 1,
            _ => 2,
        };
        let mut packages: Vec<_> = self.packages.iter().collect();
        packages.sort_by_key(|(name, _)| order(name));
        Ok(packages
            .into_iter()
            .map(|(name, version)| version.render(package_label(name)))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
