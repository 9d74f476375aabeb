//! `deploy` output

use crate::output::{Outputable, json_pretty_bytes, yaml_bytes};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Fields parsed from `helm upgrade -i` output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmOutput {
    pub message: String,
    pub name: String,
    pub last_deployed: String,
    pub namespace: String,
    pub status: String,
    pub revision: String,
    pub test_suite: String,
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigbangOutput {
    pub data: HelmOutput,
}

impl Outputable for BigbangOutput {
    fn encode_yaml(&self) -> Result<Vec<u8>> {
        yaml_bytes(&self.data)
    }

    fn encode_json(&self) -> Result<Vec<u8>> {
        json_pretty_bytes(&self.data)
    }

    fn encode_text(&self) -> Result<String> {
        let d = &self.data;
        let mut out = String::new();
        writeln!(out, "Message: {}", d.message)?;
        writeln!(out, "Name: {}", d.name)?;
        writeln!(out, "Last Deployed: {}", d.last_deployed)?;
        writeln!(out, "Namespace: {}", d.namespace)?;
        writeln!(out, "Status: {}", d.status)?;
        writeln!(out, "Revision: {}", d.revision)?;
        writeln!(out, "Test Suite: {}", d.test_suite)?;
        write!(out, "Notes:\n{}\n", d.notes)?;
        Ok(out)
    }
}

/// Lines of `install_flux.sh` output, bucketed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FluxOutputData {
    pub general_info: BTreeMap<String, String>,
    pub actions: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FluxOutput {
    pub data: FluxOutputData,
}

impl Outputable for FluxOutput {
    fn encode_yaml(&self) -> Result<Vec<u8>> {
        yaml_bytes(&self.data)
    }

    fn encode_json(&self) -> Result<Vec<u8>> {
        json_pretty_bytes(&self.data)
    }

    fn encode_text(&self) -> Result<String> {
        let mut out = String::from("General Info:\n");
        for (key, value) in &self.data.general_info {
            writeln!(out, "  {}: {}", key, value)?;
        }
        out.push_str("\nActions:\n");
        for action in &self.data.actions {
            writeln!(out, "  {}", action)?;
        }
        if !self.data.warnings.is_empty() {
            out.push_str("\nWarnings:\n");
            for warning in &self.data.warnings {
                writeln!(out, "  {}", warning)?;
            }
        }
        Ok(out)
    }
}
