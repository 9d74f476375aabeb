//! `preflight-check` output

use crate::output::{Outputable, json_bytes, yaml_bytes};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Result of one preflight check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckStepOutput {
    pub name: String,
    /// Progress lines printed while the check ran
    pub output: Vec<String>,
    /// `Passed`, `Failed` or `Unknown`
    pub status: String,
    /// Success, failure or retry advice matching `status`
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightCheckOutput {
    pub name: String,
    pub steps: Vec<CheckStepOutput>,
    /// Summary of every step status, see [`PreflightCheckOutput::new`]
    #[serde(rename = "overallStatus")]
    pub overall_status: String,
}

impl PreflightCheckOutput {
    /// Summary is `Failed` if any step failed, else `Unknown` if any could not
    /// run, else `Passed`
    pub fn new(name: impl Into<String>, steps: Vec<CheckStepOutput>) -> Self {
        let any = |status: &str| steps.iter().any(|s| s.status == status);
        let overall_status = if any("Failed") {
            "Failed"
        } else if any("Unknown") {
            "Unknown"
        } else {
            "Passed"
        };
        Self {
            name: name.into(),
            overall_status: overall_status.to_string(),
            steps,
        }
    }
}

impl Outputable for PreflightCheckOutput {
    fn encode_yaml(&self) -> Result<Vec<u8>> {
        yaml_bytes(self)
    }

    fn encode_json(&self) -> Result<Vec<u8>> {
        json_bytes(self)
    }

    fn encode_text(&self) -> Result<String> {
        let mut out = String::new();
        for line in self.steps.iter().flat_map(|s| &s.output) {
            writeln!(out, "{}", line)?;
        }
        write!(out, "\n\n{}\n\n", self.name)?;
        for step in &self.steps {
            write!(out, "{} {}...\n{}\n\n", step.name, step.status, step.message)?;
        }
        write!(out, "Overall Status: {}", self.overall_status)?;
        Ok(out)
    }
}
