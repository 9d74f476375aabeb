//! `status` output

use crate::output::{Outputable, json_bytes, yaml_bytes};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Lines reported by one status check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckStatusOutput {
    pub name: String,
    pub output: Vec<String>,
}

impl CheckStatusOutput {
    pub fn new(name: impl Into<String>, output: Vec<String>) -> Self {
        Self {
            name: name.into(),
            output,
        }
    }

    fn render(&self) -> String {
        format!(
            "\n\nName: {}\nOutput:\n    {}\n",
            self.name,
            self.output.join("\n    ")
        )
    }
}

impl Outputable for CheckStatusOutput {
    fn encode_yaml(&self) -> Result<Vec<u8>> {
        yaml_bytes(self)
    }

    fn encode_json(&self) -> Result<Vec<u8>> {
        json_bytes(self)
    }

    fn encode_text(&self) -> Result<String> {
        Ok(self.render())
    }
}

/// Every status check, in the order they ran
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusOutput {
    pub name: String,
    pub statuses: Vec<CheckStatusOutput>,
}

impl Outputable for StatusOutput {
    fn encode_yaml(&self) -> Result<Vec<u8>> {
        yaml_bytes(self)
    }

    fn encode_json(&self) -> Result<Vec<u8>> {
        json_bytes(self)
    }

    fn encode_text(&self) -> Result<String> {
        let body: String = self.statuses.iter().map(CheckStatusOutput::render).collect();
        Ok(format!("\n\n{}\n{}", self.name, body))
    }
}
