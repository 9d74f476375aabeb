//! `violations` output

use crate::output::{Outputable, json_bytes, yaml_bytes};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// A single admission or audit violation
///
/// Exactly one of `policy` (Kyverno) and `constraint` (Gatekeeper) is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Resource name
    pub name: String,
    /// Resource kind
    pub kind: String,
    /// Resource namespace
    pub namespace: String,
    pub policy: String,
    pub constraint: String,
    pub message: String,
    /// Enforcement action
    pub action: String,
    /// RFC3339, UTC
    pub timestamp: String,
}

impl Violation {
    fn write_fields(&self, out: &mut String, indent: &str) -> std::fmt::Result {
        writeln!(out, "{}Resource: {}", indent, self.name)?;
        writeln!(out, "{}Kind: {}", indent, self.kind)?;
        writeln!(out, "{}Namespace: {}", indent, self.namespace)?;
        writeln!(out, "{}Policy: {}", indent, self.policy)?;
        writeln!(out, "{}Constraint: {}", indent, self.constraint)?;
        writeln!(out, "{}Message: {}", indent, self.message)?;
        writeln!(out, "{}Action: {}", indent, self.action)?;
        write!(out, "{}Timestamp: {}\n\n", indent, self.timestamp)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationsOutput {
    pub name: String,
    pub violations: Vec<Violation>,
}

impl Outputable for ViolationsOutput {
    fn encode_yaml(&self) -> Result<Vec<u8>> {
        yaml_bytes(self)
    }

    fn encode_json(&self) -> Result<Vec<u8>> {
        json_bytes(self)
    }

    fn encode_text(&self) -> Result<String> {
        if self.violations.is_empty() {
            return Ok(self.name.clone());
        }
        let mut out = String::new();
        writeln!(out, "{}:", self.name)?;
        for violation in &self.violations {
            violation.write_fields(&mut out, "  ")?;
        }
        Ok(out)
    }
}
