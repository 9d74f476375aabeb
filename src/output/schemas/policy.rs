//! `policy` output

use crate::output::{Outputable, json_bytes, yaml_bytes};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// One policy or constraint, engine-agnostic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOutput {
    pub name: String,
    /// Only set for namespaced Kyverno policies
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub kind: String,
    pub description: String,
    pub action: String,
}

/// Policies defined by one CRD
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdPolicyOutput {
    pub crd_name: String,
    pub policies: Vec<PolicyOutput>,
    /// Shown when `policies` is empty
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyListOutput {
    pub messages: Vec<String>,
    pub crd_policies: Vec<CrdPolicyOutput>,
}

impl Outputable for PolicyListOutput {
    fn encode_yaml(&self) -> Result<Vec<u8>> {
        yaml_bytes(self)
    }

    fn encode_json(&self) -> Result<Vec<u8>> {
        json_bytes(self)
    }

    fn encode_text(&self) -> Result<String> {
        let mut out = String::new();
        for message in &self.messages {
            write!(out, "\n{}\n", message)?;
        }
        out.push('\n');

        for crd in &self.crd_policies {
            write!(out, "\n{}\n", crd.crd_name)?;
            if crd.policies.is_empty() {
                write!(out, "\n{}", crd.message)?;
            }
            for policy in &crd.policies {
                if policy.namespace.is_empty() {
                    write!(
                        out,
                        "\nKind: {}, Name: {}, EnforcementAction: {}\n",
                        policy.kind, policy.name, policy.action
                    )?;
                } else {
                    write!(
                        out,
                        "\nKind: {}, Name: {}, Namespace: {}, EnforcementAction: {}\n",
                        policy.kind, policy.name, policy.namespace, policy.action
                    )?;
                }
                if !policy.description.is_empty() {
                    write!(out, "\n{}\n\n", policy.description)?;
                }
            }
            out.push_str("\n\n\n");
        }
        Ok(out)
    }
}
