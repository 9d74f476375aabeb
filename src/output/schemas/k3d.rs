//! `k3d` output

use crate::output::{Outputable, json_pretty_bytes, yaml_bytes};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// `k3d-dev.sh` stdout split into warnings and everything else
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct K3dOutputData {
    pub actions: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct K3dOutput {
    pub data: K3dOutputData,
}

impl Outputable for K3dOutput {
    fn encode_yaml(&self) -> Result<Vec<u8>> {
        yaml_bytes(&self.data)
    }

    fn encode_json(&self) -> Result<Vec<u8>> {
        json_pretty_bytes(&self.data)
    }

    fn encode_text(&self) -> Result<String> {
        let mut out = String::from("Actions:\n");
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

/// `/etc/hosts` entries: load balancer IP to virtual service hostnames
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostsOutput {
    pub hosts: BTreeMap<String, Vec<String>>,
}

impl Outputable for HostsOutput {
    fn encode_yaml(&self) -> Result<Vec<u8>> {
        yaml_bytes(self)
    }

    fn encode_json(&self) -> Result<Vec<u8>> {
        json_pretty_bytes(self)
    }

    fn encode_text(&self) -> Result<String> {
        Ok(self
            .hosts
            .iter()
            .map(|(ip, hostnames)| format!("{}\t{}", ip, hostnames.join("\t")))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Shell exports for a k3d development cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellProfileOutput {
    pub kubeconfig: String,
    pub bb_k3d_publicip: String,
    pub bb_k3d_privateip: String,
}

impl Outputable for ShellProfileOutput {
    fn encode_yaml(&self) -> Result<Vec<u8>> {
        yaml_bytes(self)
    }

    fn encode_json(&self) -> Result<Vec<u8>> {
        json_pretty_bytes(self)
    }

    fn encode_text(&self) -> Result<String> {
        Ok(format!(
            "export KUBECONFIG={}\nexport BB_K3D_PUBLICIP={}\nexport BB_K3D_PRIVATEIP={}",
            self.kubeconfig, self.bb_k3d_publicip, self.bb_k3d_privateip
        ))
    }
}
