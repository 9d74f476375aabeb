//! Per-command output schemas

pub mod deploy;
pub mod k3d;
pub mod list;
pub mod policy;
pub mod preflight;
pub mod status;
pub mod version;
pub mod violations;

pub use deploy::{BigbangOutput, FluxOutput, FluxOutputData, HelmOutput};
pub use k3d::{HostsOutput, K3dOutput, K3dOutputData, ShellProfileOutput};
pub use list::{HelmReleaseOutput, HelmReleaseTableOutput};
pub use policy::{CrdPolicyOutput, PolicyListOutput, PolicyOutput};
pub use preflight::{CheckStepOutput, PreflightCheckOutput};
pub use status::{CheckStatusOutput, StatusOutput};
pub use version::{BIG_BANG_PACKAGE, CLI_PACKAGE, PackageVersion, VersionOutput};
pub use violations::{Violation, ViolationsOutput};

/// Pad every column but the last to its widest cell, joined by tabs
pub(crate) fn render_table(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|i| {
            rows.iter()
                .filter_map(|r| r.get(i))
                .map(|c| c.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();
    rows.iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(i, cell)| {
                    if i + 1 == row.len() {
                        cell.clone()
                    } else {
                        format!("{:<width$}", cell, width = widths[i])
                    }
                })
                .collect::<Vec<_>>()
                .join("\t")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
