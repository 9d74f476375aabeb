//! `values` command

use crate::constants::BIG_BANG_NAMESPACE;
use crate::factory::{self, Factory};
use crate::output::{Outputable, json_bytes, yaml_bytes};
use anyhow::{Context, Result};
use clap::Args;
use serde_json::{Map, Value};

#[derive(Args, Debug)]
pub struct ValuesArgs {
    /// Helm release name in the bigbang namespace
    pub release: String,

    /// Include the chart default values
    #[arg(short = 'a', long = "all")]
    pub all: bool,
}

/// Release values rendered as-is
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValuesOutput(pub Map<String, Value>);

impl Outputable for ValuesOutput {
    fn encode_yaml(&self) -> Result<Vec<u8>> {
        yaml_bytes(&self.0)
    }

    fn encode_json(&self) -> Result<Vec<u8>> {
        json_bytes(&self.0)
    }

    fn encode_text(&self) -> Result<String> {
        Ok(crate::yamler::marshal(&self.0)?.trim_end().to_string())
    }
}

pub async fn run(factory: &dyn Factory, args: ValuesArgs) -> Result<()> {
    let output = factory::output_client(factory)?;
    let helm = factory
        .get_helm_client(BIG_BANG_NAMESPACE)
        .await
        .context("error getting helm client")?;
    let values = helm
        .get_values(&args.release, args.all)
        .await
        .with_context(|| format!("error getting helm release values in namespace {}", BIG_BANG_NAMESPACE))?;
    output.output(&ValuesOutput(values))
}

/// Release names in the bigbang namespace starting with `hint`
///
/// Lookup failures yield no candidates.
pub async fn matching_release_names(factory: &dyn Factory, hint: &str) -> Vec<String> {
    let Ok(helm) = factory.get_helm_client(BIG_BANG_NAMESPACE).await else {
        return Vec::new();
    };
    let Ok(releases) = helm.get_list().await else {
        return Vec::new();
    };
    releases
        .into_iter()
        .map(|r| r.name)
        .filter(|name| name.starts_with(hint))
        .collect()
}
