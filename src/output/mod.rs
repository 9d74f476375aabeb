//! Output encoding
//!
//! Every command result implements [`Outputable`]; the [`OutputClient`] picks
//! one of its three encoders based on the configured format tag and writes the
//! bytes to the command's output stream.

pub mod schemas;

use crate::error::BbctlError;
use crate::streams::{IoStreams, SharedWriter, write_locked};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Supported output encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Text,
    Json,
    Yaml,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Text => "text",
            Format::Json => "json",
            Format::Yaml => "yaml",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = BbctlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            "yaml" => Ok(Format::Yaml),
            other => Err(BbctlError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// A value that can be rendered in every output format
///
/// Encoders must be deterministic for a given value.
pub trait Outputable {
    fn encode_yaml(&self) -> Result<Vec<u8>>;
    fn encode_json(&self) -> Result<Vec<u8>>;
    fn encode_text(&self) -> Result<String>;
}

/// YAML encoding of any serializable value
pub fn yaml_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(crate::yamler::marshal(value)?.into_bytes())
}

/// Compact JSON encoding of any serializable value
pub fn json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Indented JSON encoding of any serializable value
pub fn json_pretty_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(value)?)
}

/// Writes [`Outputable`] values to a stream in one format
#[derive(Clone)]
pub struct OutputClient {
    format: String,
    writer: SharedWriter,
}

impl fmt::Debug for OutputClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputClient")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl OutputClient {
    /// The format tag is validated when output is written, not here
    pub fn new(format: impl Into<String>, streams: &IoStreams) -> Self {
        Self {
            format: format.into(),
            writer: streams.out.clone(),
        }
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn output(&self, data: &dyn Outputable) -> Result<()> {
        match self.format.parse::<Format>()? {
            Format::Text => {
                let text = data
                    .encode_text()
                    .context("unable to write human-readable output")?;
                write_locked(&self.writer, format!("{}\n", text).as_bytes())
                    .context("unable to write human-readable output")
            }
            Format::Json => {
                let bytes = data.encode_json().context("unable to write JSON output")?;
                write_locked(&self.writer, &bytes).context("unable to write JSON output")
            }
            Format::Yaml => {
                let bytes = data.encode_yaml().context("unable to write YAML output")?;
                write_locked(&self.writer, &bytes).context("unable to write YAML output")
            }
        }
    }
}

/// Free-form key/value output
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BasicOutput {
    pub vals: BTreeMap<String, serde_json::Value>,
}

impl BasicOutput {
    pub fn single(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        let mut vals = BTreeMap::new();
        vals.insert(key.into(), value.into());
        Self { vals }
    }
}

impl Outputable for BasicOutput {
    fn encode_yaml(&self) -> Result<Vec<u8>> {
        yaml_bytes(&self.vals)
    }

    fn encode_json(&self) -> Result<Vec<u8>> {
        json_bytes(&self.vals)
    }

    fn encode_text(&self) -> Result<String> {
        Ok(self
            .vals
            .iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("{}: {}", k, s),
                other => format!("{}: {}", k, other),
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
