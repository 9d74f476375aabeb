//! Global subscriber installation

use anyhow::{Context, Result, anyhow, bail};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Logging options resolved from `bbctl-log-*` settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub format: String,
    pub output: String,
    pub file: String,
    pub add_source: bool,
}

impl LogSettings {
    /// Validated filter directive for the configured level
    ///
    /// Empty defaults to `warn`; the second element reports whether the default was used.
    pub fn level_directive(&self) -> Result<(&'static str, bool)> {
        match self.level.as_str() {
            "debug" => Ok(("debug", false)),
            "info" => Ok(("info", false)),
            "warn" => Ok(("warn", false)),
            "error" => Ok(("error", false)),
            "" => Ok(("warn", true)),
            other => bail!("invalid log level: {}", other),
        }
    }

    fn json(&self) -> Result<bool> {
        match self.format.as_str() {
            "json" => Ok(true),
            "text" | "" => Ok(false),
            other => bail!("invalid log format: {}", other),
        }
    }

    fn writer(&self) -> Result<BoxMakeWriter> {
        match self.output.as_str() {
            "stdout" => Ok(BoxMakeWriter::new(std::io::stdout)),
            "stderr" | "" => Ok(BoxMakeWriter::new(std::io::stderr)),
            "file" => {
                if self.file.is_empty() {
                    bail!("log file not defined");
                }
                let path = PathBuf::from(&self.file);
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("error opening log file: {}", path.display()))?;
                Ok(BoxMakeWriter::new(std::sync::Mutex::new(file)))
            }
            other => bail!("invalid log output: {}", other),
        }
    }
}

/// Install the global `tracing` subscriber
///
/// `RUST_LOG` takes precedence over the configured level when it is set.
pub fn init_logging(settings: &LogSettings) -> Result<()> {
    let (level, defaulted) = settings.level_directive()?;
    let json = settings.json()?;
    let writer = settings.writer()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_writer(writer)
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_file(settings.add_source)
        .with_line_number(settings.add_source);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow!("error setting up logger: {}", e))?;

    if defaulted {
        tracing::warn!("No log level defined, defaulting to warn");
    }
    tracing::debug!("Logger setup complete");
    Ok(())
}
