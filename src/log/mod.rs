//! Logging client
//!
//! A thin, cloneable handle over a [`LogSink`]. Each level is routed through an
//! injectable function so tests (and callers that want to decorate records) can
//! swap individual operations with [`LoggingClient::clone_with_updates`].
//!
//! `error` never panics: it logs the record and hands back a
//! [`BbctlError::Fatal`] that the caller returns up to `main`.

mod setup;

pub use setup::{LogSettings, init_logging};

use crate::error::BbctlError;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key/value pairs attached to every record emitted by a client
pub type Attrs = Vec<(String, String)>;

/// Destination of log records
pub trait LogSink: Send + Sync {
    fn emit(&self, level: Level, message: &str, attrs: &[(String, String)]);

    fn enabled(&self, _level: Level) -> bool {
        true
    }
}

/// Shared sink handle; pooled clients are keyed by its identity
pub type Logger = Arc<dyn LogSink>;

/// Sink that forwards to the global `tracing` subscriber
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, level: Level, message: &str, attrs: &[(String, String)]) {
        let fields = format_attrs(attrs);
        match level {
            Level::Debug => tracing::debug!(attrs = %fields, "{}", message),
            Level::Info => tracing::info!(attrs = %fields, "{}", message),
            Level::Warn => tracing::warn!(attrs = %fields, "{}", message),
            Level::Error => tracing::error!(attrs = %fields, "{}", message),
        }
    }

    fn enabled(&self, level: Level) -> bool {
        match level {
            Level::Debug => tracing::enabled!(tracing::Level::DEBUG),
            Level::Info => tracing::enabled!(tracing::Level::INFO),
            Level::Warn => tracing::enabled!(tracing::Level::WARN),
            Level::Error => tracing::enabled!(tracing::Level::ERROR),
        }
    }
}

/// A captured record, used by [`MemorySink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub level: Level,
    pub message: String,
    pub attrs: Attrs,
}

/// Sink that keeps records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Messages logged at `level`, in order
    pub fn messages(&self, level: Level) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|r| r.level == level)
            .map(|r| r.message)
            .collect()
    }
}

impl LogSink for MemorySink {
    fn emit(&self, level: Level, message: &str, attrs: &[(String, String)]) {
        if let Ok(mut records) = self.records.lock() {
            records.push(Record {
                level,
                message: message.to_string(),
                attrs: attrs.to_vec(),
            });
        }
    }
}

/// The process-wide default sink
pub fn default_logger() -> Logger {
    static DEFAULT: OnceLock<Logger> = OnceLock::new();
    DEFAULT
        .get_or_init(|| Arc::new(TracingSink) as Logger)
        .clone()
}

fn format_attrs(attrs: &[(String, String)]) -> String {
    attrs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Injectable implementation of a single log level
pub type LogFn = Arc<dyn Fn(&Logger, &[(String, String)], &str) + Send + Sync>;

fn level_fn(level: Level) -> LogFn {
    Arc::new(move |logger: &Logger, attrs: &[(String, String)], msg: &str| {
        logger.emit(level, msg, attrs)
    })
}

/// Replacement functions for [`LoggingClient::clone_with_updates`]
#[derive(Default, Clone)]
pub struct LogFnOverrides {
    pub debug: Option<LogFn>,
    pub info: Option<LogFn>,
    pub warn: Option<LogFn>,
    pub error: Option<LogFn>,
}

/// Leveled, attribute-scoped logging handle
#[derive(Clone)]
pub struct LoggingClient {
    logger: Logger,
    attrs: Attrs,
    group: Option<String>,
    debug_fn: LogFn,
    info_fn: LogFn,
    warn_fn: LogFn,
    error_fn: LogFn,
}

impl fmt::Debug for LoggingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingClient")
            .field("attrs", &self.attrs)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

impl LoggingClient {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            attrs: Vec::new(),
            group: None,
            debug_fn: level_fn(Level::Debug),
            info_fn: level_fn(Level::Info),
            warn_fn: level_fn(Level::Warn),
            error_fn: level_fn(Level::Error),
        }
    }

    /// The sink this client writes to
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn enabled(&self, level: Level) -> bool {
        self.logger.enabled(level)
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        (self.debug_fn)(&self.logger, &self.attrs, msg.as_ref());
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        (self.info_fn)(&self.logger, &self.attrs, msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        (self.warn_fn)(&self.logger, &self.attrs, msg.as_ref());
    }

    /// Log at error level and return the fatal error to propagate
    pub fn error(&self, msg: impl AsRef<str>) -> BbctlError {
        let msg = msg.as_ref();
        (self.error_fn)(&self.logger, &self.attrs, msg);
        BbctlError::Fatal(msg.to_string())
    }

    pub fn log(&self, level: Level, msg: impl AsRef<str>) {
        match level {
            Level::Debug => self.debug(msg),
            Level::Info => self.info(msg),
            Level::Warn => self.warn(msg),
            Level::Error => {
                self.error(msg);
            }
        }
    }

    /// Derived client that attaches `key=value` to every record
    pub fn with(&self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        let mut next = self.clone();
        let key = match &self.group {
            Some(group) => format!("{}.{}", group, key.into()),
            None => key.into(),
        };
        next.attrs.push((key, value.to_string()));
        next
    }

    /// Derived client whose subsequent attribute keys are qualified by `name`
    pub fn with_group(&self, name: impl Into<String>) -> Self {
        let mut next = self.clone();
        let name = name.into();
        next.group = Some(match &self.group {
            Some(group) => format!("{}.{}", group, name),
            None => name,
        });
        next
    }

    pub fn clone_with_updates(&self, overrides: LogFnOverrides) -> Self {
        let mut next = self.clone();
        if let Some(f) = overrides.debug {
            next.debug_fn = f;
        }
        if let Some(f) = overrides.info {
            next.info_fn = f;
        }
        if let Some(f) = overrides.warn {
            next.warn_fn = f;
        }
        if let Some(f) = overrides.error {
            next.error_fn = f;
        }
        next
    }

    /// No-op for `None`. Otherwise logs `"{context}: {err}"` and calls `exit(1)`;
    /// without an exit function the fatal error is returned instead.
    pub fn handle_error(
        &self,
        context: &str,
        err: Option<&anyhow::Error>,
        exit: Option<&dyn Fn(i32)>,
    ) -> Result<(), BbctlError> {
        let Some(err) = err else {
            return Ok(());
        };
        let fatal = self.error(format!("{}: {:#}", context, err));
        match exit {
            Some(exit) => {
                exit(1);
                Ok(())
            }
            None => Err(fatal),
        }
    }
}

impl Default for LoggingClient {
    fn default() -> Self {
        Self::new(default_logger())
    }
}
