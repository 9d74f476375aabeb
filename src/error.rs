//! Error kinds surfaced by bbctl
//!
//! Most code paths propagate `anyhow::Error` with context. The variants here are
//! the kinds callers (and tests) need to match on, so they are kept as a typed enum
//! and converted into `anyhow` at the boundaries.

use thiserror::Error;

/// Typed error kinds shared across subsystems
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BbctlError {
    /// The pooled factory has no underlying factory and nothing cached
    #[error("factory not initialized")]
    FactoryNotInitialized,

    #[error("unable to get config client: {0}")]
    ConfigClientUnavailable(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("no such field: {0}")]
    NoSuchField(String),

    #[error("invalid key")]
    InvalidKey,

    #[error("too many arguments passed to bbctl config")]
    TooManyArguments,

    #[error("either --gatekeeper or --kyverno must be specified, but not both")]
    AmbiguousPolicyEngine,

    #[error("not implemented")]
    NotImplemented,

    /// Helm storage holds no revision of the requested release
    #[error("release: not found")]
    ReleaseNotFound,

    /// A fatal log record; the message has already been logged
    #[error("{0}")]
    Fatal(String),
}

/// Returns true when the error chain contains the given kind
pub fn is_kind(err: &anyhow::Error, kind: &BbctlError) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<BbctlError>() == Some(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            BbctlError::FactoryNotInitialized.to_string(),
            "factory not initialized"
        );
        assert_eq!(
            BbctlError::UnsupportedFormat("xml".into()).to_string(),
            "unsupported format: xml"
        );
        assert_eq!(
            BbctlError::NoSuchField("foo".into()).to_string(),
            "no such field: foo"
        );
    }

    #[test]
    fn test_is_kind_through_context() {
        let err = Err::<(), _>(BbctlError::FactoryNotInitialized)
            .context("error getting helm client")
            .unwrap_err();
        assert!(is_kind(&err, &BbctlError::FactoryNotInitialized));
        assert!(!is_kind(&err, &BbctlError::InvalidKey));
    }
}
