//! Big Bang Control library
//!
//! Everything behind the `bbctl` binary: configuration resolution, the client
//! factory, output encoding and the cluster inspection features. It is also
//! used directly by the integration tests through [`fakes::FakeFactory`].

pub mod aws;
pub mod cli;
pub mod command;
pub mod config;
pub mod constants;
pub mod credential_helper;
pub mod error;
pub mod factory;
pub mod fakes;
pub mod filesystem;
pub mod gitlab;
pub mod helm;
pub mod ironbank;
pub mod kube;
pub mod log;
pub mod output;
pub mod policy;
pub mod preflight;
pub mod status;
pub mod streams;
pub mod update;
pub mod violations;
pub mod yamler;

// Re-export commonly used types for convenience
pub use config::{ConfigClient, GlobalConfiguration, Resolver};
pub use error::BbctlError;
pub use factory::{DefaultFactory, Factory, PooledFactory};
pub use output::{Format, OutputClient, Outputable};
pub use streams::IoStreams;
