//! Configuration system for bbctl
//!
//! Flags, environment variables and `config.yaml` are layered by the
//! [`Resolver`] and materialized into a typed [`GlobalConfiguration`] by the
//! [`ConfigClient`].

pub mod client;
pub mod lookup;
pub mod paths;
pub mod resolver;
pub mod schema;

pub use client::ConfigClient;
pub use lookup::find_config;
pub use resolver::Resolver;
pub use schema::GlobalConfiguration;
