//! Config file locations
//!
//! `config.yaml` is searched for in, in order:
//! - the working directory and `./.bbctl`
//! - `~/.bbctl`
//! - `$XDG_CONFIG_HOME/bbctl` (or `~/.config/bbctl`)
//! - `/etc/bbctl`

use anyhow::{Result, anyhow};
use directories::BaseDirs;
use std::path::{Path, PathBuf};

/// Name of the per-user settings directory under the home directory
pub const BBCTL_DIR: &str = ".bbctl";

fn home_dir() -> Result<PathBuf> {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .ok_or_else(|| anyhow!("error getting user home directory"))
}

/// Directories searched for `config.yaml`, highest priority first
pub fn config_search_dirs() -> Result<Vec<PathBuf>> {
    let home = home_dir()?;
    let xdg = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home.join(".config"));
    Ok(search_dirs_from(&home, &xdg))
}

pub(crate) fn search_dirs_from(home: &Path, xdg_config_home: &Path) -> Vec<PathBuf> {
    vec![
        PathBuf::from("."),
        PathBuf::from(".").join(BBCTL_DIR),
        home.join(BBCTL_DIR),
        xdg_config_home.join("bbctl"),
        PathBuf::from("/etc/bbctl"),
    ]
}

/// `~/.bbctl/config.yaml`, where `config init` writes
pub fn default_config_path(home: &Path) -> PathBuf {
    home.join(BBCTL_DIR).join("config.yaml")
}

/// `~/.bbctl/credentials.yaml`
pub fn default_credentials_path(home: &Path) -> PathBuf {
    home.join(BBCTL_DIR).join("credentials.yaml")
}
