//! Filesystem access
//!
//! Every file bbctl reads or writes outside of the config search goes through a
//! [`FileSystemClient`] so commands can be exercised against a scratch directory.

use anyhow::{Context, Result, anyhow};
use directories::BaseDirs;
use std::path::{Path, PathBuf};

pub trait FileSystemClient: Send + Sync {
    /// The current user's home directory
    fn user_home_dir(&self) -> Result<PathBuf>;

    /// Create (or truncate) `path`, creating parent directories as needed
    fn create(&self, path: &Path) -> Result<Box<dyn std::io::Write + Send>>;

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let mut file = self.create(path)?;
        file.write_all(contents)
            .with_context(|| format!("error writing file: {}", path.display()))?;
        Ok(())
    }

    fn read_to_string(&self, path: &Path) -> Result<String>;
}

/// The host filesystem
#[derive(Debug, Default, Clone)]
pub struct OsFileSystem;

impl FileSystemClient for OsFileSystem {
    fn user_home_dir(&self) -> Result<PathBuf> {
        BaseDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .ok_or_else(|| anyhow!("unable to determine user home directory"))
    }

    fn create(&self, path: &Path) -> Result<Box<dyn std::io::Write + Send>> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("error creating directory: {}", parent.display()))?;
        }
        let file = std::fs::File::create(path)
            .with_context(|| format!("error creating file: {}", path.display()))?;
        Ok(Box::new(file))
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path)
            .with_context(|| format!("error reading file: {}", path.display()))
    }
}
