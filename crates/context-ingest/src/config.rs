//! Engine configuration, loaded once at startup and passed by reference.
//!
//! Per-job import options are a separate concern (see [`crate::options`]);
//! this file only covers process-level settings: where the database
//! lives and where repository clones are cached.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    /// Directory for repository clone caches. Defaults to a sibling of
    /// the database file.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self { dir: None }
    }
}

impl Config {
    /// Where repository clones are cached.
    pub fn repo_cache_dir(&self) -> PathBuf {
        match &self.workspace.dir {
            Some(dir) => dir.join("repo-cache"),
            None => {
                let parent = self.db.path.parent().unwrap_or_else(|| Path::new("."));
                parent.join("repo-cache")
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.db.path.as_os_str().is_empty() {
        anyhow::bail!("db.path must not be empty");
    }

    Ok(config)
}
