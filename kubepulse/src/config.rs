//! User configuration, read from YAML.
//!
//! The file is taken from `KUBEPULSE_CONFIG` when set, otherwise from
//! `<config dir>/kubepulse/config.yaml`. A missing file means defaults.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    error::{Error, Result},
    live::DisplayToggles,
    orchestrator::SortMode,
};

pub const CONFIG_ENV: &str = "KUBEPULSE_CONFIG";
const APP_DIR: &str = "kubepulse";
const CONFIG_FILE_NAME: &str = "config.yaml";

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub refresh_interval_secs: u64,
    /// Rows kept in the node view, 0 for all.
    pub node_limit: usize,
    /// Rows kept in every other view, 0 for all.
    pub pod_limit: usize,
    pub max_concurrent: usize,
    pub sort: SortMode,
    pub cache: CacheConfig,
    pub log_dir: Option<PathBuf>,
    /// Kubeconfig context; the current context when unset.
    pub context: Option<String>,
    pub toggles: DisplayToggles,
    /// How long to wait for the initial watch sync.
    pub sync_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 5,
            node_limit: 0,
            pod_limit: 100,
            max_concurrent: 10,
            sort: SortMode::Status,
            cache: CacheConfig::default(),
            log_dir: None,
            context: None,
            toggles: DisplayToggles::default(),
            sync_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 6 * 60 * 60,
            path: None,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Config {
    /// Loads from the environment-selected or default location.
    pub fn load() -> Result<Self> {
        match config_path(std::env::var(CONFIG_ENV).ok()) {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::config(format!("failed to read {}: {e}", path.display()))),
        };
        Self::parse_yaml(&raw).map_err(|e| Error::config(format!("{}: {e}", path.display())))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Self::parse_yaml(raw).map_err(|e| Error::config(e.to_string()))
    }

    fn parse_yaml(raw: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Never shorter than one second.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs.max(1))
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.max(1)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|d| d.join(APP_DIR)))
            .unwrap_or_else(|| std::env::temp_dir().join(APP_DIR))
    }

    /// Disk location of the cloud metadata cache, or `None` for memory only.
    pub fn cache_path(&self) -> Option<PathBuf> {
        if !self.cache.enabled {
            return None;
        }
        self.cache
            .path
            .clone()
            .or_else(crate::cloud::CloudMetadataCache::default_path)
    }
}

fn config_path(from_env: Option<String>) -> Option<PathBuf> {
    match from_env.filter(|p| !p.is_empty()) {
        Some(p) => Some(PathBuf::from(p)),
        None => dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE_NAME)),
    }
}
