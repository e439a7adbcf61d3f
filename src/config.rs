use crate::services::virtual_desktop::default_candidate_names;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ROOT: &str = "~/VirtualDesktops";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    /// Pins the folder restored when leaving; detected and remembered when unset.
    #[serde(default)]
    pub original_desktop: Option<PathBuf>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_refresh_poll_interval_ms")]
    pub refresh_poll_interval_ms: u64,
    #[serde(default = "default_refresh_max_attempts")]
    pub refresh_max_attempts: u32,
    /// Virtual desktop interface layouts to try, in order.
    #[serde(default = "default_candidate_names")]
    pub binding_candidates: Vec<String>,
}

fn default_log_level() -> String {
    "warn".to_owned()
}

fn default_storage_root() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT)
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_refresh_poll_interval_ms() -> u64 {
    100
}

fn default_refresh_max_attempts() -> u32 {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            storage_root: default_storage_root(),
            original_desktop: None,
            poll_interval_ms: default_poll_interval_ms(),
            refresh_poll_interval_ms: default_refresh_poll_interval_ms(),
            refresh_max_attempts: default_refresh_max_attempts(),
            binding_candidates: default_candidate_names(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn refresh_poll_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_poll_interval_ms)
    }

    /// Paths with `~` expanded.
    fn expanded(mut self) -> Self {
        self.storage_root = expand(&self.storage_root);
        self.original_desktop = self.original_desktop.as_deref().map(expand);
        self
    }
}

fn expand(path: &Path) -> PathBuf {
    shellexpand::path::tilde(path).into_owned()
}

pub fn default_config_path() -> PathBuf {
    expand(Path::new(DEFAULT_ROOT)).join(CONFIG_FILE)
}

/// Reads the configuration at `path`. A missing file means defaults; a malformed one is an error.
pub fn read_config(path: &Path) -> Result<Config> {
    let config = match fs::read_to_string(path) {
        Ok(content) => {
            log::info!("Reading config file {}", path.display());
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Config::default(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    Ok(config.expanded())
}
