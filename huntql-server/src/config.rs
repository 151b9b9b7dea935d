use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use color_eyre::eyre::{Context, Result, bail};
use huntql_translate::Dialect;
use serde::Deserialize;

use crate::humantime_utils::deserialize_duration;

const DEFAULT_RELOAD_CHECK_INTERVAL: Duration = Duration::from_secs(30);

fn default_reload_check_interval() -> Duration {
    DEFAULT_RELOAD_CHECK_INTERVAL
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Schema snapshot file per dialect.
    pub schemas: BTreeMap<Dialect, PathBuf>,

    /// How often a snapshot file is checked for changes.
    #[serde(
        default = "default_reload_check_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub reload_check_interval: Duration,
}

impl Config {
    /// A config serving a single dialect, without a config file.
    pub fn single(dialect: Dialect, schema: PathBuf) -> Self {
        Self {
            schemas: BTreeMap::from([(dialect, schema)]),
            reload_check_interval: DEFAULT_RELOAD_CHECK_INTERVAL,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    parse_config(&content, base_dir)
        .with_context(|| format!("failed to parse config: {}", path.display()))
}

/// Parses a config, resolving relative schema paths against `base_dir`.
pub fn parse_config(content: &str, base_dir: &Path) -> Result<Config> {
    let mut config: Config = serde_json::from_str(content)?;
    if config.schemas.is_empty() {
        bail!("config must declare at least one schema");
    }

    for path in config.schemas.values_mut() {
        if path.is_relative() {
            *path = base_dir.join(&*path);
        }
    }

    Ok(config)
}
