use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::PrepError;
use crate::fetch::FetchSettings;
use crate::toolchain::{DEFAULT_LINK_NAME, ToolchainLink};

pub const CONFIG_FILE: &str = "bench-prep.json";
pub const DATASET_URL_ENV: &str = "BENCH_PREP_DATASET_URL";
pub const DEFAULT_INPUT: &str = "dataset.zip";
pub const DEFAULT_DATASET_ROOT: &str = "dataset";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub default_input: Option<Utf8PathBuf>,
    #[serde(default)]
    pub dataset_root: Option<Utf8PathBuf>,
    #[serde(default)]
    pub dataset_url: Option<String>,
    #[serde(default)]
    pub toolchain_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub toolchain_link_name: Option<String>,
    #[serde(default)]
    pub fetch: Option<FetchConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub retries: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub default_input: Utf8PathBuf,
    pub dataset_root: Utf8PathBuf,
    pub dataset_url: Option<String>,
    pub toolchain: Option<ToolchainLink>,
    pub fetch: FetchSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `bench-prep.json` in the working directory when no path
    /// is given. Only an explicitly named file is required to exist.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, PrepError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| PrepError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| PrepError::ConfigParse(err.to_string()))?
        };

        let mut resolved = Self::resolve_config(config);
        if let Ok(url) = std::env::var(DATASET_URL_ENV) {
            if !url.trim().is_empty() {
                resolved.dataset_url = Some(url.trim().to_string());
            }
        }
        Ok(resolved)
    }

    pub fn resolve_config(config: Config) -> ResolvedConfig {
        let defaults = FetchSettings::default();
        let fetch = config.fetch.unwrap_or_default();
        let link_name = config
            .toolchain_link_name
            .unwrap_or_else(|| DEFAULT_LINK_NAME.to_string());

        ResolvedConfig {
            default_input: config
                .default_input
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_INPUT)),
            dataset_root: config
                .dataset_root
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_DATASET_ROOT)),
            dataset_url: config.dataset_url.filter(|url| !url.trim().is_empty()),
            toolchain: config
                .toolchain_dir
                .map(|dir| ToolchainLink::new(dir).with_link_name(link_name)),
            fetch: FetchSettings {
                retries: fetch.retries.unwrap_or(defaults.retries),
                timeout: fetch
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.timeout),
            },
        }
    }
}
