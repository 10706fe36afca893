use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use super::HashVerification;
use crate::metadata::MetadataSource;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub archive_cache_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,

    pub sync: Option<SyncConfig>,
    pub uplinks: Option<Vec<UplinkConfig>>,
    pub publish: Option<PublishConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_secs: Option<u64>,
    pub run_on_startup: Option<bool>,
    pub metadata_source: Option<MetadataSource>,
    pub request_timeout_secs: Option<u64>,
    pub archive_timeout_secs: Option<u64>,
    pub archive_origin: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UplinkConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PublishConfig {
    pub hash_verification: Option<HashVerification>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
