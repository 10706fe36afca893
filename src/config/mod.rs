mod file_config;

pub use file_config::{FileConfig, PublishConfig, SyncConfig, UplinkConfig};

use crate::content_store::DEFAULT_ARCHIVE_ORIGIN;
use crate::metadata::MetadataSource;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use serde::Deserialize;
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub uplinks: Vec<String>,
    pub sync_interval_secs: Option<u64>,
    pub metadata_source: Option<MetadataSource>,
}

/// What to do with the expected content hash given to a local publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum HashVerification {
    /// Never compare hashes
    Disabled,
    /// Compare when an expected hash is given
    #[default]
    IfProvided,
    /// Refuse to publish without a matching expected hash
    Required,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub archive_cache_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,

    /// Base URLs of the registries to replicate from, without trailing slash
    pub uplinks: Vec<String>,
    pub sync: SyncSettings,
    pub publish: PublishSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub interval_secs: u64,
    pub run_on_startup: bool,
    pub metadata_source: MetadataSource,
    pub request_timeout_secs: u64,
    pub archive_timeout_secs: u64,
    pub archive_origin: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            run_on_startup: true,
            metadata_source: MetadataSource::Http,
            request_timeout_secs: 30,
            archive_timeout_secs: 120,
            archive_origin: DEFAULT_ARCHIVE_ORIGIN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishSettings {
    pub hash_verification: HashVerification,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let archive_cache_dir = file
            .archive_cache_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| db_dir.join("archives"));

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        if port == metrics_port && port != 0 {
            bail!("port and metrics_port must differ, both are {}", port);
        }

        let logging_level = match file.logging_level {
            Some(level) => parse_logging_level(&level)
                .ok_or_else(|| anyhow::anyhow!("Unknown logging_level: {}", level))?,
            None => cli.logging_level.clone(),
        };

        let uplink_urls: Vec<String> = match file.uplinks {
            Some(uplinks) => uplinks.into_iter().map(|u| u.url).collect(),
            None => cli.uplinks.clone(),
        };
        let mut uplinks: Vec<String> = Vec::with_capacity(uplink_urls.len());
        for url in uplink_urls {
            let url = normalize_uplink_url(&url)?;
            if !uplinks.contains(&url) {
                uplinks.push(url);
            }
        }

        let sync_file = file.sync.unwrap_or_default();
        let defaults = SyncSettings::default();
        let sync = SyncSettings {
            interval_secs: sync_file
                .interval_secs
                .or(cli.sync_interval_secs)
                .unwrap_or(defaults.interval_secs),
            run_on_startup: sync_file.run_on_startup.unwrap_or(defaults.run_on_startup),
            metadata_source: sync_file
                .metadata_source
                .or(cli.metadata_source)
                .unwrap_or(defaults.metadata_source),
            request_timeout_secs: sync_file
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            archive_timeout_secs: sync_file
                .archive_timeout_secs
                .unwrap_or(defaults.archive_timeout_secs),
            archive_origin: sync_file.archive_origin.unwrap_or(defaults.archive_origin),
        };
        if sync.interval_secs == 0 {
            bail!("sync interval_secs must be greater than zero");
        }
        for placeholder in ["{author}", "{project}", "{version}"] {
            if !sync.archive_origin.contains(placeholder) {
                bail!(
                    "archive_origin {} is missing the {} placeholder",
                    sync.archive_origin,
                    placeholder
                );
            }
        }

        let publish = PublishSettings {
            hash_verification: file
                .publish
                .and_then(|p| p.hash_verification)
                .unwrap_or_default(),
        };

        Ok(Self {
            db_dir,
            archive_cache_dir,
            port,
            metrics_port,
            logging_level,
            uplinks,
            sync,
            publish,
        })
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.db_dir.join("catalog.db")
    }
}

fn normalize_uplink_url(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url.trim())
        .map_err(|e| anyhow::anyhow!("Invalid uplink url {}: {}", url, e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("Uplink url {} must be http or https", url);
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli_with_dir(dir: &TempDir) -> CliConfig {
        CliConfig {
            db_dir: Some(dir.path().to_path_buf()),
            port: 8000,
            metrics_port: 9091,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_logging_level() {
        assert!(matches!(
            parse_logging_level("none"),
            Some(RequestsLoggingLevel::None)
        ));
        assert!(matches!(
            parse_logging_level("PATH"),
            Some(RequestsLoggingLevel::Path)
        ));
        assert!(matches!(
            parse_logging_level("headers"),
            Some(RequestsLoggingLevel::Headers)
        ));
        assert!(parse_logging_level("body").is_none());
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            logging_level: RequestsLoggingLevel::Headers,
            uplinks: vec![
                "https://package.elm-lang.org/".to_string(),
                "http://mirror.local:8000".to_string(),
            ],
            sync_interval_secs: Some(60),
            metadata_source: Some(MetadataSource::Archive),
            ..cli_with_dir(&temp_dir)
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.archive_cache_dir, temp_dir.path().join("archives"));
        assert_eq!(config.catalog_db_path(), temp_dir.path().join("catalog.db"));
        assert_eq!(config.port, 8000);
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Headers);
        assert_eq!(
            config.uplinks,
            vec![
                "https://package.elm-lang.org".to_string(),
                "http://mirror.local:8000".to_string()
            ]
        );
        assert_eq!(config.sync.interval_secs, 60);
        assert_eq!(config.sync.metadata_source, MetadataSource::Archive);
        assert!(config.sync.run_on_startup);
        assert_eq!(config.sync.archive_origin, DEFAULT_ARCHIVE_ORIGIN);
        assert_eq!(
            config.publish.hash_verification,
            HashVerification::IfProvided
        );
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/should/be/overridden")),
            uplinks: vec!["http://cli.example".to_string()],
            sync_interval_secs: Some(60),
            ..cli_with_dir(&temp_dir)
        };

        let file_config = FileConfig {
            db_dir: Some(temp_dir.path().to_string_lossy().to_string()),
            port: Some(4000),
            logging_level: Some("none".to_string()),
            uplinks: Some(vec![UplinkConfig {
                url: "http://file.example".to_string(),
            }]),
            sync: Some(SyncConfig {
                interval_secs: Some(900),
                run_on_startup: Some(false),
                ..Default::default()
            }),
            publish: Some(PublishConfig {
                hash_verification: Some(HashVerification::Required),
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.port, 4000);
        assert_eq!(config.logging_level, RequestsLoggingLevel::None);
        assert_eq!(config.uplinks, vec!["http://file.example".to_string()]);
        assert_eq!(config.sync.interval_secs, 900);
        assert!(!config.sync.run_on_startup);
        assert_eq!(config.publish.hash_verification, HashVerification::Required);
        // CLI value used when TOML doesn't specify
        assert_eq!(config.metrics_port, 9091);
    }

    #[test]
    fn test_resolve_deduplicates_uplinks() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            uplinks: vec![
                "http://up.example".to_string(),
                "http://up.example/".to_string(),
            ],
            ..cli_with_dir(&temp_dir)
        };

        let config = AppConfig::resolve(&cli, None).unwrap();
        assert_eq!(config.uplinks, vec!["http://up.example".to_string()]);
    }

    #[test]
    fn test_resolve_rejects_bad_uplink() {
        let temp_dir = TempDir::new().unwrap();
        for url in ["not a url", "ftp://up.example"] {
            let cli = CliConfig {
                uplinks: vec![url.to_string()],
                ..cli_with_dir(&temp_dir)
            };
            assert!(AppConfig::resolve(&cli, None).is_err(), "{}", url);
        }
    }

    #[test]
    fn test_resolve_rejects_incomplete_archive_origin() {
        let temp_dir = TempDir::new().unwrap();
        let file_config = FileConfig {
            sync: Some(SyncConfig {
                archive_origin: Some("http://archives.local/{author}/{project}.zip".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let err = AppConfig::resolve(&cli_with_dir(&temp_dir), Some(file_config)).unwrap_err();
        assert!(err.to_string().contains("{version}"));
    }

    #[test]
    fn test_resolve_missing_db_dir_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_dir must be specified"));
    }

    #[test]
    fn test_resolve_nonexistent_db_dir_error() {
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/nonexistent/path/that/should/not/exist")),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_resolve_db_dir_not_directory_error() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(temp_file.path().to_path_buf()),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("not a directory"));
    }

    #[test]
    fn test_resolve_rejects_zero_interval() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            sync_interval_secs: Some(0),
            ..cli_with_dir(&temp_dir)
        };
        assert!(AppConfig::resolve(&cli, None).is_err());
    }
}
