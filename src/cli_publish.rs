use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

mod cli_style;
use cli_style::get_styles;

use package_mirror_server::catalog_store::{PackageRef, SqliteCatalogStore};
use package_mirror_server::config::{self, HashVerification};
use package_mirror_server::content_store::{ArchiveUrlTemplate, ContentStore, HttpArchiveOrigin};
use package_mirror_server::publish::LocalPublisher;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

/// Publish a package archive directly into the local catalog of a mirror.
#[derive(Parser, Debug)]
#[command(styles=get_styles())]
struct CliArgs {
    /// Release to publish, as author/project@version.
    pub package: PackageRef,

    /// Path to the zip archive of the release.
    #[clap(value_parser = parse_path)]
    pub archive: PathBuf,

    /// Path to the mirror's TOML configuration file.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding catalog.db. Can also be specified in the config file.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// SHA-1 the archive is expected to hash to.
    #[clap(long)]
    pub expected_hash: Option<String>,

    /// Overrides the configured hash verification policy.
    #[clap(long)]
    pub hash_verification: Option<HashVerification>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .init();

    let file_config = match &cli_args.config {
        Some(path) => Some(config::FileConfig::load(path)?),
        None => None,
    };
    let cli_config = config::CliConfig {
        db_dir: cli_args.db_dir.clone(),
        ..Default::default()
    };
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;
    let verification = cli_args
        .hash_verification
        .unwrap_or(app_config.publish.hash_verification);

    let bytes = std::fs::read(&cli_args.archive)
        .with_context(|| format!("Failed to read archive {:?}", cli_args.archive))?;

    let catalog = Arc::new(SqliteCatalogStore::new(app_config.catalog_db_path())?);
    let origin = Arc::new(HttpArchiveOrigin::new(
        ArchiveUrlTemplate::new(app_config.sync.archive_origin.clone()),
        app_config.sync.archive_timeout_secs,
    )?);
    let publisher = LocalPublisher::new(
        ContentStore::new(app_config.archive_cache_dir.clone(), origin),
        catalog,
        verification,
    );

    info!(
        "Publishing {} from {:?} ({} bytes)",
        cli_args.package,
        cli_args.archive,
        bytes.len()
    );
    let receipt = publisher
        .publish(&cli_args.package, bytes, cli_args.expected_hash.as_deref())
        .await?;

    println!(
        "Published {} (package #{}{}, release #{})",
        cli_args.package,
        receipt.package_id,
        if receipt.package_created { ", new" } else { "" },
        receipt.release_id
    );
    Ok(())
}
