use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use package_mirror_server::background_jobs::create_scheduler;
use package_mirror_server::background_jobs::jobs::ReplicateUplinksJob;
use package_mirror_server::catalog_store::{CatalogStore, SqliteCatalogStore};
use package_mirror_server::config;
use package_mirror_server::content_store::{ArchiveUrlTemplate, ContentStore, HttpArchiveOrigin};
use package_mirror_server::ingestion::IngestionPipeline;
use package_mirror_server::metadata::{MetadataFetcher, MetadataSource};
use package_mirror_server::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig, ServerState};
use package_mirror_server::sync::SyncOrchestrator;
use package_mirror_server::uplink::{DeltaFetcher, HttpUplinkApi};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.is_dir() {
        return Err(format!("Not an existing directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding catalog.db and, unless configured otherwise, the archive cache.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 8000)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Registry to replicate from. Repeat for several uplinks.
    #[clap(long = "uplink")]
    pub uplinks: Vec<String>,

    /// Seconds between two replication cycles.
    #[clap(long)]
    pub sync_interval_secs: Option<u64>,

    /// Where release documents are read from during replication.
    #[clap(long)]
    pub metadata_source: Option<MetadataSource>,
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            uplinks: args.uplinks.clone(),
            sync_interval_secs: args.sync_interval_secs,
            metadata_source: args.metadata_source,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  archive_cache_dir: {:?}", app_config.archive_cache_dir);
    info!("  uplinks: {:?}", app_config.uplinks);
    info!(
        "  sync: every {}s, metadata from {:?}",
        app_config.sync.interval_secs, app_config.sync.metadata_source
    );

    if !app_config.catalog_db_path().exists() {
        info!(
            "Creating new catalog database at {:?}",
            app_config.catalog_db_path()
        );
    }
    let catalog_store = Arc::new(SqliteCatalogStore::new(app_config.catalog_db_path())?);
    for url in &app_config.uplinks {
        let uplink = catalog_store.ensure_uplink(url)?;
        info!("Uplink #{} {} at cursor {}", uplink.id, uplink.url, uplink.cursor);
    }

    info!("Initializing metrics...");
    metrics::init_metrics();
    metrics::init_catalog_metrics(catalog_store.count_releases()?);

    let archive_urls = ArchiveUrlTemplate::new(app_config.sync.archive_origin.clone());
    let uplink_api = Arc::new(HttpUplinkApi::new(app_config.sync.request_timeout_secs)?);
    let origin = Arc::new(HttpArchiveOrigin::new(
        archive_urls.clone(),
        app_config.sync.archive_timeout_secs,
    )?);
    let pipeline = IngestionPipeline::new(
        ContentStore::new(app_config.archive_cache_dir.clone(), origin),
        MetadataFetcher::new(uplink_api.clone(), app_config.sync.metadata_source),
        catalog_store.clone(),
    );
    let orchestrator = Arc::new(SyncOrchestrator::new(
        catalog_store.clone(),
        DeltaFetcher::new(uplink_api),
        pipeline,
    ));

    let shutdown_token = CancellationToken::new();
    let (mut scheduler, scheduler_handle) = create_scheduler(shutdown_token.clone());
    if app_config.uplinks.is_empty() {
        info!("No uplinks configured, serving the local catalog only");
    } else {
        scheduler
            .register_job(Arc::new(ReplicateUplinksJob::from_settings(
                orchestrator,
                &app_config.sync,
            )))
            .await;
    }
    info!(
        "Job scheduler initialized with {} job(s)",
        scheduler.job_count().await
    );
    let scheduler_task = tokio::spawn(async move { scheduler.run().await });

    let state = ServerState::new(
        ServerConfig {
            requests_logging_level: app_config.logging_level.clone(),
            port: app_config.port,
            metrics_port: app_config.metrics_port,
        },
        catalog_store,
        archive_urls,
        Some(scheduler_handle),
    );

    let result = tokio::select! {
        result = run_server(state, shutdown_token.clone()) => {
            info!("HTTP server stopped: {:?}", result);
            result
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            Ok(())
        }
    };

    shutdown_token.cancel();
    if let Err(e) = scheduler_task.await {
        error!("Job scheduler task failed: {}", e);
    }
    result
}
