//! Test mirror lifecycle management
//!
//! Each test gets an isolated mirror with its own catalog database and
//! archive cache, wired to real HTTP uplinks the way `mirror-server` is.

use super::constants::*;
use package_mirror_server::background_jobs::create_scheduler;
use package_mirror_server::background_jobs::jobs::ReplicateUplinksJob;
use package_mirror_server::catalog_store::{CatalogStore, SqliteCatalogStore};
use package_mirror_server::config::{HashVerification, SyncSettings};
use package_mirror_server::content_store::{ArchiveUrlTemplate, ContentStore, HttpArchiveOrigin};
use package_mirror_server::ingestion::IngestionPipeline;
use package_mirror_server::metadata::{MetadataFetcher, MetadataSource};
use package_mirror_server::publish::LocalPublisher;
use package_mirror_server::server::{make_app, serve, RequestsLoggingLevel, ServerConfig, ServerState};
use package_mirror_server::sync::{CycleReport, SyncOrchestrator};
use package_mirror_server::uplink::{DeltaFetcher, HttpUplinkApi};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub struct MirrorOptions {
    pub uplinks: Vec<String>,
    pub archive_template: String,
    pub metadata_source: MetadataSource,
    pub request_timeout_secs: u64,
    pub archive_timeout_secs: u64,
}

impl MirrorOptions {
    pub fn new(uplinks: &[&str], archive_template: &str) -> Self {
        Self {
            uplinks: uplinks.iter().map(|u| u.to_string()).collect(),
            archive_template: archive_template.to_string(),
            metadata_source: MetadataSource::Http,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            archive_timeout_secs: REQUEST_TIMEOUT_SECS,
        }
    }

    pub fn timeouts(mut self, request_secs: u64, archive_secs: u64) -> Self {
        self.request_timeout_secs = request_secs;
        self.archive_timeout_secs = archive_secs;
        self
    }

    pub fn metadata_source(mut self, source: MetadataSource) -> Self {
        self.metadata_source = source;
        self
    }
}

/// A running mirror with isolated storage
///
/// When dropped, the server and its scheduler shut down and temp resources
/// are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Direct catalog access for assertions
    pub catalog: Arc<SqliteCatalogStore>,

    pub archive_cache_dir: PathBuf,

    orchestrator: Arc<SyncOrchestrator>,
    content: ContentStore,
    shutdown: CancellationToken,
    _temp_dir: TempDir,
}

impl TestServer {
    /// Spawns a mirror on a random port
    ///
    /// Uplinks are registered but nothing is replicated until [`sync`] is
    /// called or the replication job is triggered over HTTP.
    ///
    /// [`sync`]: TestServer::sync
    pub async fn spawn(options: MirrorOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let archive_cache_dir = temp_dir.path().join("archives");

        let catalog = Arc::new(
            SqliteCatalogStore::new(temp_dir.path().join("catalog.db"))
                .expect("Failed to open catalog store"),
        );
        for url in &options.uplinks {
            catalog.ensure_uplink(url).expect("Failed to register uplink");
        }

        let archive_urls = ArchiveUrlTemplate::new(options.archive_template.clone());
        let uplink_api = Arc::new(HttpUplinkApi::new(options.request_timeout_secs).unwrap());
        let origin = Arc::new(
            HttpArchiveOrigin::new(archive_urls.clone(), options.archive_timeout_secs).unwrap(),
        );
        let content = ContentStore::new(archive_cache_dir.clone(), origin);
        let pipeline = IngestionPipeline::new(
            content.clone(),
            MetadataFetcher::new(uplink_api.clone(), options.metadata_source),
            catalog.clone(),
        );
        let orchestrator = Arc::new(SyncOrchestrator::new(
            catalog.clone(),
            DeltaFetcher::new(uplink_api),
            pipeline,
        ));

        let shutdown = CancellationToken::new();
        let (mut scheduler, scheduler_handle) = create_scheduler(shutdown.clone());
        let settings = SyncSettings {
            interval_secs: 3600,
            run_on_startup: false,
            ..Default::default()
        };
        scheduler
            .register_job(Arc::new(ReplicateUplinksJob::from_settings(
                orchestrator.clone(),
                &settings,
            )))
            .await;
        tokio::spawn(async move { scheduler.run().await });

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port,
            metrics_port: 0,
        };
        let state = ServerState::new(
            config,
            catalog.clone(),
            archive_urls,
            Some(scheduler_handle),
        );
        let app = make_app(state);
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            serve(listener, app, server_shutdown)
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url: format!("http://127.0.0.1:{}", port),
            catalog,
            archive_cache_dir,
            orchestrator,
            content,
            shutdown,
            _temp_dir: temp_dir,
        };
        server.wait_for_ready().await;
        server
    }

    /// Runs one replication cycle to completion.
    pub async fn sync(&self) -> CycleReport {
        self.orchestrator
            .run_cycle(&CancellationToken::new())
            .await
            .expect("Replication cycle could not start")
    }

    pub fn publisher(&self, verification: HashVerification) -> LocalPublisher {
        LocalPublisher::new(self.content.clone(), self.catalog.clone(), verification)
    }

    /// Waits for the server to become ready by polling `/all-packages`
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client
                .get(format!("{}/all-packages", self.base_url))
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
