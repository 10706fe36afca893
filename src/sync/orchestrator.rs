//! Sync Orchestrator: one replication cycle across every uplink.
//!
//! `Idle -> Running -> {Completed, Failed} -> Idle`. A trigger that arrives
//! while a cycle is running is dropped. Uplinks are replicated concurrently,
//! each in its own task; within an uplink identifiers are ingested strictly
//! one after the other, and the first failure ends that uplink's work for
//! the cycle so its cursor never moves past an uncommitted event.

use crate::catalog_store::{CatalogStore, PackageRef, Uplink};
use crate::error::{ErrorKind, ReplicationError};
use crate::ingestion::IngestionPipeline;
use crate::server::metrics;
use crate::uplink::DeltaFetcher;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a replication cycle is already running")]
    AlreadyRunning,

    #[error("cannot enumerate uplinks: {0}")]
    UplinkEnumeration(String),

    #[error("orchestrator state lock poisoned")]
    StatePoisoned,
}

#[derive(Debug, Clone, Serialize)]
pub struct UplinkFailure {
    pub kind: &'static str,
    pub transient: bool,
    pub message: String,
    /// The identifier that failed, if the failure was not the delta itself.
    pub package: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UplinkReport {
    pub uplink_id: i64,
    pub url: String,
    pub cursor_before: i64,
    pub cursor_after: i64,
    pub pending: usize,
    pub ingested: usize,
    pub cancelled: bool,
    pub failure: Option<UplinkFailure>,
}

impl UplinkReport {
    fn new(uplink: &Uplink) -> Self {
        Self {
            uplink_id: uplink.id,
            url: uplink.url.clone(),
            cursor_before: uplink.cursor,
            cursor_after: uplink.cursor,
            pending: 0,
            ingested: 0,
            cancelled: false,
            failure: None,
        }
    }

    fn fail(&mut self, err: &ReplicationError, package: Option<&PackageRef>) {
        self.failure = Some(UplinkFailure {
            kind: err.kind().as_str(),
            transient: err.is_transient(),
            message: err.to_string(),
            package: package.map(|p| p.to_string()),
        });
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub uplinks: Vec<UplinkReport>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn ingested(&self) -> usize {
        self.uplinks.iter().map(|u| u.ingested).sum()
    }
}

/// Puts the orchestrator back to `Idle` however the cycle ends.
struct CycleGuard {
    state: Arc<Mutex<SyncState>>,
}

impl CycleGuard {
    fn finish(&self, outcome: SyncState) {
        if let Ok(mut state) = self.state.lock() {
            *state = outcome;
        }
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            *state = SyncState::Idle;
        }
    }
}

pub struct SyncOrchestrator {
    catalog: Arc<dyn CatalogStore>,
    delta: DeltaFetcher,
    pipeline: IngestionPipeline,
    state: Arc<Mutex<SyncState>>,
}

impl SyncOrchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        delta: DeltaFetcher,
        pipeline: IngestionPipeline,
    ) -> Self {
        Self {
            catalog,
            delta,
            pipeline,
            state: Arc::new(Mutex::new(SyncState::Idle)),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(SyncState::Failed)
    }

    fn try_start(&self) -> Result<CycleGuard, SyncError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| SyncError::StatePoisoned)?;
        if *state == SyncState::Running {
            return Err(SyncError::AlreadyRunning);
        }
        *state = SyncState::Running;
        Ok(CycleGuard {
            state: self.state.clone(),
        })
    }

    /// Runs one cycle. `cancel` is checked between identifiers; a commit that
    /// has started is always allowed to finish.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport, SyncError> {
        let guard = match self.try_start() {
            Ok(guard) => guard,
            Err(SyncError::AlreadyRunning) => {
                debug!("Replication cycle already running, dropping trigger");
                return Err(SyncError::AlreadyRunning);
            }
            Err(e) => return Err(e),
        };
        let start_time = Instant::now();

        let uplinks = match self.catalog.list_uplinks() {
            Ok(uplinks) => uplinks,
            Err(e) => {
                error!("Replication cycle failed: cannot enumerate uplinks: {:#}", e);
                guard.finish(SyncState::Failed);
                metrics::record_sync_cycle("failed", start_time.elapsed());
                return Err(SyncError::UplinkEnumeration(e.to_string()));
            }
        };
        info!("Starting replication cycle over {} uplinks", uplinks.len());

        let tasks: Vec<_> = uplinks
            .iter()
            .cloned()
            .map(|uplink| {
                let delta = self.delta.clone();
                let pipeline = self.pipeline.clone();
                let cancel = cancel.clone();
                tokio::spawn(replicate_uplink(delta, pipeline, uplink, cancel))
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let reports = results
            .into_iter()
            .zip(uplinks.iter())
            .map(|(result, uplink)| {
                result.unwrap_or_else(|e| {
                    error!("Replication task for {} panicked: {}", uplink.url, e);
                    let mut report = UplinkReport::new(uplink);
                    report.failure = Some(UplinkFailure {
                        kind: "panic",
                        transient: true,
                        message: e.to_string(),
                        package: None,
                    });
                    report
                })
            })
            .collect();

        let report = CycleReport {
            uplinks: reports,
            elapsed: start_time.elapsed(),
        };
        guard.finish(SyncState::Completed);
        metrics::record_sync_cycle("completed", report.elapsed);
        // Local publications land in the same catalog from another process
        match self.catalog.count_releases() {
            Ok(count) => metrics::set_catalog_releases(count),
            Err(e) => warn!("Cannot count catalog releases: {:#}", e),
        }
        info!(
            "Replication cycle completed in {:?}: {} releases ingested",
            report.elapsed,
            report.ingested()
        );
        Ok(report)
    }
}

async fn replicate_uplink(
    delta: DeltaFetcher,
    pipeline: IngestionPipeline,
    mut uplink: Uplink,
    cancel: CancellationToken,
) -> UplinkReport {
    let mut report = UplinkReport::new(&uplink);

    let identifiers = match delta.fetch(&uplink).await {
        Ok(identifiers) => identifiers,
        Err(e) => {
            log_failure(&uplink, None, &e);
            report.fail(&e, None);
            return report;
        }
    };
    report.pending = identifiers.len();
    if identifiers.is_empty() {
        debug!("Uplink {} is up to date at cursor {}", uplink.url, uplink.cursor);
        return report;
    }

    for package in &identifiers {
        if cancel.is_cancelled() {
            info!(
                "Replication of {} interrupted by shutdown at cursor {}",
                uplink.url, uplink.cursor
            );
            report.cancelled = true;
            break;
        }

        match pipeline.ingest(&uplink, package).await {
            Ok(ingested) => {
                if let Some(cursor) = ingested.receipt.cursor {
                    uplink.cursor = cursor;
                }
                report.ingested += 1;
                report.cursor_after = uplink.cursor;
                metrics::record_release_ingested(&uplink.url);
                metrics::set_uplink_cursor(&uplink.url, uplink.cursor);
                info!(
                    "Ingested {} from {} (cursor {})",
                    package, uplink.url, uplink.cursor
                );
            }
            Err(e) => {
                log_failure(&uplink, Some(package), &e);
                report.fail(&e, Some(package));
                break;
            }
        }
    }
    report
}

fn log_failure(uplink: &Uplink, package: Option<&PackageRef>, err: &ReplicationError) {
    metrics::record_ingestion_failure(&uplink.url, err.kind().as_str());
    let subject = package
        .map(|p| p.to_string())
        .unwrap_or_else(|| "delta".to_string());

    match err.kind() {
        ErrorKind::ArchiveLayoutMismatch => error!(
            "Upstream archive integrity problem on {} for {}, operator attention needed: {}",
            uplink.url, subject, err
        ),
        _ if err.is_transient() => warn!(
            "Stopping {} at cursor {} for this cycle, {} will be retried: {}",
            uplink.url, uplink.cursor, subject, err
        ),
        _ => error!(
            "Stopping {} at cursor {}, {} will not succeed without intervention: {}",
            uplink.url, uplink.cursor, subject, err
        ),
    }
}
