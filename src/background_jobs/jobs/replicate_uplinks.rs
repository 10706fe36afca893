//! Background job that runs one replication cycle across all uplinks.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
};
use crate::config::SyncSettings;
use crate::sync::{SyncError, SyncOrchestrator};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct ReplicateUplinksJob {
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
    run_on_startup: bool,
}

impl ReplicateUplinksJob {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, interval: Duration, run_on_startup: bool) -> Self {
        Self {
            orchestrator,
            interval,
            run_on_startup,
        }
    }

    pub fn from_settings(orchestrator: Arc<SyncOrchestrator>, settings: &SyncSettings) -> Self {
        Self::new(
            orchestrator,
            Duration::from_secs(settings.interval_secs),
            settings.run_on_startup,
        )
    }
}

#[async_trait]
impl BackgroundJob for ReplicateUplinksJob {
    fn id(&self) -> &'static str {
        "replicate_uplinks"
    }

    fn name(&self) -> &'static str {
        "Replicate Uplinks"
    }

    fn description(&self) -> &'static str {
        "Pulls new releases from every uplink into the local catalog"
    }

    fn schedule(&self) -> JobSchedule {
        let hooks = if self.run_on_startup {
            vec![HookEvent::OnStartup]
        } else {
            vec![]
        };
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks,
        }
    }

    /// An interrupted cycle must still finish the commit it is in.
    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::WaitForCompletion
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let report = match self.orchestrator.run_cycle(&ctx.cancellation_token).await {
            Ok(report) => report,
            Err(SyncError::AlreadyRunning) => return Err(JobError::AlreadyRunning),
            Err(e) => return Err(JobError::ExecutionFailed(e.to_string())),
        };

        let failed = report
            .uplinks
            .iter()
            .filter(|u| u.failure.is_some())
            .count();
        if failed > 0 {
            warn!(
                "{} of {} uplinks stopped early this cycle",
                failed,
                report.uplinks.len()
            );
        }
        info!(
            "Replicated {} releases from {} uplinks in {:?}",
            report.ingested(),
            report.uplinks.len(),
            report.elapsed
        );

        if ctx.is_cancelled() && report.uplinks.iter().any(|u| u.cancelled) {
            return Err(JobError::Cancelled);
        }
        Ok(())
    }
}
