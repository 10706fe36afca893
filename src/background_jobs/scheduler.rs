use super::context::JobContext;
use super::handle::{JobRun, JobRunStatus, SchedulerCommand, SchedulerHandle, SharedJobState};
use super::job::{BackgroundJob, HookEvent, JobError, ShutdownBehavior};
use crate::server::metrics;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest the scheduler sleeps before re-checking its jobs.
const MAX_IDLE_SLEEP: Duration = Duration::from_secs(60);

/// How long a cancellable job gets to wind down at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn next_run_after(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    now + chrono::Duration::from_std(interval).unwrap_or_default()
}

/// Wakes the scheduler loop when a job task ends, including by panic, so
/// the job's next run is picked up without waiting out the idle sleep.
struct WakeOnDrop(Arc<Notify>);

impl Drop for WakeOnDrop {
    fn drop(&mut self) {
        self.0.notify_one();
    }
}

/// Manages background job scheduling and execution.
pub struct JobScheduler {
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Task handles of running jobs (owned by the scheduler loop)
    running_handles: HashMap<String, JoinHandle<()>>,

    job_finished: Arc<Notify>,

    command_receiver: mpsc::Receiver<SchedulerCommand>,

    /// Cancelled to stop the scheduler; every job's token is a child of it.
    shutdown_token: CancellationToken,
}

impl JobScheduler {
    fn new(
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self {
            shared_state,
            running_handles: HashMap::new(),
            job_finished: Arc::new(Notify::new()),
            command_receiver,
            shutdown_token,
        }
    }

    /// Register a job with the scheduler. Interval jobs first run one
    /// interval from now; use the `OnStartup` hook for an immediate run.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());
        let mut state = self.shared_state.write().await;
        if let Some(interval) = job.schedule().interval() {
            state
                .next_runs
                .insert(job_id.clone(), next_run_after(Utc::now(), interval));
        }
        state.jobs.insert(job_id, job);
    }

    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Main scheduler loop. Returns once the shutdown token is cancelled
    /// and running jobs have been dealt with.
    pub async fn run(&mut self) {
        let job_count = self.job_count().await;
        info!("Starting job scheduler with {} registered jobs", job_count);

        self.trigger_jobs_for_hook(HookEvent::OnStartup).await;

        loop {
            self.cleanup_completed_jobs().await;

            let sleep_duration = self.time_until_next_scheduled_job().await;
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.job_finished.notified() => {
                    self.run_due_jobs().await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::TriggerJob { job_id, response } => {
                let result = self.trigger_job(&job_id).await;
                let _ = response.send(result);
            }
        }
    }

    /// Manually trigger a job by ID.
    async fn trigger_job(&mut self, job_id: &str) -> Result<(), JobError> {
        {
            let state = self.shared_state.read().await;
            if !state.jobs.contains_key(job_id) {
                return Err(JobError::NotFound);
            }
            if state.running_jobs.contains(job_id) {
                return Err(JobError::AlreadyRunning);
            }
        }

        self.spawn_job(job_id, "manual").await;
        Ok(())
    }

    async fn time_until_next_scheduled_job(&self) -> Duration {
        let state = self.shared_state.read().await;
        let now = Utc::now();

        state
            .next_runs
            .iter()
            .filter(|(job_id, _)| !state.running_jobs.contains(*job_id))
            .map(|(_, next_run)| (*next_run - now).to_std().unwrap_or(Duration::ZERO))
            .fold(MAX_IDLE_SLEEP, Duration::min)
    }

    async fn run_due_jobs(&mut self) {
        let now = Utc::now();
        let due: Vec<String> = {
            let state = self.shared_state.read().await;
            state
                .next_runs
                .iter()
                .filter(|(job_id, next_run)| {
                    **next_run <= now && !state.running_jobs.contains(*job_id)
                })
                .map(|(job_id, _)| job_id.clone())
                .collect()
        };

        for job_id in due {
            self.spawn_job(&job_id, "schedule").await;
        }
    }

    /// Trigger all jobs that listen for a specific hook event.
    async fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let listeners: Vec<String> = {
            let state = self.shared_state.read().await;
            state
                .jobs
                .iter()
                .filter(|(job_id, job)| {
                    if state.running_jobs.contains(*job_id) {
                        debug!("Skipping hook trigger for already running job: {}", job_id);
                        return false;
                    }
                    job.schedule().listens_to(event)
                })
                .map(|(job_id, _)| job_id.clone())
                .collect()
        };

        let trigger = format!("hook:{}", event);
        for job_id in listeners {
            self.spawn_job(&job_id, &trigger).await;
        }
    }

    async fn spawn_job(&mut self, job_id: &str, trigger: &str) {
        let job = {
            let mut state = self.shared_state.write().await;
            let Some(job) = state.jobs.get(job_id).cloned() else {
                error!("Attempted to spawn unknown job: {}", job_id);
                return;
            };
            state.running_jobs.insert(job_id.to_string());
            // Parked until the run finishes so the loop does not spin on it.
            state.next_runs.remove(job_id);
            state.last_runs.insert(
                job_id.to_string(),
                JobRun {
                    started_at: Utc::now(),
                    finished_at: None,
                    status: JobRunStatus::Running,
                    error_message: None,
                    trigger: trigger.to_string(),
                },
            );
            job
        };

        info!("Starting job {} ({})", job_id, trigger);
        metrics::set_background_job_running(job_id, true);

        let ctx = JobContext::new(self.shutdown_token.child_token());
        let shared_state = Arc::clone(&self.shared_state);
        let job_id_owned = job_id.to_string();
        let wake = WakeOnDrop(Arc::clone(&self.job_finished));

        let handle = tokio::spawn(async move {
            let _wake = wake;
            let start_time = Instant::now();
            let result = job.execute(&ctx).await;
            let elapsed = start_time.elapsed();

            let (status, error_msg) = match result {
                Ok(()) => {
                    info!(
                        "Job {} completed successfully in {:?}",
                        job_id_owned, elapsed
                    );
                    (JobRunStatus::Completed, None)
                }
                Err(JobError::Cancelled) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                    (JobRunStatus::Cancelled, None)
                }
                Err(e) => {
                    error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                    (JobRunStatus::Failed, Some(e.to_string()))
                }
            };

            metrics::record_background_job_execution(&job_id_owned, status.as_str(), elapsed);
            metrics::set_background_job_running(&job_id_owned, false);

            let mut state = shared_state.write().await;
            let finished_at = Utc::now();
            if let Some(run) = state.last_runs.get_mut(&job_id_owned) {
                run.finished_at = Some(finished_at);
                run.status = status;
                run.error_message = error_msg;
            }
            if let Some(interval) = job.schedule().interval() {
                state
                    .next_runs
                    .insert(job_id_owned.clone(), next_run_after(finished_at, interval));
            }
            state.running_jobs.remove(&job_id_owned);
        });

        self.running_handles.insert(job_id.to_string(), handle);
    }

    async fn cleanup_completed_jobs(&mut self) {
        let completed: Vec<String> = self
            .running_handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in completed {
            if let Some(handle) = self.running_handles.remove(&job_id) {
                if let Err(e) = handle.await {
                    error!("Job {} panicked: {}", job_id, e);
                    self.recover_from_panic(&job_id).await;
                }
            }
        }
    }

    /// A panicking job never reaches its own bookkeeping.
    async fn recover_from_panic(&self, job_id: &str) {
        metrics::set_background_job_running(job_id, false);
        let mut state = self.shared_state.write().await;
        state.running_jobs.remove(job_id);
        if let Some(run) = state.last_runs.get_mut(job_id) {
            run.finished_at = Some(Utc::now());
            run.status = JobRunStatus::Failed;
            run.error_message = Some("Task panic".to_string());
        }
        let interval = state.jobs.get(job_id).and_then(|j| j.schedule().interval());
        if let Some(interval) = interval {
            state
                .next_runs
                .insert(job_id.to_string(), next_run_after(Utc::now(), interval));
        }
    }

    /// Jobs have already seen their tokens cancelled. Jobs that must finish
    /// are awaited in full, the rest get a grace period before being aborted.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        let behaviors: HashMap<String, ShutdownBehavior> = {
            let state = self.shared_state.read().await;
            state
                .jobs
                .iter()
                .map(|(job_id, job)| (job_id.clone(), job.shutdown_behavior()))
                .collect()
        };

        for (job_id, mut handle) in self.running_handles.drain() {
            let behavior = behaviors
                .get(&job_id)
                .copied()
                .unwrap_or(ShutdownBehavior::Cancellable);

            match behavior {
                ShutdownBehavior::WaitForCompletion => {
                    info!("Waiting for job {} to complete...", job_id);
                    if let Err(e) = handle.await {
                        error!("Job {} panicked during shutdown: {}", job_id, e);
                    }
                }
                ShutdownBehavior::Cancellable => {
                    if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle)
                        .await
                        .is_err()
                    {
                        warn!("Job {} did not stop in time, aborting", job_id);
                        handle.abort();
                    }
                }
            }
        }

        info!("Scheduler shutdown complete");
    }
}

/// Create a scheduler and its handle.
pub fn create_scheduler(shutdown_token: CancellationToken) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState::default()));

    let scheduler = JobScheduler::new(command_rx, shutdown_token, Arc::clone(&shared_state));
    let handle = SchedulerHandle::new(command_tx, shared_state);

    (scheduler, handle)
}
