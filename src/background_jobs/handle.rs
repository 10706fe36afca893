use super::job::{BackgroundJob, JobError, JobSchedule};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};

/// A registered job as listed by `GET /jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schedule: JobScheduleInfo,
    pub is_running: bool,
    pub last_run: Option<JobRunInfo>,
    pub next_run_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobScheduleInfo {
    pub interval_secs: Option<u64>,
    pub hooks: Vec<String>,
}

impl From<&JobSchedule> for JobScheduleInfo {
    fn from(schedule: &JobSchedule) -> Self {
        let hooks = match schedule {
            JobSchedule::Interval(_) => Vec::new(),
            JobSchedule::Hook(event) => vec![event.to_string()],
            JobSchedule::Combined { hooks, .. } => hooks.iter().map(ToString::to_string).collect(),
        };
        JobScheduleInfo {
            interval_secs: schedule.interval().map(|d| d.as_secs()),
            hooks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobRunStatus {
    /// Label used for the executions metric.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
            JobRunStatus::Cancelled => "cancelled",
        }
    }
}

/// Most recent execution of a job. History is not persisted.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobRunStatus,
    pub error_message: Option<String>,
    /// `schedule`, `manual` or `hook:<event>`
    pub trigger: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRunInfo {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub status: JobRunStatus,
    pub error: Option<String>,
    pub trigger: String,
}

impl From<&JobRun> for JobRunInfo {
    fn from(run: &JobRun) -> Self {
        JobRunInfo {
            started_at: run.started_at.to_rfc3339(),
            finished_at: run.finished_at.map(|at| at.to_rfc3339()),
            duration_ms: run
                .finished_at
                .map(|at| (at - run.started_at).num_milliseconds()),
            status: run.status,
            error: run.error_message.clone(),
            trigger: run.trigger.clone(),
        }
    }
}

pub enum SchedulerCommand {
    TriggerJob {
        job_id: String,
        response: oneshot::Sender<Result<(), JobError>>,
    },
}

/// State the scheduler writes and handles read.
#[derive(Default)]
pub struct SharedJobState {
    pub jobs: HashMap<String, Arc<dyn BackgroundJob>>,
    pub running_jobs: HashSet<String>,
    pub last_runs: HashMap<String, JobRun>,
    /// Only interval jobs have an entry, and only while idle
    pub next_runs: HashMap<String, DateTime<Utc>>,
}

impl SharedJobState {
    fn describe(&self, job_id: &str, job: &dyn BackgroundJob) -> JobInfo {
        JobInfo {
            id: job_id.to_string(),
            name: job.name().to_string(),
            description: job.description().to_string(),
            schedule: JobScheduleInfo::from(&job.schedule()),
            is_running: self.running_jobs.contains(job_id),
            last_run: self.last_runs.get(job_id).map(JobRunInfo::from),
            next_run_at: self.next_runs.get(job_id).map(|at| at.to_rfc3339()),
        }
    }
}

/// Cloneable access to a running [`JobScheduler`](super::JobScheduler) for
/// the HTTP layer.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<SchedulerCommand>,
    state: Arc<RwLock<SharedJobState>>,
}

impl SchedulerHandle {
    pub fn new(
        commands: mpsc::Sender<SchedulerCommand>,
        state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self { commands, state }
    }

    /// All registered jobs, ordered by id.
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let state = self.state.read().await;
        let mut jobs: Vec<JobInfo> = state
            .jobs
            .iter()
            .map(|(id, job)| state.describe(id, job.as_ref()))
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    pub async fn get_job(&self, job_id: &str) -> Option<JobInfo> {
        let state = self.state.read().await;
        let job = state.jobs.get(job_id)?;
        Some(state.describe(job_id, job.as_ref()))
    }

    pub async fn is_job_running(&self, job_id: &str) -> bool {
        self.state.read().await.running_jobs.contains(job_id)
    }

    /// Asks the scheduler to start `job_id` now. Resolves once the scheduler
    /// has accepted or refused, not when the job finishes.
    pub async fn trigger_job(&self, job_id: &str) -> Result<(), JobError> {
        let (response, accepted) = oneshot::channel();
        let command = SchedulerCommand::TriggerJob {
            job_id: job_id.to_string(),
            response,
        };
        if self.commands.send(command).await.is_err() {
            return Err(JobError::ExecutionFailed("scheduler has stopped".to_string()));
        }
        accepted
            .await
            .unwrap_or_else(|_| Err(JobError::ExecutionFailed("scheduler dropped the request".to_string())))
    }
}
