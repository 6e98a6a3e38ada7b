use super::job::{BackgroundJob, HookEvent, JobError, JobSchedule};
use crate::server_store::{JobAuditEntry, JobAuditEventType, JobRun, ServerStore};
use anyhow::Result;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Information about a registered job for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schedule: JobScheduleInfo,
    pub is_running: bool,
    pub last_run: Option<JobRunInfo>,
    pub next_run_at: Option<String>,
    /// Details of the last completed audit entry, e.g. how much a scan found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_summary: Option<serde_json::Value>,
}

/// When a job runs: every `every_secs` seconds and/or when one of `hooks` fires.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobScheduleInfo {
    pub every_secs: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<String>,
}

impl From<JobSchedule> for JobScheduleInfo {
    fn from(schedule: JobSchedule) -> Self {
        JobScheduleInfo {
            every_secs: schedule.interval().map(|d| d.as_secs()),
            hooks: schedule.hooks().iter().map(HookEvent::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRunInfo {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub triggered_by: String,
}

impl From<JobRun> for JobRunInfo {
    fn from(run: JobRun) -> Self {
        let duration_ms = run.duration().map(|d| d.num_milliseconds());
        JobRunInfo {
            started_at: run.started_at.to_rfc3339(),
            finished_at: run.finished_at.map(|dt| dt.to_rfc3339()),
            status: run.status.as_str().to_string(),
            error_message: run.error_message,
            duration_ms,
            triggered_by: run.triggered_by.to_string(),
        }
    }
}

/// Command sent to the scheduler.
pub enum SchedulerCommand {
    TriggerJob {
        job_id: String,
        response: oneshot::Sender<Result<(), JobError>>,
    },
}

/// Shared state between scheduler and handle.
#[derive(Default)]
pub struct SharedJobState {
    /// Set at registration, never changes afterwards
    pub jobs: HashMap<String, Arc<dyn BackgroundJob>>,
    pub running_jobs: HashSet<String>,
}

/// Handle to interact with the job scheduler from HTTP handlers.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    hook_tx: mpsc::Sender<HookEvent>,
    shared_state: Arc<RwLock<SharedJobState>>,
    server_store: Arc<dyn ServerStore>,
}

impl SchedulerHandle {
    pub fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        hook_tx: mpsc::Sender<HookEvent>,
        shared_state: Arc<RwLock<SharedJobState>>,
        server_store: Arc<dyn ServerStore>,
    ) -> Self {
        Self {
            command_tx,
            hook_tx,
            shared_state,
            server_store,
        }
    }

    fn job_info(&self, state: &SharedJobState, job_id: &str) -> Result<Option<JobInfo>> {
        let Some(job) = state.jobs.get(job_id) else {
            return Ok(None);
        };
        let last_run = self
            .server_store
            .get_last_run(job_id)?
            .map(JobRunInfo::from);
        let next_run_at = self
            .server_store
            .get_schedule_state(job_id)?
            .map(|s| s.next_run_at.to_rfc3339());
        let last_summary = self
            .server_store
            .get_last_audit_event(job_id, JobAuditEventType::Completed)?
            .and_then(|entry| entry.details);

        Ok(Some(JobInfo {
            id: job_id.to_string(),
            name: job.name().to_string(),
            description: job.description().to_string(),
            schedule: job.schedule().into(),
            is_running: state.running_jobs.contains(job_id),
            last_run,
            next_run_at,
            last_summary,
        }))
    }

    /// All registered jobs, sorted by id.
    pub async fn list_jobs(&self) -> Result<Vec<JobInfo>> {
        let state = self.shared_state.read().await;
        let mut ids: Vec<&String> = state.jobs.keys().collect();
        ids.sort();

        let mut jobs = Vec::with_capacity(ids.len());
        for job_id in ids {
            if let Some(info) = self.job_info(&state, job_id)? {
                jobs.push(info);
            }
        }
        Ok(jobs)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobInfo>> {
        let state = self.shared_state.read().await;
        self.job_info(&state, job_id)
    }

    pub async fn trigger_job(&self, job_id: &str) -> Result<(), JobError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::TriggerJob {
                job_id: job_id.to_string(),
                response: response_tx,
            })
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler not available".to_string()))?;

        response_rx
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler did not respond".to_string()))?
    }

    /// Runs every job listening to `event`. Jobs already running are skipped.
    pub async fn fire_hook(&self, event: HookEvent) -> Result<(), JobError> {
        self.hook_tx
            .send(event)
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler not available".to_string()))
    }

    pub fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRunInfo>> {
        let history = self.server_store.get_job_history(job_id, limit)?;
        Ok(history.into_iter().map(JobRunInfo::from).collect())
    }

    pub async fn is_job_running(&self, job_id: &str) -> bool {
        self.shared_state.read().await.running_jobs.contains(job_id)
    }

    pub async fn job_exists(&self, job_id: &str) -> bool {
        self.shared_state.read().await.jobs.contains_key(job_id)
    }

    pub fn get_job_audit_log(&self, limit: usize, offset: usize) -> Result<Vec<JobAuditEntry>> {
        self.server_store.get_job_audit_log(limit, offset)
    }

    pub fn get_job_audit_log_by_job(
        &self,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobAuditEntry>> {
        self.server_store
            .get_job_audit_log_by_job(job_id, limit, offset)
    }
}
