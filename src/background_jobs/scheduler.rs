use super::context::JobContext;
use super::handle::{SchedulerCommand, SchedulerHandle, SharedJobState};
use super::job::{BackgroundJob, HookEvent, JobError, ShutdownBehavior};
use crate::server::metrics;
use crate::server_store::{JobRunStatus, JobScheduleState, JobTrigger, ServerStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest the loop sleeps before re-checking schedules.
const MAX_IDLE: Duration = Duration::from_secs(60);

/// Grace period for running jobs at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// How a finished run is recorded.
#[derive(Debug, PartialEq)]
struct RunOutcome {
    status: JobRunStatus,
    error_message: Option<String>,
    /// Label of the `background_job_executions_total` metric.
    label: &'static str,
}

fn run_outcome(result: &Result<Result<(), JobError>, JoinError>) -> RunOutcome {
    let (status, error_message, label) = match result {
        Ok(Ok(())) => (JobRunStatus::Completed, None, "success"),
        Ok(Err(JobError::Cancelled)) => {
            (JobRunStatus::Failed, Some("Cancelled".to_string()), "cancelled")
        }
        Ok(Err(e)) => (JobRunStatus::Failed, Some(e.to_string()), "failed"),
        Err(e) => (JobRunStatus::Failed, Some(format!("Task panic: {}", e)), "panic"),
    };
    RunOutcome {
        status,
        error_message,
        label,
    }
}

/// Runs scan and maintenance jobs on their intervals, on hook events and on demand.
pub struct JobScheduler {
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Task handles of running jobs, owned by the scheduler loop.
    running_handles: HashMap<String, JoinHandle<()>>,

    job_cancel_tokens: HashMap<String, CancellationToken>,

    server_store: Arc<dyn ServerStore>,

    hook_receiver: mpsc::Receiver<HookEvent>,

    command_receiver: mpsc::Receiver<SchedulerCommand>,

    shutdown_token: CancellationToken,

    job_context: JobContext,
}

impl JobScheduler {
    fn new(
        server_store: Arc<dyn ServerStore>,
        hook_receiver: mpsc::Receiver<HookEvent>,
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self {
            shared_state,
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            server_store,
            hook_receiver,
            command_receiver,
            shutdown_token,
            job_context,
        }
    }

    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());
        let mut state = self.shared_state.write().await;
        state.jobs.insert(job_id, job);
    }

    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Main scheduler loop. Returns after the shutdown token fires and running
    /// jobs have finished or the grace period ran out.
    pub async fn run(&mut self) {
        let job_count = self.job_count().await;
        info!("Starting job scheduler with {} registered jobs", job_count);

        match self.server_store.mark_stale_jobs_failed() {
            Ok(count) if count > 0 => {
                info!("Marked {} stale jobs as failed from previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to mark stale jobs: {}", e);
            }
        }

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
                Some(event) = self.hook_receiver.recv() => {
                    debug!("Received hook event: {}", event);
                    self.trigger_jobs_for_hook(event).await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
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

    async fn trigger_job(&mut self, job_id: &str) -> Result<(), JobError> {
        let state = self.shared_state.read().await;
        if !state.jobs.contains_key(job_id) {
            return Err(JobError::NotFound);
        }
        if state.running_jobs.contains(job_id) {
            return Err(JobError::AlreadyRunning);
        }
        drop(state);

        self.spawn_job(job_id, JobTrigger::Manual).await;
        Ok(())
    }

    /// When an interval job is due. Jobs without persisted state are due at `now`.
    fn next_run_time(
        &self,
        job_id: &str,
        job: &dyn BackgroundJob,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Option<chrono::DateTime<chrono::Utc>> {
        job.schedule().interval()?;
        match self.server_store.get_schedule_state(job_id) {
            Ok(Some(state)) => Some(state.next_run_at),
            Ok(None) => Some(now),
            Err(e) => {
                warn!("Failed to read schedule state for {}: {}", job_id, e);
                None
            }
        }
    }

    async fn time_until_next_scheduled_job(&self) -> Duration {
        let mut min_duration = MAX_IDLE;

        let now = chrono::Utc::now();
        let state = self.shared_state.read().await;
        for (job_id, job) in &state.jobs {
            if state.running_jobs.contains(job_id) {
                continue;
            }
            if let Some(next_run) = self.next_run_time(job_id, job.as_ref(), now) {
                if next_run <= now {
                    return Duration::ZERO;
                }
                let duration = (next_run - now).to_std().unwrap_or(Duration::from_secs(1));
                min_duration = min_duration.min(duration);
            }
        }

        min_duration
    }

    /// Registered jobs that are not running and satisfy `wanted`.
    async fn idle_jobs(&self, wanted: impl Fn(&str, &dyn BackgroundJob) -> bool) -> Vec<String> {
        let state = self.shared_state.read().await;
        let mut ids = Vec::new();
        for (job_id, job) in &state.jobs {
            if !state.running_jobs.contains(job_id) && wanted(job_id, job.as_ref()) {
                ids.push(job_id.clone());
            }
        }
        ids.sort();
        ids
    }

    async fn run_due_jobs(&mut self) {
        let now = chrono::Utc::now();
        let due = self
            .idle_jobs(|job_id, job| {
                self.next_run_time(job_id, job, now)
                    .is_some_and(|next_run| next_run <= now)
            })
            .await;
        for job_id in due {
            self.spawn_job(&job_id, JobTrigger::Schedule).await;
        }
    }

    async fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let listening = self
            .idle_jobs(|_, job| job.schedule().listens_to(event))
            .await;
        if listening.is_empty() {
            debug!("No idle job listens to {}", event);
        }
        for job_id in listening {
            self.spawn_job(&job_id, JobTrigger::hook(event)).await;
        }
    }

    fn push_next_run(
        &self,
        job_id: &str,
        job: &dyn BackgroundJob,
        last_run_at: Option<chrono::DateTime<chrono::Utc>>,
    ) {
        let Some(interval) = job.schedule().interval() else {
            return;
        };
        let state = JobScheduleState {
            job_id: job_id.to_string(),
            next_run_at: chrono::Utc::now()
                + chrono::Duration::from_std(interval).unwrap_or_default(),
            last_run_at,
        };
        if let Err(e) = self.server_store.update_schedule_state(&state) {
            warn!("Failed to update schedule state for {}: {}", job_id, e);
        }
    }

    async fn spawn_job(&mut self, job_id: &str, triggered_by: JobTrigger) {
        let job = {
            let state = self.shared_state.read().await;
            match state.jobs.get(job_id) {
                Some(job) => Arc::clone(job),
                None => {
                    error!("Attempted to spawn unknown job: {}", job_id);
                    return;
                }
            }
        };

        let run_id = match self.server_store.record_job_start(job_id, &triggered_by) {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to record job start for {}: {}", job_id, e);
                return;
            }
        };

        info!(
            "Starting job: {} (run_id: {}, triggered_by: {})",
            job_id, run_id, triggered_by
        );

        {
            let mut state = self.shared_state.write().await;
            state.running_jobs.insert(job_id.to_string());
        }

        // Push next_run_at forward now so the loop doesn't spin while the job runs.
        self.push_next_run(job_id, job.as_ref(), None);

        metrics::set_background_job_running(job_id, true);

        let cancel_token = self.job_context.cancellation_token.child_token();
        self.job_cancel_tokens
            .insert(job_id.to_string(), cancel_token.clone());
        let ctx = self.job_context.with_token(cancel_token);

        let server_store = Arc::clone(&self.server_store);
        let job_id_owned = job_id.to_string();
        let shared_state = Arc::clone(&self.shared_state);

        let handle = tokio::spawn(async move {
            let start_time = Instant::now();
            let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
            let elapsed = start_time.elapsed();

            let outcome = run_outcome(&result);
            match &result {
                Ok(Ok(())) => info!("Job {} completed in {:?}", job_id_owned, elapsed),
                Ok(Err(JobError::Cancelled)) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed)
                }
                Ok(Err(e)) => error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e),
                Err(e) => error!("Job {} panicked after {:?}: {}", job_id_owned, elapsed, e),
            }

            metrics::record_background_job_execution(&job_id_owned, outcome.label, elapsed);
            metrics::set_background_job_running(&job_id_owned, false);

            if let Err(e) =
                server_store.record_job_finish(run_id, outcome.status, outcome.error_message)
            {
                error!("Failed to record job finish for {}: {}", job_id_owned, e);
            }

            shared_state.write().await.running_jobs.remove(&job_id_owned);
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
                let _ = handle.await;
            }
            self.job_cancel_tokens.remove(&job_id);

            let job = self.shared_state.read().await.jobs.get(&job_id).cloned();
            if let Some(job) = job {
                self.push_next_run(&job_id, job.as_ref(), Some(chrono::Utc::now()));
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        {
            let state = self.shared_state.read().await;
            for job_id in &state.running_jobs {
                let cancellable = state
                    .jobs
                    .get(job_id)
                    .map(|j| j.shutdown_behavior() == ShutdownBehavior::Cancellable)
                    .unwrap_or(true);
                if cancellable {
                    if let Some(token) = self.job_cancel_tokens.get(job_id) {
                        debug!("Cancelling job: {}", job_id);
                        token.cancel();
                    }
                }
            }
        }

        for (job_id, handle) in self.running_handles.drain() {
            debug!("Waiting for job {} to finish", job_id);
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("Job {} did not finish within {:?}", job_id, SHUTDOWN_GRACE);
            }
        }

        self.job_cancel_tokens.clear();
        info!("Scheduler shutdown complete");
    }
}

/// Creates a scheduler and the handle the HTTP layer uses to talk to it.
pub fn create_scheduler(
    server_store: Arc<dyn ServerStore>,
    shutdown_token: CancellationToken,
    job_context: JobContext,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let (hook_tx, hook_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState::default()));

    let scheduler = JobScheduler::new(
        server_store.clone(),
        hook_rx,
        command_rx,
        shutdown_token,
        job_context,
        Arc::clone(&shared_state),
    );
    let handle = SchedulerHandle::new(command_tx, hook_tx, shared_state, server_store);

    (scheduler, handle)
}
