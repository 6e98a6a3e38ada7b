use super::models::{
    JobAuditEntry, JobAuditEventType, JobRun, JobRunStatus, JobScheduleState, JobTrigger,
};
use super::schema::SERVER_VERSIONED_SCHEMAS;
use super::ServerStore;
use crate::sqlite_persistence::read_schema_version;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

const JOB_RUN_COLUMNS: &str =
    "id, job_id, started_at, finished_at, status, error_message, triggered_by";
const AUDIT_COLUMNS: &str = "id, job_id, event_type, timestamp, duration_ms, details, error";

pub struct SqliteServerStore {
    conn: Arc<Mutex<Connection>>,
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

impl SqliteServerStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let conn = Connection::open(path).context("Failed to open server database")?;
        let schema = SERVER_VERSIONED_SCHEMAS
            .last()
            .context("No server schema versions defined")?;

        if is_new_db {
            info!("Creating new server database at {:?}", path);
            schema.create(&conn)?;
        } else {
            let db_version = read_schema_version(&conn)?;
            if db_version != schema.version as i64 {
                bail!(
                    "Server database version {} is not supported (expected {})",
                    db_version,
                    schema.version
                );
            }
            schema
                .validate(&conn)
                .context("Server database schema validation failed")?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_job_run(row: &rusqlite::Row) -> rusqlite::Result<JobRun> {
        let status_str: String = row.get("status")?;
        let started_at: String = row.get("started_at")?;
        let finished_at: Option<String> = row.get("finished_at")?;
        let triggered_by: String = row.get("triggered_by")?;

        Ok(JobRun {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            started_at: parse_datetime(&started_at).unwrap_or_else(Utc::now),
            finished_at: finished_at.as_deref().and_then(parse_datetime),
            status: JobRunStatus::parse(&status_str).unwrap_or(JobRunStatus::Failed),
            error_message: row.get("error_message")?,
            triggered_by: JobTrigger::parse(&triggered_by),
        })
    }

    fn row_to_schedule_state(row: &rusqlite::Row) -> rusqlite::Result<JobScheduleState> {
        let next_run_at: String = row.get("next_run_at")?;
        let last_run_at: Option<String> = row.get("last_run_at")?;

        Ok(JobScheduleState {
            job_id: row.get("job_id")?,
            next_run_at: parse_datetime(&next_run_at).unwrap_or_else(Utc::now),
            last_run_at: last_run_at.as_deref().and_then(parse_datetime),
        })
    }

    fn row_to_audit_entry(row: &rusqlite::Row) -> rusqlite::Result<JobAuditEntry> {
        let event_type: String = row.get("event_type")?;
        let details: Option<String> = row.get("details")?;

        Ok(JobAuditEntry {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            event_type: JobAuditEventType::parse(&event_type)
                .unwrap_or(JobAuditEventType::Progress),
            timestamp: row.get("timestamp")?,
            duration_ms: row.get("duration_ms")?,
            details: details.and_then(|s| serde_json::from_str(&s).ok()),
            error: row.get("error")?,
        })
    }

    fn query_job_runs(
        &self,
        where_clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM job_runs {}",
            JOB_RUN_COLUMNS, where_clause
        ))?;
        let runs = stmt
            .query_map(params, Self::row_to_job_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn query_audit(&self, clause: &str, params: impl rusqlite::Params) -> Result<Vec<JobAuditEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM job_audit_log {}",
            AUDIT_COLUMNS, clause
        ))?;
        let entries = stmt
            .query_map(params, Self::row_to_audit_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

impl ServerStore for SqliteServerStore {
    fn record_job_start(&self, job_id: &str, triggered_by: &JobTrigger) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO job_runs (job_id, started_at, status, triggered_by)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                job_id,
                Utc::now().to_rfc3339(),
                JobRunStatus::Running.as_str(),
                triggered_by.to_string()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE job_runs SET finished_at = ?1, status = ?2, error_message = ?3 WHERE id = ?4",
            params![Utc::now().to_rfc3339(), status.as_str(), error_message, run_id],
        )?;
        Ok(())
    }

    fn get_running_jobs(&self) -> Result<Vec<JobRun>> {
        self.query_job_runs(
            "WHERE status = ?1 ORDER BY started_at DESC",
            params![JobRunStatus::Running.as_str()],
        )
    }

    fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>> {
        self.query_job_runs(
            "WHERE job_id = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2",
            params![job_id, limit as i64],
        )
    }

    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
        Ok(self.get_job_history(job_id, 1)?.into_iter().next())
    }

    fn mark_stale_jobs_failed(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE job_runs SET status = ?1, finished_at = ?2, error_message = ?3
             WHERE status = ?4",
            params![
                JobRunStatus::Failed.as_str(),
                Utc::now().to_rfc3339(),
                "Job was interrupted (server restart)",
                JobRunStatus::Running.as_str()
            ],
        )?;
        Ok(count)
    }

    fn get_schedule_state(&self, job_id: &str) -> Result<Option<JobScheduleState>> {
        let conn = self.conn.lock().unwrap();
        let state = conn
            .query_row(
                "SELECT job_id, next_run_at, last_run_at FROM job_schedules WHERE job_id = ?1",
                params![job_id],
                Self::row_to_schedule_state,
            )
            .optional()?;
        Ok(state)
    }

    fn update_schedule_state(&self, state: &JobScheduleState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO job_schedules (job_id, next_run_at, last_run_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE SET next_run_at = ?2, last_run_at = ?3",
            params![
                state.job_id,
                state.next_run_at.to_rfc3339(),
                state.last_run_at.map(|dt| dt.to_rfc3339())
            ],
        )?;
        Ok(())
    }

    fn get_all_schedule_states(&self) -> Result<Vec<JobScheduleState>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT job_id, next_run_at, last_run_at FROM job_schedules")?;
        let states = stmt
            .query_map([], Self::row_to_schedule_state)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(states)
    }

    fn log_job_audit(
        &self,
        job_id: &str,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO job_audit_log (job_id, event_type, timestamp, duration_ms, details, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job_id,
                event_type.as_str(),
                Utc::now().timestamp(),
                duration_ms,
                details.map(|d| d.to_string()),
                error
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_job_audit_log(&self, limit: usize, offset: usize) -> Result<Vec<JobAuditEntry>> {
        self.query_audit(
            "ORDER BY timestamp DESC, id DESC LIMIT ?1 OFFSET ?2",
            params![limit as i64, offset as i64],
        )
    }

    fn get_job_audit_log_by_job(
        &self,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobAuditEntry>> {
        self.query_audit(
            "WHERE job_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2 OFFSET ?3",
            params![job_id, limit as i64, offset as i64],
        )
    }

    fn get_last_audit_event(
        &self,
        job_id: &str,
        event_type: JobAuditEventType,
    ) -> Result<Option<JobAuditEntry>> {
        let entries = self.query_audit(
            "WHERE job_id = ?1 AND event_type = ?2 ORDER BY timestamp DESC, id DESC LIMIT 1",
            params![job_id, event_type.as_str()],
        )?;
        Ok(entries.into_iter().next())
    }

    fn cleanup_old_job_audit_entries(&self, before_timestamp: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM job_audit_log WHERE timestamp < ?1",
            params![before_timestamp],
        )?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct TestStore {
        store: SqliteServerStore,
        _temp_dir: TempDir,
    }

    fn create_test_store() -> TestStore {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteServerStore::new(temp_dir.path().join("server.db")).unwrap();
        TestStore {
            store,
            _temp_dir: temp_dir,
        }
    }

    #[test]
    fn test_record_job_start_and_finish() {
        let test = create_test_store();
        let store = &test.store;

        let run_id = store.record_job_start("scan-moderate-post", &JobTrigger::Manual).unwrap();
        assert!(run_id > 0);
        assert_eq!(store.get_running_jobs().unwrap().len(), 1);

        store
            .record_job_finish(run_id, JobRunStatus::Completed, None)
            .unwrap();
        assert!(store.get_running_jobs().unwrap().is_empty());

        let history = store.get_job_history("scan-moderate-post", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, JobRunStatus::Completed);
        assert!(history[0].finished_at.is_some());
    }

    #[test]
    fn test_last_run_carries_error() {
        let test = create_test_store();
        let store = &test.store;

        let run_id = store.record_job_start("scan-moderate-comment", &JobTrigger::Schedule).unwrap();
        store
            .record_job_finish(run_id, JobRunStatus::Failed, Some("db locked".to_string()))
            .unwrap();

        let last_run = store.get_last_run("scan-moderate-comment").unwrap().unwrap();
        assert_eq!(last_run.status, JobRunStatus::Failed);
        assert_eq!(last_run.error_message.as_deref(), Some("db locked"));
        assert!(store.get_last_run("unknown").unwrap().is_none());
    }

    #[test]
    fn test_history_limit() {
        let test = create_test_store();
        let store = &test.store;
        for i in 0..5 {
            let trigger = if i % 2 == 0 {
                JobTrigger::Schedule
            } else {
                JobTrigger::hook("OnRescanRequested")
            };
            let run_id = store.record_job_start("scan-embed-skill", &trigger).unwrap();
            store
                .record_job_finish(run_id, JobRunStatus::Completed, None)
                .unwrap();
        }
        let history = store.get_job_history("scan-embed-skill", 3).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].triggered_by, JobTrigger::Schedule);
        assert_eq!(history[1].triggered_by, JobTrigger::hook("OnRescanRequested"));
    }

    #[test]
    fn test_mark_stale_jobs_failed() {
        let test = create_test_store();
        let store = &test.store;
        store.record_job_start("a", &JobTrigger::Schedule).unwrap();
        store
            .record_job_start("b", &JobTrigger::hook("OnStartup"))
            .unwrap();

        assert_eq!(store.mark_stale_jobs_failed().unwrap(), 2);
        assert!(store.get_running_jobs().unwrap().is_empty());
        let last_run = store.get_last_run("a").unwrap().unwrap();
        assert!(last_run.error_message.unwrap().contains("server restart"));
    }

    #[test]
    fn test_schedule_state_upsert() {
        let test = create_test_store();
        let store = &test.store;
        assert!(store.get_schedule_state("job").unwrap().is_none());

        store
            .update_schedule_state(&JobScheduleState {
                job_id: "job".to_string(),
                next_run_at: Utc::now(),
                last_run_at: None,
            })
            .unwrap();
        store
            .update_schedule_state(&JobScheduleState {
                job_id: "job".to_string(),
                next_run_at: Utc::now(),
                last_run_at: Some(Utc::now()),
            })
            .unwrap();

        let state = store.get_schedule_state("job").unwrap().unwrap();
        assert!(state.last_run_at.is_some());
        assert_eq!(store.get_all_schedule_states().unwrap().len(), 1);
    }

    #[test]
    fn test_audit_log_filter_and_cleanup() {
        let test = create_test_store();
        let store = &test.store;
        let details = serde_json::json!({"items": 3});
        store
            .log_job_audit("scan-moderate-post", JobAuditEventType::Started, None, None, None)
            .unwrap();
        store
            .log_job_audit(
                "scan-moderate-post",
                JobAuditEventType::Completed,
                Some(12),
                Some(&details),
                None,
            )
            .unwrap();
        store
            .log_job_audit("scan-embed-skill", JobAuditEventType::Failed, None, None, Some("boom"))
            .unwrap();

        assert_eq!(store.get_job_audit_log(10, 0).unwrap().len(), 3);
        let last_completed = store
            .get_last_audit_event("scan-moderate-post", JobAuditEventType::Completed)
            .unwrap()
            .unwrap();
        assert_eq!(last_completed.duration_ms, Some(12));
        assert!(store
            .get_last_audit_event("scan-embed-skill", JobAuditEventType::Completed)
            .unwrap()
            .is_none());
        let posts = store.get_job_audit_log_by_job("scan-moderate-post", 10, 0).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].event_type, JobAuditEventType::Completed);
        assert_eq!(posts[0].details, Some(details));

        let deleted = store
            .cleanup_old_job_audit_entries(Utc::now().timestamp() + 10)
            .unwrap();
        assert_eq!(deleted, 3);
        assert!(store.get_job_audit_log(10, 0).unwrap().is_empty());
    }
}
