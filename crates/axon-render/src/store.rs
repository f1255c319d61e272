//! The persistent job store — single writer of job state.
//!
//! Every mutation goes through a guarded update that re-reads the
//! current status under the connection lock and refuses impossible
//! transitions with a typed error instead of corrupting state.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use axon_clients::backend::RenderSpec;

use crate::db::init_db;
use crate::error::{RenderError, Result};
use crate::types::{JobAssets, JobStatus, JobStep, RenderJob};

const JOB_COLUMNS: &str = "job_id, video_id, script_id, status, step, progress, message, \
     error_code, error_message, video_url, subtitle_url, thumbnail_url, \
     spec_snapshot, created_by, created_at, updated_at, started_at, finished_at";

pub struct CreateOutcome {
    pub job: RenderJob,
    /// False when an existing non-terminal job was returned instead.
    pub created: bool,
}

#[derive(Clone)]
pub struct JobStore {
    conn: Arc<Mutex<Connection>>,
}

impl JobStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open(path: &str) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Idempotent creation: while a non-terminal job exists for
    /// `video_id`, that job is returned instead of inserting a new one.
    /// The check-then-insert runs inside an IMMEDIATE transaction and is
    /// additionally backed by the partial unique index.
    pub fn create_job(
        &self,
        video_id: &str,
        script_id: &str,
        created_by: Option<&str>,
    ) -> Result<CreateOutcome> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM render_jobs
                     WHERE video_id = ?1 AND status IN ('QUEUED', 'PROCESSING')"
                ),
                [video_id],
                row_to_job,
            )
            .optional()?;

        if let Some(job) = existing {
            tx.commit()?;
            info!(job_id = %job.job_id, video_id, "returning existing non-terminal job");
            return Ok(CreateOutcome {
                job,
                created: false,
            });
        }

        let job_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO render_jobs
             (job_id, video_id, script_id, status, progress, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'QUEUED', 0, ?4, ?5, ?5)",
            rusqlite::params![job_id, video_id, script_id, created_by, now],
        )?;
        let job = tx.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM render_jobs WHERE job_id = ?1"),
            [&job_id],
            row_to_job,
        )?;
        tx.commit()?;

        info!(job_id = %job.job_id, video_id, script_id, "render job created");
        Ok(CreateOutcome { job, created: true })
    }

    pub fn get(&self, job_id: &str) -> Result<RenderJob> {
        self.lock()
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM render_jobs WHERE job_id = ?1"),
                [job_id],
                row_to_job,
            )
            .optional()?
            .ok_or_else(|| RenderError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    pub fn status(&self, job_id: &str) -> Result<JobStatus> {
        Ok(self.get(job_id)?.status)
    }

    pub fn list_by_video(&self, video_id: &str) -> Result<Vec<RenderJob>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM render_jobs
             WHERE video_id = ?1 ORDER BY created_at DESC"
        ))?;
        let jobs = stmt
            .query_map([video_id], row_to_job)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(jobs)
    }

    /// QUEUED → PROCESSING with the fetched spec snapshotted into the
    /// row. Refused from any other state.
    pub fn mark_started(&self, job_id: &str, spec: &RenderSpec) -> Result<RenderJob> {
        let snapshot = serde_json::to_string(spec)?;
        self.guarded_update(
            job_id,
            &[JobStatus::Queued],
            JobStatus::Processing,
            "UPDATE render_jobs SET status = 'PROCESSING', spec_snapshot = ?2,
                 progress = 0, error_code = NULL, error_message = NULL,
                 started_at = ?3, updated_at = ?3
             WHERE job_id = ?1",
            rusqlite::params![job_id, snapshot, Utc::now().to_rfc3339()],
        )
    }

    /// FAILED → PROCESSING reusing the stored snapshot. The snapshot is
    /// the retry contract; without one the transition is refused.
    pub fn mark_retrying(&self, job_id: &str) -> Result<(RenderJob, RenderSpec)> {
        let job = self.get(job_id)?;
        if job.status != JobStatus::Failed {
            return Err(RenderError::InvalidTransition {
                job_id: job_id.to_string(),
                from: job.status,
                to: JobStatus::Processing,
            });
        }
        let spec = job
            .render_spec_snapshot
            .clone()
            .ok_or_else(|| RenderError::NoSnapshotForRetry {
                job_id: job_id.to_string(),
            })?;

        let updated = self.guarded_update(
            job_id,
            &[JobStatus::Failed],
            JobStatus::Processing,
            "UPDATE render_jobs SET status = 'PROCESSING', progress = 0,
                 step = NULL, message = NULL, error_code = NULL, error_message = NULL,
                 started_at = ?2, updated_at = ?2, finished_at = NULL
             WHERE job_id = ?1",
            rusqlite::params![job_id, Utc::now().to_rfc3339()],
        )?;
        Ok((updated, spec))
    }

    /// Step-boundary update while PROCESSING. Progress is clamped to be
    /// monotonically non-decreasing within the run.
    pub fn update_step(
        &self,
        job_id: &str,
        step: JobStep,
        progress: u8,
        message: &str,
    ) -> Result<RenderJob> {
        let current = self.get(job_id)?;
        if current.status != JobStatus::Processing {
            return Err(RenderError::InvalidTransition {
                job_id: job_id.to_string(),
                from: current.status,
                to: JobStatus::Processing,
            });
        }
        let progress = progress.clamp(current.progress, 100);
        self.lock().execute(
            "UPDATE render_jobs SET step = ?2, progress = ?3, message = ?4, updated_at = ?5
             WHERE job_id = ?1",
            rusqlite::params![
                job_id,
                step.as_str(),
                progress,
                message,
                Utc::now().to_rfc3339()
            ],
        )?;
        self.get(job_id)
    }

    /// PROCESSING → COMPLETED with assets and progress 100.
    pub fn mark_completed(&self, job_id: &str, assets: &JobAssets) -> Result<RenderJob> {
        self.guarded_update(
            job_id,
            &[JobStatus::Processing],
            JobStatus::Completed,
            "UPDATE render_jobs SET status = 'COMPLETED', progress = 100,
                 step = 'FINALIZE', message = NULL,
                 video_url = ?2, subtitle_url = ?3, thumbnail_url = ?4,
                 updated_at = ?5, finished_at = ?5
             WHERE job_id = ?1",
            rusqlite::params![
                job_id,
                assets.video_url,
                assets.subtitle_url,
                assets.thumbnail_url,
                Utc::now().to_rfc3339()
            ],
        )
    }

    /// PROCESSING → FAILED with the step's error.
    pub fn mark_failed(&self, job_id: &str, code: &str, message: &str) -> Result<RenderJob> {
        self.guarded_update(
            job_id,
            &[JobStatus::Processing],
            JobStatus::Failed,
            "UPDATE render_jobs SET status = 'FAILED', error_code = ?2, error_message = ?3,
                 updated_at = ?4, finished_at = ?4
             WHERE job_id = ?1",
            rusqlite::params![job_id, code, message, Utc::now().to_rfc3339()],
        )
    }

    /// Any non-terminal state → CANCELLED.
    pub fn cancel(&self, job_id: &str) -> Result<RenderJob> {
        self.guarded_update(
            job_id,
            &[JobStatus::Queued, JobStatus::Processing],
            JobStatus::Cancelled,
            "UPDATE render_jobs SET status = 'CANCELLED', updated_at = ?2, finished_at = ?2
             WHERE job_id = ?1",
            rusqlite::params![job_id, Utc::now().to_rfc3339()],
        )
    }

    /// Latest successfully published assets for a video.
    pub fn published_assets(&self, video_id: &str) -> Result<Option<(String, JobAssets)>> {
        let result = self
            .lock()
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM render_jobs
                     WHERE video_id = ?1 AND status = 'COMPLETED'
                     ORDER BY finished_at DESC LIMIT 1"
                ),
                [video_id],
                row_to_job,
            )
            .optional()?;
        Ok(result.map(|job| (job.job_id.clone(), job.assets.unwrap_or_default())))
    }

    /// Startup sweep: jobs left PROCESSING by a dead process cannot
    /// resume (their in-memory step loop is gone) — mark them FAILED so
    /// callers can retry from the snapshot.
    pub fn sweep_orphans(&self) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let n = self.lock().execute(
            "UPDATE render_jobs
             SET status = 'FAILED', error_code = 'GATEWAY_RESTART',
                 error_message = 'process restarted during render', updated_at = ?1, finished_at = ?1
             WHERE status = 'PROCESSING'",
            [&now],
        )?;
        if n > 0 {
            warn!(count = n, "orphaned PROCESSING jobs marked FAILED on startup");
        }
        Ok(n)
    }

    /// Re-check the current status under the lock, refuse transitions
    /// not listed in `allowed_from`, then apply `sql`.
    fn guarded_update(
        &self,
        job_id: &str,
        allowed_from: &[JobStatus],
        to: JobStatus,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<RenderJob> {
        let conn = self.lock();
        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM render_jobs WHERE job_id = ?1",
                [job_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Err(RenderError::JobNotFound {
                job_id: job_id.to_string(),
            });
        };
        let from: JobStatus = current
            .parse()
            .map_err(|e: String| RenderError::Database(rusqlite::Error::InvalidParameterName(e)))?;
        if !allowed_from.contains(&from) {
            return Err(RenderError::InvalidTransition {
                job_id: job_id.to_string(),
                from,
                to,
            });
        }
        conn.execute(sql, params)?;
        drop(conn);
        self.get(job_id)
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<RenderJob> {
    let status_str: String = row.get(3)?;
    let step_str: Option<String> = row.get(4)?;
    let snapshot_json: Option<String> = row.get(12)?;

    let video_url: Option<String> = row.get(9)?;
    let subtitle_url: Option<String> = row.get(10)?;
    let thumbnail_url: Option<String> = row.get(11)?;
    let assets = if video_url.is_some() || subtitle_url.is_some() || thumbnail_url.is_some() {
        Some(JobAssets {
            video_url,
            subtitle_url,
            thumbnail_url,
        })
    } else {
        None
    };

    Ok(RenderJob {
        job_id: row.get(0)?,
        video_id: row.get(1)?,
        script_id: row.get(2)?,
        status: status_str.parse().unwrap_or(JobStatus::Failed),
        step: step_str.and_then(|s| s.parse().ok()),
        progress: row.get::<_, i64>(5)?.clamp(0, 100) as u8,
        message: row.get(6)?,
        error_code: row.get(7)?,
        error_message: row.get(8)?,
        assets,
        render_spec_snapshot: snapshot_json.and_then(|s| serde_json::from_str(&s).ok()),
        created_by: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
        started_at: row.get(16)?,
        finished_at: row.get(17)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_clients::backend::SceneSpec;

    fn spec() -> RenderSpec {
        RenderSpec {
            script_id: "S1".into(),
            video_id: "V1".into(),
            title: "테스트".into(),
            total_duration_sec: 20.0,
            scenes: vec![SceneSpec {
                scene_id: "sc1".into(),
                scene_order: 1,
                chapter_title: "도입".into(),
                purpose: "hook".into(),
                narration: "안녕하세요.".into(),
                caption: "인사".into(),
                duration_sec: 20.0,
                visual_spec: None,
            }],
        }
    }

    #[test]
    fn create_is_idempotent_while_non_terminal() {
        let store = JobStore::in_memory().unwrap();
        let first = store.create_job("V1", "S1", Some("user")).unwrap();
        let second = store.create_job("V1", "S1", Some("user")).unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.job.job_id, second.job.job_id);
    }

    #[test]
    fn terminal_job_allows_new_creation() {
        let store = JobStore::in_memory().unwrap();
        let first = store.create_job("V1", "S1", None).unwrap();
        store.cancel(&first.job.job_id).unwrap();
        let second = store.create_job("V1", "S1", None).unwrap();
        assert!(second.created);
        assert_ne!(first.job.job_id, second.job.job_id);
    }

    #[test]
    fn start_snapshots_and_transitions() {
        let store = JobStore::in_memory().unwrap();
        let job = store.create_job("V1", "S1", None).unwrap().job;
        let started = store.mark_started(&job.job_id, &spec()).unwrap();
        assert_eq!(started.status, JobStatus::Processing);
        assert!(started.render_spec_snapshot.is_some());
        assert!(started.started_at.is_some());
    }

    #[test]
    fn double_start_is_refused() {
        let store = JobStore::in_memory().unwrap();
        let job = store.create_job("V1", "S1", None).unwrap().job;
        store.mark_started(&job.job_id, &spec()).unwrap();
        let err = store.mark_started(&job.job_id, &spec()).unwrap_err();
        assert!(matches!(err, RenderError::InvalidTransition { .. }));
    }

    #[test]
    fn progress_is_monotone_within_a_run() {
        let store = JobStore::in_memory().unwrap();
        let job = store.create_job("V1", "S1", None).unwrap().job;
        store.mark_started(&job.job_id, &spec()).unwrap();
        store
            .update_step(&job.job_id, JobStep::GenerateTts, 30, "tts")
            .unwrap();
        // a stale lower value cannot pull progress backwards
        let j = store
            .update_step(&job.job_id, JobStep::ValidateScript, 5, "late")
            .unwrap();
        assert_eq!(j.progress, 30);
    }

    #[test]
    fn terminal_states_are_immutable() {
        let store = JobStore::in_memory().unwrap();
        let job = store.create_job("V1", "S1", None).unwrap().job;
        store.mark_started(&job.job_id, &spec()).unwrap();
        store.mark_failed(&job.job_id, "RENDER_ERROR", "tts exploded").unwrap();

        assert!(store.cancel(&job.job_id).is_err());
        assert!(store.mark_completed(&job.job_id, &JobAssets::default()).is_err());
        assert!(store
            .update_step(&job.job_id, JobStep::GenerateTts, 50, "x")
            .is_err());
    }

    #[test]
    fn retry_requires_failed_with_snapshot() {
        let store = JobStore::in_memory().unwrap();
        let job = store.create_job("V1", "S1", None).unwrap().job;

        // never started — no snapshot, not FAILED
        let err = store.mark_retrying(&job.job_id).unwrap_err();
        assert!(matches!(err, RenderError::InvalidTransition { .. }));

        store.mark_started(&job.job_id, &spec()).unwrap();
        store.mark_failed(&job.job_id, "RENDER_ERROR", "boom").unwrap();

        let (retried, snapshot) = store.mark_retrying(&job.job_id).unwrap();
        assert_eq!(retried.status, JobStatus::Processing);
        assert_eq!(retried.progress, 0);
        assert_eq!(snapshot.script_id, "S1");
    }

    #[test]
    fn retry_without_snapshot_is_refused() {
        let store = JobStore::in_memory().unwrap();
        let job = store.create_job("V1", "S1", None).unwrap().job;
        store.mark_started(&job.job_id, &spec()).unwrap();
        // wipe the snapshot to simulate a legacy row
        store
            .lock()
            .execute(
                "UPDATE render_jobs SET spec_snapshot = NULL, status = 'FAILED' WHERE job_id = ?1",
                [&job.job_id],
            )
            .unwrap();
        let err = store.mark_retrying(&job.job_id).unwrap_err();
        assert_eq!(err.code(), "NO_RENDER_SPEC_FOR_RETRY");
    }

    #[test]
    fn completed_job_publishes_assets() {
        let store = JobStore::in_memory().unwrap();
        let job = store.create_job("V1", "S1", None).unwrap().job;
        store.mark_started(&job.job_id, &spec()).unwrap();
        let assets = JobAssets {
            video_url: Some("https://cdn/video.mp4".into()),
            subtitle_url: Some("https://cdn/subtitles.srt".into()),
            thumbnail_url: Some("https://cdn/thumb.jpg".into()),
        };
        let done = store.mark_completed(&job.job_id, &assets).unwrap();
        assert_eq!(done.progress, 100);
        assert_eq!(done.status, JobStatus::Completed);

        let (published_job, published) = store.published_assets("V1").unwrap().unwrap();
        assert_eq!(published_job, job.job_id);
        assert_eq!(published, assets);
    }

    #[test]
    fn published_assets_absent_without_completion() {
        let store = JobStore::in_memory().unwrap();
        store.create_job("V1", "S1", None).unwrap();
        assert!(store.published_assets("V1").unwrap().is_none());
    }

    #[test]
    fn sweep_fails_orphaned_processing_jobs() {
        let store = JobStore::in_memory().unwrap();
        let job = store.create_job("V1", "S1", None).unwrap().job;
        store.mark_started(&job.job_id, &spec()).unwrap();

        let swept = store.sweep_orphans().unwrap();
        assert_eq!(swept, 1);
        let j = store.get(&job.job_id).unwrap();
        assert_eq!(j.status, JobStatus::Failed);
        assert_eq!(j.error_code.as_deref(), Some("GATEWAY_RESTART"));
        // the snapshot survives for caller-driven retry
        assert!(j.render_spec_snapshot.is_some());
    }

    #[test]
    fn list_returns_jobs_for_video_only() {
        let store = JobStore::in_memory().unwrap();
        let a = store.create_job("V1", "S1", None).unwrap().job;
        store.cancel(&a.job_id).unwrap();
        store.create_job("V1", "S1", None).unwrap();
        store.create_job("V2", "S2", None).unwrap();
        assert_eq!(store.list_by_video("V1").unwrap().len(), 2);
        assert_eq!(store.list_by_video("V2").unwrap().len(), 1);
    }
}
