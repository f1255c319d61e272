//! The job runner: operations on render jobs and the staged step loop.
//!
//! The store is the single writer of job state; the runner consults it
//! at every step boundary so an external cancel is honoured without
//! shared in-memory flags. Temporary files live in a per-job directory
//! owned by the runner and removed on success, failure, and cancel.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use axon_clients::backend::{BackendClient, RenderJobCallback, RenderSpec, ScriptStatus};
use axon_clients::storage::StorageClient;
use axon_clients::tts::TtsClient;
use axon_core::config::RenderConfig;

use crate::error::{RenderError, Result};
use crate::progress::{ProgressBus, ProgressEvent};
use crate::steps::{self, StepArtifacts, StepContext};
use crate::store::{CreateOutcome, JobStore};
use crate::types::{JobAssets, JobStatus, JobStep, RenderJob};

pub struct JobRunner {
    store: JobStore,
    bus: Arc<ProgressBus>,
    backend: Arc<BackendClient>,
    tts: Arc<TtsClient>,
    storage: Arc<StorageClient>,
    cfg: RenderConfig,
    cancels: DashMap<String, CancellationToken>,
}

impl JobRunner {
    pub fn new(
        store: JobStore,
        bus: Arc<ProgressBus>,
        backend: Arc<BackendClient>,
        tts: Arc<TtsClient>,
        storage: Arc<StorageClient>,
        cfg: RenderConfig,
    ) -> Self {
        Self {
            store,
            bus,
            backend,
            tts,
            storage,
            cfg,
            cancels: DashMap::new(),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn bus(&self) -> &Arc<ProgressBus> {
        &self.bus
    }

    /// Create (or return) the job for `video_id`. The script must be
    /// approved on the backend side.
    pub async fn create_job(
        &self,
        video_id: &str,
        script_id: &str,
        created_by: Option<&str>,
    ) -> Result<CreateOutcome> {
        let status = self.backend.fetch_script_status(script_id).await?;
        if status != ScriptStatus::Approved {
            return Err(RenderError::ScriptNotApproved {
                script_id: script_id.to_string(),
            });
        }
        self.store.create_job(video_id, script_id, created_by)
    }

    /// Fetch the spec, snapshot it, transition to PROCESSING and launch
    /// the step loop.
    pub async fn start_job(self: Arc<Self>, job_id: &str) -> Result<RenderJob> {
        let job = self.store.get(job_id)?;
        let spec = self.backend.fetch_render_spec(&job.script_id).await?;
        if spec.scenes.is_empty() {
            return Err(RenderError::EmptySpec {
                script_id: job.script_id.clone(),
            });
        }
        let started = self.store.mark_started(job_id, &spec)?;
        self.spawn_steps(started.clone(), spec);
        Ok(started)
    }

    /// Retry from FAILED using the stored snapshot — the backend is not
    /// consulted again.
    pub async fn retry_job(self: Arc<Self>, job_id: &str) -> Result<RenderJob> {
        let (job, spec) = self.store.mark_retrying(job_id)?;
        info!(job_id, "retrying render job from snapshot");
        self.spawn_steps(job.clone(), spec);
        Ok(job)
    }

    /// Cancel a non-terminal job. The step loop observes the store at
    /// the next boundary and the token mid-step.
    pub fn cancel_job(&self, job_id: &str) -> Result<RenderJob> {
        let job = self.store.cancel(job_id)?;
        if let Some((_, token)) = self.cancels.remove(job_id) {
            token.cancel();
        }
        self.bus.publish(&ProgressEvent::new(
            &job.job_id,
            &job.video_id,
            JobStatus::Cancelled,
            job.step,
            job.progress,
            Some("취소되었습니다".into()),
        ));
        self.bus.close_job(job_id);
        info!(job_id, "render job cancelled");
        Ok(job)
    }

    pub fn get_job(&self, job_id: &str) -> Result<RenderJob> {
        self.store.get(job_id)
    }

    pub fn list_jobs(&self, video_id: &str) -> Result<Vec<RenderJob>> {
        self.store.list_by_video(video_id)
    }

    pub fn published_assets(&self, video_id: &str) -> Result<Option<(String, JobAssets)>> {
        self.store.published_assets(video_id)
    }

    /// Latest PROCESSING job for a video, used by the WS handshake when
    /// no job id was given.
    pub fn active_job(&self, video_id: &str) -> Result<Option<RenderJob>> {
        Ok(self
            .store
            .list_by_video(video_id)?
            .into_iter()
            .find(|j| j.status == JobStatus::Processing))
    }

    /// Startup sweep for jobs orphaned by a previous process.
    pub fn recover_orphans(&self) -> Result<usize> {
        self.store.sweep_orphans()
    }

    /// Process shutdown: stop in-flight step loops without touching job
    /// state. The next startup's orphan sweep marks them FAILED so the
    /// caller can retry from the snapshot.
    pub fn shutdown(&self) {
        for entry in self.cancels.iter() {
            entry.value().cancel();
        }
    }

    fn spawn_steps(self: Arc<Self>, job: RenderJob, spec: RenderSpec) {
        let cancel = CancellationToken::new();
        self.cancels.insert(job.job_id.clone(), cancel.clone());
        tokio::spawn(async move {
            self.run_steps(job, spec, cancel).await;
        });
    }

    /// The step loop. Every boundary re-reads job status from the
    /// store; a job no longer PROCESSING stops without further I/O.
    pub(crate) async fn run_steps(&self, job: RenderJob, spec: RenderSpec, cancel: CancellationToken) {
        let work_dir = PathBuf::from(&self.cfg.work_dir).join(&job.job_id);
        if let Err(e) = tokio::fs::create_dir_all(&work_dir).await {
            error!(job_id = %job.job_id, err = %e, "could not create work dir");
            self.finish_failed(&job, "RENDER_ERROR", &format!("work dir: {e}")).await;
            return;
        }

        let ctx = StepContext {
            job_id: job.job_id.clone(),
            video_id: job.video_id.clone(),
            script_id: job.script_id.clone(),
            spec,
            work_dir: work_dir.clone(),
            cancel,
        };
        let mut artifacts = StepArtifacts::default();

        let mut prev_bound = 0u8;
        for step in JobStep::ORDER {
            // Boundary checks: store status first, then the token.
            match self.store.status(&job.job_id) {
                Ok(JobStatus::Processing) => {}
                Ok(status) => {
                    info!(job_id = %job.job_id, %status, "job left PROCESSING, stopping step loop");
                    self.cleanup(&job.job_id, &work_dir).await;
                    return;
                }
                Err(e) => {
                    error!(job_id = %job.job_id, err = %e, "status check failed, stopping");
                    self.cleanup(&job.job_id, &work_dir).await;
                    return;
                }
            }
            if ctx.cancel.is_cancelled() {
                self.cleanup(&job.job_id, &work_dir).await;
                return;
            }

            self.publish_step(&job, step, prev_bound);

            let result = match step {
                JobStep::ValidateScript => steps::validate::run(&ctx.spec),
                JobStep::GenerateTts => steps::tts::run(&ctx, &self.tts, &mut artifacts).await,
                JobStep::GenerateSubtitle => steps::subtitle::run(&ctx, &mut artifacts).await,
                JobStep::RenderSlides => {
                    if self.cfg.render_slides {
                        steps::slides::run(&ctx, &self.cfg.ffmpeg_path, &mut artifacts).await
                    } else {
                        Ok(())
                    }
                }
                JobStep::ComposeVideo => {
                    steps::compose::run(&ctx, &self.cfg.ffmpeg_path, &mut artifacts).await
                }
                JobStep::UploadAssets => {
                    steps::upload::run(&ctx, &self.storage, &mut artifacts).await
                }
                JobStep::Finalize => Ok(()),
            };

            match result {
                Ok(()) => {
                    prev_bound = step.upper_bound();
                    if step != JobStep::Finalize {
                        if let Ok(updated) = self.store.update_step(
                            &job.job_id,
                            step,
                            step.upper_bound(),
                            step.message(),
                        ) {
                            self.bus.publish(&ProgressEvent::new(
                                &updated.job_id,
                                &updated.video_id,
                                updated.status,
                                Some(step),
                                updated.progress,
                                None,
                            ));
                        }
                    }
                }
                Err(RenderError::Cancelled) => {
                    info!(job_id = %job.job_id, %step, "step observed cancellation");
                    self.cleanup(&job.job_id, &work_dir).await;
                    return;
                }
                Err(e) => {
                    warn!(job_id = %job.job_id, %step, err = %e, "render step failed");
                    self.cleanup(&job.job_id, &work_dir).await;
                    self.finish_failed(&job, e.code(), &e.to_string()).await;
                    return;
                }
            }
        }

        self.finish_completed(&job, &artifacts).await;
        self.cleanup(&job.job_id, &work_dir).await;
    }

    fn publish_step(&self, job: &RenderJob, step: JobStep, progress: u8) {
        if let Ok(updated) =
            self.store
                .update_step(&job.job_id, step, progress, step.message())
        {
            self.bus.publish(&ProgressEvent::new(
                &updated.job_id,
                &updated.video_id,
                updated.status,
                Some(step),
                updated.progress,
                Some(step.message().to_string()),
            ));
        }
    }

    async fn finish_completed(&self, job: &RenderJob, artifacts: &StepArtifacts) {
        let assets = artifacts.assets.clone();
        match self.store.mark_completed(&job.job_id, &assets) {
            Ok(done) => {
                info!(job_id = %job.job_id, "render job completed");
                self.bus.publish(&ProgressEvent::new(
                    &done.job_id,
                    &done.video_id,
                    JobStatus::Completed,
                    Some(JobStep::Finalize),
                    100,
                    Some("완료되었습니다".into()),
                ));
                self.bus.close_job(&job.job_id);
                self.cancels.remove(&job.job_id);

                let callback = RenderJobCallback {
                    job_id: job.job_id.clone(),
                    status: "COMPLETED".into(),
                    error_code: None,
                    video_url: assets.video_url.clone(),
                    subtitle_url: assets.subtitle_url.clone(),
                    thumbnail_url: assets.thumbnail_url.clone(),
                    duration_sec: artifacts.audio_duration_sec,
                };
                // Callback failures are logged, never fatal.
                if let Err(e) = self.backend.render_job_complete(&job.job_id, &callback).await {
                    warn!(job_id = %job.job_id, err = %e, "completion callback failed");
                }
            }
            Err(e) => {
                // A cancel can win the race right at the end; that is a
                // legitimate terminal state, not a failure.
                warn!(job_id = %job.job_id, err = %e, "completion transition refused");
            }
        }
    }

    async fn finish_failed(&self, job: &RenderJob, code: &str, detail: &str) {
        match self.store.mark_failed(&job.job_id, code, detail) {
            Ok(failed) => {
                self.bus.publish(&ProgressEvent::new(
                    &failed.job_id,
                    &failed.video_id,
                    JobStatus::Failed,
                    failed.step,
                    failed.progress,
                    Some(detail.to_string()),
                ));
                self.bus.close_job(&job.job_id);
                self.cancels.remove(&job.job_id);

                let callback = RenderJobCallback {
                    job_id: job.job_id.clone(),
                    status: "FAILED".into(),
                    error_code: Some(code.to_string()),
                    video_url: None,
                    subtitle_url: None,
                    thumbnail_url: None,
                    duration_sec: None,
                };
                if let Err(e) = self.backend.render_job_complete(&job.job_id, &callback).await {
                    warn!(job_id = %job.job_id, err = %e, "failure callback failed");
                }
            }
            Err(e) => warn!(job_id = %job.job_id, err = %e, "failure transition refused"),
        }
    }

    async fn cleanup(&self, job_id: &str, work_dir: &PathBuf) {
        self.cancels.remove(job_id);
        if let Err(e) = tokio::fs::remove_dir_all(work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(job_id, err = %e, "temp cleanup failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_clients::backend::SceneSpec;
    use axon_core::config::{BackendConfig, StorageConfig, TtsConfig};

    fn runner() -> Arc<JobRunner> {
        let store = JobStore::in_memory().unwrap();
        let backend = Arc::new(BackendClient::new(&BackendConfig {
            base_url: "http://127.0.0.1:1".into(),
            internal_token: "t".into(),
            timeout_secs: 1,
        }));
        let tts = Arc::new(TtsClient::new(&TtsConfig {
            base_url: "http://127.0.0.1:1".into(),
            api_key: None,
            voice: "default".into(),
            timeout_secs: 1,
        }));
        let storage = Arc::new(StorageClient::new(&StorageConfig::default()));
        let mut cfg = RenderConfig::default();
        cfg.work_dir = std::env::temp_dir()
            .join(format!("axon-render-test-{}", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        Arc::new(JobRunner::new(
            store,
            Arc::new(ProgressBus::new()),
            backend,
            tts,
            storage,
            cfg,
        ))
    }

    fn spec() -> RenderSpec {
        RenderSpec {
            script_id: "S1".into(),
            video_id: "V1".into(),
            title: "t".into(),
            total_duration_sec: 10.0,
            scenes: vec![SceneSpec {
                scene_id: "sc1".into(),
                scene_order: 1,
                chapter_title: "장".into(),
                purpose: "설명".into(),
                narration: "안녕하세요".into(),
                caption: "인사".into(),
                duration_sec: 10.0,
                visual_spec: None,
            }],
        }
    }

    #[tokio::test]
    async fn tts_failure_marks_job_failed_with_terminal_event() {
        let r = runner();
        let job = r.store().create_job("V1", "S1", None).unwrap().job;
        let started = r.store().mark_started(&job.job_id, &spec()).unwrap();
        let mut rx = r.bus().subscribe(&job.job_id);

        r.run_steps(started, spec(), CancellationToken::new()).await;

        let j = r.get_job(&job.job_id).unwrap();
        assert_eq!(j.status, JobStatus::Failed);
        assert_eq!(j.error_code.as_deref(), Some("RENDER_ERROR"));

        // a terminal FAILED event reaches the subscriber
        let mut saw_failed = false;
        while let Ok(event) = rx.try_recv() {
            if event.status == JobStatus::Failed {
                saw_failed = true;
            }
        }
        assert!(saw_failed);
    }

    #[tokio::test]
    async fn cancelled_job_stops_before_first_step() {
        let r = runner();
        let job = r.store().create_job("V1", "S1", None).unwrap().job;
        let started = r.store().mark_started(&job.job_id, &spec()).unwrap();
        r.cancel_job(&job.job_id).unwrap();

        r.run_steps(started, spec(), CancellationToken::new()).await;

        let j = r.get_job(&job.job_id).unwrap();
        assert_eq!(j.status, JobStatus::Cancelled);
        // the loop never flipped the terminal state
        assert!(j.error_code.is_none());
    }

    #[tokio::test]
    async fn retry_after_failure_reuses_snapshot() {
        let r = runner();
        let job = r.store().create_job("V1", "S1", None).unwrap().job;
        r.store().mark_started(&job.job_id, &spec()).unwrap();
        r.store()
            .mark_failed(&job.job_id, "RENDER_ERROR", "tts down")
            .unwrap();

        let retried = r.retry_job(&job.job_id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Processing);
        assert_eq!(retried.progress, 0);
    }

    #[tokio::test]
    async fn cancel_of_terminal_job_is_refused() {
        let r = runner();
        let job = r.store().create_job("V1", "S1", None).unwrap().job;
        r.store().mark_started(&job.job_id, &spec()).unwrap();
        r.store()
            .mark_failed(&job.job_id, "RENDER_ERROR", "x")
            .unwrap();
        assert!(r.cancel_job(&job.job_id).is_err());
    }
}
