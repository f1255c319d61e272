//! Individual render steps. Each step takes the shared [`StepContext`]
//! and accumulates its outputs into [`StepArtifacts`]; the runner owns
//! ordering, progress, and cleanup.

pub mod compose;
pub mod slides;
pub mod subtitle;
pub mod tts;
pub mod upload;
pub mod validate;

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::types::{JobAssets, RenderSpec};

pub struct StepContext {
    pub job_id: String,
    pub video_id: String,
    pub script_id: String,
    pub spec: RenderSpec,
    /// Per-job temporary directory; the runner deletes it on success,
    /// failure, and cancellation.
    pub work_dir: PathBuf,
    pub cancel: CancellationToken,
}

#[derive(Default)]
pub struct StepArtifacts {
    pub audio_path: Option<PathBuf>,
    pub audio_duration_sec: Option<f64>,
    pub subtitle_path: Option<PathBuf>,
    pub slide_paths: Vec<PathBuf>,
    pub video_path: Option<PathBuf>,
    pub thumbnail_path: Option<PathBuf>,
    pub assets: JobAssets,
}
