//! UPLOAD_ASSETS: put each artefact under the job's object-key prefix
//! and collect the public URLs.

use axon_clients::storage::{render_asset_key, StorageClient};
use tracing::info;

use crate::error::{RenderError, Result};
use crate::steps::{StepArtifacts, StepContext};

pub async fn run(
    ctx: &StepContext,
    storage: &StorageClient,
    artifacts: &mut StepArtifacts,
) -> Result<()> {
    let video = artifacts.video_path.as_ref().ok_or(RenderError::StepFailed {
        step: "UPLOAD_ASSETS",
        detail: "composed video missing".into(),
    })?;

    let uploads: [(&std::path::Path, &str, &str); 3] = [
        (video, "video.mp4", "video/mp4"),
        (
            artifacts
                .subtitle_path
                .as_deref()
                .ok_or(RenderError::StepFailed {
                    step: "UPLOAD_ASSETS",
                    detail: "subtitle file missing".into(),
                })?,
            "subtitles.srt",
            "application/x-subrip",
        ),
        (
            artifacts
                .thumbnail_path
                .as_deref()
                .ok_or(RenderError::StepFailed {
                    step: "UPLOAD_ASSETS",
                    detail: "thumbnail missing".into(),
                })?,
            "thumb.jpg",
            "image/jpeg",
        ),
    ];

    let mut urls = Vec::with_capacity(uploads.len());
    for (path, file, content_type) in uploads {
        if ctx.cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        let key = render_asset_key(&ctx.video_id, &ctx.script_id, &ctx.job_id, file);
        let url = storage
            .put_file(&key, path, content_type)
            .await
            .map_err(|e| RenderError::StepFailed {
                step: "UPLOAD_ASSETS",
                detail: format!("{file}: {e}"),
            })?;
        urls.push(url);
    }

    artifacts.assets.video_url = Some(urls[0].clone());
    artifacts.assets.subtitle_url = Some(urls[1].clone());
    artifacts.assets.thumbnail_url = Some(urls[2].clone());
    info!(job_id = %ctx.job_id, "assets uploaded");
    Ok(())
}
