//! COMPOSE_VIDEO: deterministic ffmpeg invocation combining narration
//! audio, slides (or a solid background), and the subtitle track into
//! an MP4, then a thumbnail grab from the finished video.

use std::path::Path;

use tokio::process::Command;
use tracing::info;

use crate::error::{RenderError, Result};
use crate::steps::{StepArtifacts, StepContext};

const BACKGROUND: &str = "0x1a1a2e";
const FRAME_SIZE: &str = "1280x720";

pub async fn run(ctx: &StepContext, ffmpeg: &str, artifacts: &mut StepArtifacts) -> Result<()> {
    let audio = artifacts.audio_path.as_ref().ok_or(RenderError::StepFailed {
        step: "COMPOSE_VIDEO",
        detail: "narration audio missing".into(),
    })?;
    let duration = artifacts.audio_duration_sec.unwrap_or(ctx.spec.total_duration_sec);

    if ctx.cancel.is_cancelled() {
        return Err(RenderError::Cancelled);
    }

    let video_path = ctx.work_dir.join("video.mp4");
    let mut cmd = Command::new(ffmpeg);
    cmd.arg("-y");

    if artifacts.slide_paths.is_empty() {
        cmd.args([
            "-f",
            "lavfi",
            "-i",
            &format!("color=c={BACKGROUND}:s={FRAME_SIZE}:d={duration:.3}"),
        ]);
    } else {
        // Slides advance on an even share of the runtime via the
        // concat demuxer.
        let list_path = ctx.work_dir.join("slides.txt");
        let per_slide = duration / artifacts.slide_paths.len() as f64;
        let mut listing = String::new();
        for path in &artifacts.slide_paths {
            listing.push_str(&format!("file '{}'\nduration {per_slide:.3}\n", path.display()));
        }
        // concat demuxer needs the last file repeated without a duration
        if let Some(last) = artifacts.slide_paths.last() {
            listing.push_str(&format!("file '{}'\n", last.display()));
        }
        tokio::fs::write(&list_path, listing)
            .await
            .map_err(|e| RenderError::StepFailed {
                step: "COMPOSE_VIDEO",
                detail: format!("write slide list: {e}"),
            })?;
        cmd.args(["-f", "concat", "-safe", "0", "-i"]).arg(&list_path);
    }

    cmd.arg("-i").arg(audio);
    if let Some(srt) = &artifacts.subtitle_path {
        cmd.arg("-i").arg(srt);
        cmd.args(["-c:s", "mov_text"]);
    }
    cmd.args([
        "-c:v", "libx264", "-preset", "medium", "-pix_fmt", "yuv420p",
        "-c:a", "aac", "-shortest",
    ]);
    cmd.arg(&video_path);

    let output = cmd.output().await.map_err(|e| RenderError::StepFailed {
        step: "COMPOSE_VIDEO",
        detail: format!("spawn {ffmpeg}: {e}"),
    })?;
    if !output.status.success() {
        return Err(RenderError::StepFailed {
            step: "COMPOSE_VIDEO",
            detail: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    info!(job_id = %ctx.job_id, path = %video_path.display(), "video composed");

    if ctx.cancel.is_cancelled() {
        return Err(RenderError::Cancelled);
    }

    let thumbnail_path = ctx.work_dir.join("thumb.jpg");
    extract_thumbnail(ffmpeg, &video_path, &thumbnail_path).await?;

    artifacts.video_path = Some(video_path);
    artifacts.thumbnail_path = Some(thumbnail_path);
    Ok(())
}

async fn extract_thumbnail(ffmpeg: &str, video: &Path, out: &Path) -> Result<()> {
    let output = Command::new(ffmpeg)
        .args(["-y", "-ss", "00:00:01", "-i"])
        .arg(video)
        .args(["-frames:v", "1", "-q:v", "3"])
        .arg(out)
        .output()
        .await
        .map_err(|e| RenderError::StepFailed {
            step: "COMPOSE_VIDEO",
            detail: format!("thumbnail spawn: {e}"),
        })?;
    if !output.status.success() {
        return Err(RenderError::StepFailed {
            step: "COMPOSE_VIDEO",
            detail: format!(
                "thumbnail extraction: {}",
                String::from_utf8_lossy(&output.stderr)
            ),
        });
    }
    Ok(())
}
