//! RENDER_SLIDES (optional, style-dependent): one still image per
//! scene, rendered with a deterministic ffmpeg lavfi invocation so the
//! same spec always produces the same frames.

use std::path::PathBuf;

use tokio::process::Command;
use tracing::debug;

use crate::error::{RenderError, Result};
use crate::steps::{StepArtifacts, StepContext};

const SLIDE_SIZE: &str = "1280x720";
const SLIDE_BACKGROUND: &str = "0x1a1a2e";

pub async fn run(ctx: &StepContext, ffmpeg: &str, artifacts: &mut StepArtifacts) -> Result<()> {
    let mut paths: Vec<PathBuf> = Vec::with_capacity(ctx.spec.scenes.len());

    for scene in &ctx.spec.scenes {
        if ctx.cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }

        let path = ctx.work_dir.join(format!("slide-{:03}.png", scene.scene_order));
        let label = sanitise_drawtext(&scene.chapter_title);
        let filter = format!(
            "color=c={SLIDE_BACKGROUND}:s={SLIDE_SIZE},drawtext=text='{label}':\
             fontcolor=white:fontsize=48:x=(w-text_w)/2:y=(h-text_h)/2"
        );

        let output = Command::new(ffmpeg)
            .args(["-y", "-f", "lavfi", "-i", &filter, "-frames:v", "1"])
            .arg(&path)
            .output()
            .await
            .map_err(|e| RenderError::StepFailed {
                step: "RENDER_SLIDES",
                detail: format!("spawn {ffmpeg}: {e}"),
            })?;

        if !output.status.success() {
            return Err(RenderError::StepFailed {
                step: "RENDER_SLIDES",
                detail: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        debug!(scene = %scene.scene_id, path = %path.display(), "slide rendered");
        paths.push(path);
    }

    artifacts.slide_paths = paths;
    Ok(())
}

/// Strip characters that would break out of the drawtext expression.
fn sanitise_drawtext(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\'' | ':' | '\\' | '%' | ','))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drawtext_specials_are_stripped() {
        assert_eq!(sanitise_drawtext("제1장: 보안, 100%"), "제1장 보안 100");
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(sanitise_drawtext("정보보호 기초"), "정보보호 기초");
    }
}
