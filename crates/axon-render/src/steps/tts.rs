//! GENERATE_TTS: synthesise the concatenated scene narrations and
//! capture the real audio duration for subtitle reconciliation.

use axon_clients::tts::{wav_duration_secs, TtsClient};
use tracing::info;

use crate::error::{RenderError, Result};
use crate::steps::{StepArtifacts, StepContext};

pub async fn run(ctx: &StepContext, tts: &TtsClient, artifacts: &mut StepArtifacts) -> Result<()> {
    let narration = ctx
        .spec
        .scenes
        .iter()
        .map(|s| s.narration.trim())
        .collect::<Vec<_>>()
        .join("\n\n");

    let audio = tts
        .synthesize(&narration)
        .await
        .map_err(|e| RenderError::StepFailed {
            step: "GENERATE_TTS",
            detail: e.to_string(),
        })?;

    let duration = wav_duration_secs(&audio).ok_or_else(|| RenderError::StepFailed {
        step: "GENERATE_TTS",
        detail: "TTS payload is not a readable WAV".into(),
    })?;

    let path = ctx.work_dir.join("narration.wav");
    tokio::fs::write(&path, &audio)
        .await
        .map_err(|e| RenderError::StepFailed {
            step: "GENERATE_TTS",
            detail: format!("write {}: {e}", path.display()),
        })?;

    info!(job_id = %ctx.job_id, duration_sec = duration, "narration synthesised");
    artifacts.audio_path = Some(path);
    artifacts.audio_duration_sec = Some(duration);
    Ok(())
}
