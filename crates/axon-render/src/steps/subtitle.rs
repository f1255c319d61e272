//! GENERATE_SUBTITLE: timed SRT captions aligned to scene durations,
//! rescaled so the cue track ends exactly when the narration does.

use crate::error::{RenderError, Result};
use crate::steps::{StepArtifacts, StepContext};
use crate::types::SceneSpec;

pub async fn run(ctx: &StepContext, artifacts: &mut StepArtifacts) -> Result<()> {
    let audio_duration = artifacts.audio_duration_sec.ok_or(RenderError::StepFailed {
        step: "GENERATE_SUBTITLE",
        detail: "audio duration missing (TTS step did not run)".into(),
    })?;

    let srt = build_srt(&ctx.spec.scenes, audio_duration);
    let path = ctx.work_dir.join("subtitles.srt");
    tokio::fs::write(&path, srt)
        .await
        .map_err(|e| RenderError::StepFailed {
            step: "GENERATE_SUBTITLE",
            detail: format!("write {}: {e}", path.display()),
        })?;

    artifacts.subtitle_path = Some(path);
    Ok(())
}

/// Scene captions as SRT cues. Scene durations are scaled by
/// `audio_duration / declared_total` so cues track the actual speech.
pub fn build_srt(scenes: &[SceneSpec], audio_duration: f64) -> String {
    let declared_total: f64 = scenes.iter().map(|s| s.duration_sec).sum();
    let scale = if declared_total > 0.0 {
        audio_duration / declared_total
    } else {
        1.0
    };

    let mut out = String::new();
    let mut cursor = 0.0_f64;
    for (i, scene) in scenes.iter().enumerate() {
        let start = cursor;
        let end = cursor + scene.duration_sec * scale;
        cursor = end;

        let text = if scene.caption.trim().is_empty() {
            scene.narration.trim()
        } else {
            scene.caption.trim()
        };

        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_timestamp(start),
            format_timestamp(end),
            text
        ));
    }
    out
}

/// SRT timestamp: `HH:MM:SS,mmm`.
fn format_timestamp(secs: f64) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let h = total_ms / 3_600_000;
    let m = (total_ms % 3_600_000) / 60_000;
    let s = (total_ms % 60_000) / 1000;
    let ms = total_ms % 1000;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(order: u32, caption: &str, duration: f64) -> SceneSpec {
        SceneSpec {
            scene_id: format!("sc{order}"),
            scene_order: order,
            chapter_title: "장".into(),
            purpose: "설명".into(),
            narration: "내레이션".into(),
            caption: caption.into(),
            duration_sec: duration,
            visual_spec: None,
        }
    }

    #[test]
    fn timestamps_format_correctly() {
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_timestamp(61.5), "00:01:01,500");
        assert_eq!(format_timestamp(3725.042), "01:02:05,042");
    }

    #[test]
    fn cues_cover_scenes_in_order() {
        let srt = build_srt(&[scene(1, "첫 장면", 10.0), scene(2, "둘째 장면", 10.0)], 20.0);
        let cues: Vec<&str> = srt.split("\n\n").filter(|s| !s.is_empty()).collect();
        assert_eq!(cues.len(), 2);
        assert!(cues[0].contains("00:00:00,000 --> 00:00:10,000"));
        assert!(cues[1].contains("00:00:10,000 --> 00:00:20,000"));
        assert!(cues[0].contains("첫 장면"));
    }

    #[test]
    fn cues_scale_to_actual_audio_duration() {
        // declared 20 s, actual speech 10 s — cues compress to match
        let srt = build_srt(&[scene(1, "a", 10.0), scene(2, "b", 10.0)], 10.0);
        assert!(srt.contains("00:00:05,000 --> 00:00:10,000"));
    }

    #[test]
    fn blank_caption_falls_back_to_narration() {
        let srt = build_srt(&[scene(1, "  ", 5.0)], 5.0);
        assert!(srt.contains("내레이션"));
    }
}
