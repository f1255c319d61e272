//! VALIDATE_SCRIPT: reject specs a later step would choke on.

use crate::error::{RenderError, Result};
use crate::types::RenderSpec;

pub fn run(spec: &RenderSpec) -> Result<()> {
    if spec.scenes.is_empty() {
        return Err(RenderError::EmptySpec {
            script_id: spec.script_id.clone(),
        });
    }

    for scene in &spec.scenes {
        if scene.narration.trim().is_empty() {
            return Err(RenderError::StepFailed {
                step: "VALIDATE_SCRIPT",
                detail: format!("scene {} has empty narration", scene.scene_id),
            });
        }
        if scene.duration_sec <= 0.0 {
            return Err(RenderError::StepFailed {
                step: "VALIDATE_SCRIPT",
                detail: format!("scene {} has non-positive duration", scene.scene_id),
            });
        }
        if let Some(visual) = &scene.visual_spec {
            if !visual.is_object() {
                return Err(RenderError::StepFailed {
                    step: "VALIDATE_SCRIPT",
                    detail: format!("scene {} visual spec is not an object", scene.scene_id),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SceneSpec;

    fn scene(narration: &str, duration: f64) -> SceneSpec {
        SceneSpec {
            scene_id: "sc1".into(),
            scene_order: 1,
            chapter_title: "장".into(),
            purpose: "설명".into(),
            narration: narration.into(),
            caption: "캡션".into(),
            duration_sec: duration,
            visual_spec: None,
        }
    }

    fn spec(scenes: Vec<SceneSpec>) -> RenderSpec {
        RenderSpec {
            script_id: "S1".into(),
            video_id: "V1".into(),
            title: "t".into(),
            total_duration_sec: scenes.iter().map(|s| s.duration_sec).sum(),
            scenes,
        }
    }

    #[test]
    fn valid_spec_passes() {
        assert!(run(&spec(vec![scene("안녕하세요", 10.0)])).is_ok());
    }

    #[test]
    fn empty_scenes_rejected() {
        let err = run(&spec(vec![])).unwrap_err();
        assert_eq!(err.code(), "EMPTY_RENDER_SPEC");
    }

    #[test]
    fn empty_narration_rejected() {
        assert!(run(&spec(vec![scene("  ", 10.0)])).is_err());
    }

    #[test]
    fn zero_duration_rejected() {
        assert!(run(&spec(vec![scene("텍스트", 0.0)])).is_err());
    }

    #[test]
    fn malformed_visual_spec_rejected() {
        let mut s = scene("텍스트", 5.0);
        s.visual_spec = Some(serde_json::json!("not-an-object"));
        assert!(run(&spec(vec![s])).is_err());
    }
}
