use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use axon_clients::backend::{RenderSpec, SceneSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are immutable.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(JobStatus::Queued),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline steps in execution order. Each carries the progress value
/// the job reaches when the step completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStep {
    ValidateScript,
    GenerateTts,
    GenerateSubtitle,
    RenderSlides,
    ComposeVideo,
    UploadAssets,
    Finalize,
}

impl JobStep {
    pub const ORDER: [JobStep; 7] = [
        JobStep::ValidateScript,
        JobStep::GenerateTts,
        JobStep::GenerateSubtitle,
        JobStep::RenderSlides,
        JobStep::ComposeVideo,
        JobStep::UploadAssets,
        JobStep::Finalize,
    ];

    /// Progress when this step has finished.
    pub fn upper_bound(self) -> u8 {
        match self {
            JobStep::ValidateScript => 5,
            JobStep::GenerateTts => 30,
            JobStep::GenerateSubtitle => 40,
            JobStep::RenderSlides => 55,
            JobStep::ComposeVideo => 80,
            JobStep::UploadAssets => 95,
            JobStep::Finalize => 100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStep::ValidateScript => "VALIDATE_SCRIPT",
            JobStep::GenerateTts => "GENERATE_TTS",
            JobStep::GenerateSubtitle => "GENERATE_SUBTITLE",
            JobStep::RenderSlides => "RENDER_SLIDES",
            JobStep::ComposeVideo => "COMPOSE_VIDEO",
            JobStep::UploadAssets => "UPLOAD_ASSETS",
            JobStep::Finalize => "FINALIZE",
        }
    }

    /// Human-readable progress message published with each step start.
    pub fn message(self) -> &'static str {
        match self {
            JobStep::ValidateScript => "대본 검증 중",
            JobStep::GenerateTts => "내레이션 음성 합성 중",
            JobStep::GenerateSubtitle => "자막 생성 중",
            JobStep::RenderSlides => "슬라이드 렌더링 중",
            JobStep::ComposeVideo => "영상 합성 중",
            JobStep::UploadAssets => "산출물 업로드 중",
            JobStep::Finalize => "마무리 중",
        }
    }
}

impl FromStr for JobStep {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStep::ORDER
            .iter()
            .copied()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("unknown job step: {s}"))
    }
}

impl fmt::Display for JobStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobAssets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// One persisted render job.
#[derive(Debug, Clone, Serialize)]
pub struct RenderJob {
    pub job_id: String,
    pub video_id: String,
    pub script_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<JobStep>,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets: Option<JobAssets>,
    #[serde(skip)]
    pub render_spec_snapshot: Option<RenderSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn step_order_progress_is_monotone() {
        let bounds: Vec<u8> = JobStep::ORDER.iter().map(|s| s.upper_bound()).collect();
        assert!(bounds.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*bounds.last().unwrap(), 100);
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(s.as_str().parse::<JobStatus>().unwrap(), s);
        }
    }

    #[test]
    fn step_round_trips_through_str() {
        for step in JobStep::ORDER {
            assert_eq!(step.as_str().parse::<JobStep>().unwrap(), step);
        }
    }
}
