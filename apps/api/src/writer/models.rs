use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;

/// Upper bound on pasted job descriptions.
pub const MAX_JOB_DESCRIPTION_CHARS: usize = 20_000;

/// Tone requested for the cover letter. Drives the guidance line in the prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Professional,
    Enthusiastic,
    Concise,
}

/// Request body for cover letter generation.
#[derive(Debug, Clone, Deserialize)]
pub struct CoverLetterRequest {
    /// Client-chosen id scoping "one generation at a time".
    pub session_id: Uuid,
    pub job_description: String,
    pub company_name: Option<String>,
    pub role_title: Option<String>,
    /// Short summary of the applicant's profile (headline, experience, skills).
    pub applicant_summary: Option<String>,
    #[serde(default)]
    pub tone: Tone,
}

impl CoverLetterRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.job_description.trim().is_empty() {
            return Err(AppError::Validation(
                "job_description cannot be empty".to_string(),
            ));
        }
        if self.job_description.chars().count() > MAX_JOB_DESCRIPTION_CHARS {
            return Err(AppError::Validation(format!(
                "job_description exceeds {MAX_JOB_DESCRIPTION_CHARS} characters"
            )));
        }
        Ok(())
    }
}

/// Response body for the non-streaming generation endpoint.
#[derive(Debug, Serialize)]
pub struct CoverLetterResponse {
    pub generation_id: Uuid,
    pub text: String,
    pub partial: bool,
    pub updates: usize,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// Events pushed to the SSE client while a generation streams.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WriterEvent {
    /// Full accumulated text after an append.
    Snapshot { text: String },
    /// Terminal success. `partial` is set when the stream broke off after
    /// producing text.
    Done { text: String, partial: bool },
    /// Terminal failure. The client clears any partially shown text.
    Failed { message: String },
}

impl WriterEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WriterEvent::Snapshot { .. } => "snapshot",
            WriterEvent::Done { .. } => "done",
            WriterEvent::Failed { .. } => "failed",
        }
    }
}
