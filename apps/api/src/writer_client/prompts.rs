//! Cover letter prompt construction.

use crate::writer::models::{CoverLetterRequest, Tone};

/// Common formatting rules for every letter.
pub const FORMAT_INSTRUCTION: &str = "\
Write plain text only, no markdown. Start with a greeting line and end with a sign-off. \
Keep it under 400 words. Do NOT invent employers, degrees or numbers that are not in the \
applicant summary.";

const UNKNOWN: &str = "not specified";

pub fn tone_guidance(tone: Tone) -> &'static str {
    match tone {
        Tone::Professional => {
            "Tone: professional and measured. Lead with relevant experience, avoid superlatives."
        }
        Tone::Enthusiastic => {
            "Tone: warm and energetic. Show genuine interest in the company and the role."
        }
        Tone::Concise => "Tone: direct. Three short paragraphs at most, no filler sentences.",
    }
}

/// Builds the upstream prompt from the request. Missing optional fields read as "not specified".
pub fn build_cover_letter_prompt(request: &CoverLetterRequest) -> String {
    let field = |value: &Option<String>| -> String {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(UNKNOWN)
            .to_string()
    };

    let role_title = field(&request.role_title);
    let company_name = field(&request.company_name);
    let job_description = request.job_description.trim();
    let applicant_summary = field(&request.applicant_summary);
    let tone = tone_guidance(request.tone);

    // Request fields are inserted once and never rescanned.
    format!(
        "Write a cover letter for the position described below.\n\
         \n\
         Role: {role_title}\n\
         Company: {company_name}\n\
         \n\
         Job description:\n\
         {job_description}\n\
         \n\
         About the applicant:\n\
         {applicant_summary}\n\
         \n\
         {tone}\n\
         {FORMAT_INSTRUCTION}"
    )
}
