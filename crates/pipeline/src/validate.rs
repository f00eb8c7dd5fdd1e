//! Prompt validation.

use promptgate_core::PipelineError;

/// Reject empty prompts and prompts longer than `max_chars` Unicode scalar
/// values. Length is counted in characters, not bytes.
pub fn validate_prompt(prompt: &str, max_chars: usize) -> Result<(), PipelineError> {
    if prompt.is_empty() {
        return Err(PipelineError::InvalidRequest("prompt is required".into()));
    }
    if prompt.chars().count() > max_chars {
        return Err(PipelineError::InvalidRequest(format!(
            "prompt exceeds maximum length of {max_chars} characters"
        )));
    }
    Ok(())
}
