use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the command runner. Nothing is recovered locally; the
/// calling engine decides on retries.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("Script exited with code {exit_code}")]
    ExecutionFailed { exit_code: i32, stderr: String },
    #[error("Container backend unavailable: {message}")]
    BackendUnavailable { message: String },
    #[error("Execution timed out after {after:?}")]
    TimedOut { after: Duration },
    #[error("Failed to stage files: {message}")]
    Io { message: String },
}

impl RunnerError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        RunnerError::InvalidRequest {
            message: message.into(),
        }
    }

    pub(crate) fn io(message: impl Into<String>) -> Self {
        RunnerError::Io {
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            RunnerError::InvalidRequest { .. } => "TERRAFORM_CLI_INVALID_REQUEST",
            RunnerError::ExecutionFailed { .. } => "TERRAFORM_CLI_EXECUTION_FAILED",
            RunnerError::BackendUnavailable { .. } => "TERRAFORM_CLI_BACKEND_UNAVAILABLE",
            RunnerError::TimedOut { .. } => "TERRAFORM_CLI_TIMED_OUT",
            RunnerError::Io { .. } => "TERRAFORM_CLI_IO_ERROR",
        }
    }

    /// Exit code of the script, when the failure came from the script itself.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunnerError::ExecutionFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

pub(crate) fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = text[..end].to_string();
    truncated.push_str("… (truncated)");
    truncated
}
