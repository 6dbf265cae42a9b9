//! Error types for variant-forge operations.
//!
//! Errors are split by the granularity at which they occur:
//! - Spec loading and validation (fatal, aborts before any execution)
//! - Session execution (per unit, recorded on the session result)
//! - Binary checks (per check, recorded as a failed check)
//! - Scoring and judging (per rubric, recorded as a null score)
//! - Result collection (recorded in the summary status)
//! - Harness-level I/O (fatal, non-zero exit)

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading an evaluation spec.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("Spec file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to parse spec '{path}': {message}")]
    ParseError { path: String, message: String },

    #[error("Invalid spec: {field}: {message}")]
    ValidationError { field: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpecError {
    /// Shorthand for a validation failure on a named field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        SpecError::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns the offending field for validation errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            SpecError::ValidationError { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Errors raised while executing a single session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Workspace setup failed: {0}")]
    Setup(String),

    #[error("Fixture '{fixture}' could not be materialized: {reason}")]
    Fixture { fixture: String, reason: String },

    #[error("Failed to spawn agent '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("Agent timed out after {0:?}")]
    Timeout(Duration),

    #[error("Agent did not report a session id")]
    MissingSessionId,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while running a binary check.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("Check '{name}' could not be executed: {reason}")]
    Execution { name: String, reason: String },

    #[error("Check '{name}' timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },
}

/// Errors raised while collecting session artifacts.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("Session '{0}' did not complete before the collection timeout")]
    Timeout(String),

    #[error("Source directory does not exist: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("Invalid glob pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("Remote fetch failed: {0}")]
    Fetch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by a judge backend.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("Judge invocation failed: {0}")]
    Invocation(String),

    #[error("Judge timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to parse judge response: {0}")]
    Parse(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

impl JudgeError {
    /// Whether another attempt could reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            JudgeError::Invocation(_) | JudgeError::Timeout(_) | JudgeError::Parse(_) => true,
            JudgeError::Llm(e) => e.is_transient(),
        }
    }
}

/// Errors raised while scoring a session against a rubric.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("Rubric '{0}' not found")]
    RubricNotFound(String),

    #[error("no files to judge")]
    NoFiles,

    #[error("Judge failed after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the chat-completions client.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key for judge model")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

impl LlmError {
    /// Rate limits, transport failures and 5xx responses are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(_) | LlmError::RateLimited(_) | LlmError::ParseError(_) => true,
            LlmError::ApiError { code, .. } => *code >= 500,
            LlmError::MissingApiKey => false,
        }
    }
}

/// Fatal harness errors that abort the whole invocation.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("Cannot create output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Score(#[from] ScoreError),

    #[error(transparent)]
    Judge(#[from] JudgeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_error_field() {
        let err = SpecError::invalid("variants", "must not be empty");
        assert_eq!(err.field(), Some("variants"));
        assert!(err.to_string().contains("variants"));
        assert_eq!(SpecError::NotFound(PathBuf::from("x.yaml")).field(), None);
    }

    #[test]
    fn test_transient_classification() {
        assert!(JudgeError::Parse("bad".into()).is_transient());
        assert!(JudgeError::Llm(LlmError::RateLimited("slow down".into())).is_transient());
        assert!(!JudgeError::Llm(LlmError::MissingApiKey).is_transient());
        assert!(!LlmError::ApiError {
            code: 400,
            message: "bad request".into()
        }
        .is_transient());
        assert!(LlmError::ApiError {
            code: 503,
            message: "unavailable".into()
        }
        .is_transient());
    }

    #[test]
    fn test_no_files_message() {
        assert_eq!(ScoreError::NoFiles.to_string(), "no files to judge");
    }
}
