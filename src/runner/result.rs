//! Session results.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Exit code recorded when the agent is killed on timeout.
pub const EXIT_TIMEOUT: i32 = 124;
/// Exit code recorded when the workspace could not be prepared.
pub const EXIT_SETUP_ERROR: i32 = 125;
/// Exit code recorded when the agent could not be spawned.
pub const EXIT_SPAWN_ERROR: i32 = 127;

/// Outcome of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    /// Variant the session ran.
    pub variant_id: String,
    /// Zero-based run index within the variant.
    pub run_index: u32,
    /// Session identifier, also the session directory name.
    pub session_id: String,
    /// `<output_dir>/<session_id>`.
    pub session_dir: PathBuf,
    /// Agent exit code, or one of the `EXIT_*` constants.
    pub exit_code: i32,
    /// How the session ended.
    pub status: SessionStatus,
    /// Wall time of the agent process in seconds.
    #[serde(default)]
    pub duration_secs: f64,
    /// Error text for anything but a clean exit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionResult {
    /// Returns true if the agent exited with code 0.
    pub fn is_success(&self) -> bool {
        self.status == SessionStatus::Completed && self.exit_code == 0
    }

    /// Path of the session's workspace directory.
    pub fn workspace_dir(&self) -> PathBuf {
        self.session_dir.join("workspace")
    }
}

/// Terminal state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Agent exited with code 0.
    Completed,
    /// Agent exited with a non-zero code.
    Failed,
    /// Agent was terminated after exceeding its timeout.
    Timeout,
    /// Agent process could not be started.
    SpawnError,
    /// Workspace or fixture preparation failed; the agent never ran.
    SetupError,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
            SessionStatus::Timeout => write!(f, "timeout"),
            SessionStatus::SpawnError => write!(f, "spawn_error"),
            SessionStatus::SetupError => write!(f, "setup_error"),
        }
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input/prompt tokens.
    pub input_tokens: u64,
    /// Output/completion tokens.
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
        }
    }

    /// Returns total tokens used.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Adds another usage record to this one.
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Truncates a string to at most `max` bytes on a char boundary.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}... [truncated]", &s[..end])
    }
}
