//! Per-session `metadata.json`.
//!
//! Written before the agent is launched so a crash mid-run still leaves
//! diagnostic state, then completed with end time and exit code.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::result::SessionStatus;
use super::workspace::FixtureSource;
use crate::config::ExecutionMode;
use crate::error::SessionError;

pub const METADATA_FILE: &str = "metadata.json";

const PROMPT_PREVIEW_CHARS: usize = 200;

/// Run metadata for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub variant_id: String,
    pub run_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixture_source: Option<FixtureSource>,
    pub start_time: DateTime<Utc>,
    pub prompt_preview: String,
    pub timeout_secs: u64,
    pub execution_mode: ExecutionMode,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionMetadata {
    /// First characters of a prompt, for quick inspection.
    pub fn preview(prompt: &str) -> String {
        prompt.chars().take(PROMPT_PREVIEW_CHARS).collect()
    }

    /// Records the end of the session.
    pub fn finish(&mut self, exit_code: i32, status: SessionStatus, error: Option<String>) {
        let end = Utc::now();
        self.duration_secs = Some((end - self.start_time).num_milliseconds() as f64 / 1000.0);
        self.end_time = Some(end);
        self.exit_code = Some(exit_code);
        self.status = Some(status);
        self.error = error;
    }

    pub fn write(&self, session_dir: &Path) -> Result<(), SessionError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(session_dir.join(METADATA_FILE), json)?;
        Ok(())
    }

    pub fn read(session_dir: &Path) -> Result<Self, SessionError> {
        let content = fs::read_to_string(session_dir.join(METADATA_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> SessionMetadata {
        SessionMetadata {
            session_id: "s-1".into(),
            variant_id: "baseline".into(),
            run_index: 0,
            fixture: None,
            fixture_source: None,
            start_time: Utc::now(),
            prompt_preview: SessionMetadata::preview("do it"),
            timeout_secs: 60,
            execution_mode: ExecutionMode::Local,
            agent: "claude".into(),
            end_time: None,
            exit_code: None,
            status: None,
            duration_secs: None,
            error: None,
        }
    }

    #[test]
    fn test_preview_is_bounded() {
        let long = "x".repeat(1000);
        assert_eq!(SessionMetadata::preview(&long).len(), PROMPT_PREVIEW_CHARS);
    }

    #[test]
    fn test_start_state_has_no_end_fields() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("end_time").is_none());
        assert!(json.get("exit_code").is_none());
        assert_eq!(json["execution_mode"], "local");
    }

    #[test]
    fn test_finish_and_reload() {
        let temp = TempDir::new().unwrap();
        let mut meta = sample();
        meta.write(temp.path()).unwrap();

        meta.finish(124, SessionStatus::Timeout, Some("timed out".into()));
        meta.write(temp.path()).unwrap();

        let loaded = SessionMetadata::read(temp.path()).unwrap();
        assert_eq!(loaded.exit_code, Some(124));
        assert_eq!(loaded.status, Some(SessionStatus::Timeout));
        assert!(loaded.end_time.is_some());
        assert!(loaded.duration_secs.unwrap() >= 0.0);
    }
}
