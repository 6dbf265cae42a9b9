//! Result collector.
//!
//! Waits for a session to settle, optionally pulls remote artifacts, copies
//! code and test files into `<output>/<session_id>/{code,tests}` and writes a
//! normalized `summary.json`.
//!
//! Lifecycle: `pending → (poll until marker or timeout) → complete | incomplete | timeout`.

pub mod classify;
pub mod extract;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::CollectorSettings;
use crate::error::CollectionError;
use crate::process::{run_with_timeout, shell};
use crate::runner::{SessionMetadata, SessionStatus, TokenUsage, SESSION_LOG};

pub use classify::{classify, FileKind};
pub use extract::{extract_file_paths, extract_session_id, extract_token_usage, FieldPath};

pub const SUMMARY_FILE: &str = "summary.json";
pub const CODE_DIR: &str = "code";
pub const TESTS_DIR: &str = "tests";

const FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Options for one collection.
#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub patterns: Vec<String>,
    /// Collect whatever exists without waiting for completion.
    pub force: bool,
    pub max_files: usize,
    pub max_file_bytes: u64,
    pub complete_marker: String,
    pub fetch_command: Option<String>,
}

impl CollectOptions {
    pub fn from_settings(settings: &CollectorSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            poll_interval: settings.poll_interval(),
            patterns: settings.patterns.clone(),
            force: false,
            max_files: settings.max_files,
            max_file_bytes: settings.max_file_bytes,
            complete_marker: settings.complete_marker.clone(),
            fetch_command: settings.fetch_command.clone(),
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Complete,
    Incomplete,
    Timeout,
}

impl std::fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectionStatus::Complete => write!(f, "complete"),
            CollectionStatus::Incomplete => write!(f, "incomplete"),
            CollectionStatus::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedFile {
    /// Path relative to the source directory.
    pub path: String,
    pub bytes: u64,
}

/// Normalized per-session summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub session_id: String,
    pub status: CollectionStatus,
    pub code_files: Vec<CollectedFile>,
    pub test_files: Vec<CollectedFile>,
    pub code_bytes: u64,
    pub test_bytes: u64,
    /// Files over the per-file size limit.
    #[serde(default)]
    pub skipped_files: Vec<CollectedFile>,
    /// True when the file-count limit stopped collection early.
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub touched_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CollectionSummary {
    pub fn read(session_dir: &Path) -> Result<Self, CollectionError> {
        let content = fs::read_to_string(session_dir.join(SUMMARY_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write(&self, session_dir: &Path) -> Result<(), CollectionError> {
        fs::write(
            session_dir.join(SUMMARY_FILE),
            serde_json::to_string_pretty(self)?,
        )?;
        Ok(())
    }
}

/// Compiles collector glob patterns. An empty list matches everything.
pub fn compile_patterns(patterns: &[String]) -> Result<GlobSet, CollectionError> {
    let mut builder = GlobSetBuilder::new();
    let all = ["**/*".to_string()];
    let patterns = if patterns.is_empty() { &all[..] } else { patterns };
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| CollectionError::Pattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| CollectionError::Pattern {
        pattern: patterns.join(","),
        message: e.to_string(),
    })
}

/// Collects a session's artifacts into `output_dir/<session_id>`.
pub async fn collect(
    session_id: &str,
    source_dir: &Path,
    output_dir: &Path,
    opts: &CollectOptions,
) -> Result<CollectionSummary, CollectionError> {
    let globs = compile_patterns(&opts.patterns)?;
    let dest = output_dir.join(session_id);
    fs::create_dir_all(&dest)?;

    if !opts.force {
        if let Ok(existing) = CollectionSummary::read(&dest) {
            if existing.status == CollectionStatus::Complete {
                debug!(session_id, "Already collected");
                return Ok(existing);
            }
        }
    }

    let status = match wait_for_completion(session_id, source_dir, &dest, opts).await {
        CollectionStatus::Complete => settled_status(source_dir, &dest),
        other => other,
    };
    info!(session_id, %status, "Collecting artifacts");

    let mut summary = CollectionSummary {
        session_id: session_id.to_string(),
        status,
        code_files: Vec::new(),
        test_files: Vec::new(),
        code_bytes: 0,
        test_bytes: 0,
        skipped_files: Vec::new(),
        truncated: false,
        touched_files: Vec::new(),
        token_usage: None,
        duration_secs: None,
        error: None,
    };

    if source_dir.is_dir() {
        copy_artifacts(source_dir, &dest, &globs, opts, &mut summary)?;
    } else {
        summary.error = Some(CollectionError::MissingSource(source_dir.to_path_buf()).to_string());
    }

    let log = [dest.join(SESSION_LOG), source_dir.join(SESSION_LOG)]
        .into_iter()
        .find_map(|p| fs::read_to_string(p).ok());
    if let Some(log) = log {
        summary.touched_files = extract_file_paths(&log);
        summary.token_usage = extract_token_usage(&log);
    }
    summary.duration_secs = SessionMetadata::read(&dest)
        .ok()
        .and_then(|m| m.duration_secs);

    summary.write(&dest)?;
    Ok(summary)
}

/// A settled session only counts as complete if its agent finished cleanly.
fn settled_status(source_dir: &Path, dest: &Path) -> CollectionStatus {
    let recorded = [dest, source_dir]
        .into_iter()
        .find_map(|dir| SessionMetadata::read(dir).ok())
        .and_then(|m| m.status);
    match recorded {
        None | Some(SessionStatus::Completed) => CollectionStatus::Complete,
        Some(SessionStatus::Timeout) => CollectionStatus::Timeout,
        Some(SessionStatus::Failed | SessionStatus::SpawnError | SessionStatus::SetupError) => {
            CollectionStatus::Incomplete
        }
    }
}

async fn wait_for_completion(
    session_id: &str,
    source_dir: &Path,
    dest: &Path,
    opts: &CollectOptions,
) -> CollectionStatus {
    let deadline = Instant::now() + opts.timeout;
    loop {
        if let Some(template) = &opts.fetch_command {
            if let Err(e) = fetch(template, session_id, source_dir).await {
                warn!(session_id, "{}", e);
            }
        }
        let complete = [source_dir, dest]
            .iter()
            .any(|dir| dir.join(&opts.complete_marker).exists());
        if complete {
            return CollectionStatus::Complete;
        }
        if opts.force {
            return CollectionStatus::Incomplete;
        }
        let now = Instant::now();
        if now >= deadline {
            warn!(session_id, "Session not complete after {:?}", opts.timeout);
            return CollectionStatus::Timeout;
        }
        tokio::time::sleep(opts.poll_interval.min(deadline - now)).await;
    }
}

async fn fetch(template: &str, session_id: &str, dest: &Path) -> Result<(), CollectionError> {
    fs::create_dir_all(dest)?;
    let script = template
        .replace("{session_id}", session_id)
        .replace("{dest}", &dest.display().to_string());
    let output = run_with_timeout(shell(&script), None, FETCH_TIMEOUT)
        .await
        .map_err(|e| CollectionError::Fetch(e.to_string()))?;
    if output.timed_out {
        return Err(CollectionError::Fetch(format!("timed out after {:?}", FETCH_TIMEOUT)));
    }
    if !output.success() {
        return Err(CollectionError::Fetch(output.stderr.trim().to_string()));
    }
    Ok(())
}

fn copy_artifacts(
    source_dir: &Path,
    dest: &Path,
    globs: &GlobSet,
    opts: &CollectOptions,
    summary: &mut CollectionSummary,
) -> Result<(), CollectionError> {
    let code_root = dest.join(CODE_DIR);
    let tests_root = dest.join(TESTS_DIR);
    for dir in [&code_root, &tests_root] {
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
    }

    let walker = WalkDir::new(source_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.file_name().to_str().map(classify::is_excluded_dir).unwrap_or(false))
        });

    let mut copied = 0usize;
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(source_dir) else {
            continue;
        };
        if !globs.is_match(relative) {
            continue;
        }

        let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let record = CollectedFile {
            path: relative_string(relative),
            bytes,
        };
        if bytes > opts.max_file_bytes {
            summary.skipped_files.push(record);
            continue;
        }
        if copied >= opts.max_files {
            warn!(session_id = %summary.session_id, limit = opts.max_files, "File limit reached");
            summary.truncated = true;
            break;
        }

        let (root, files, total) = match classify(relative) {
            FileKind::Code => (&code_root, &mut summary.code_files, &mut summary.code_bytes),
            FileKind::Test => (&tests_root, &mut summary.test_files, &mut summary.test_bytes),
        };
        let target = root.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(entry.path(), &target)?;
        *total += bytes;
        files.push(record);
        copied += 1;
    }

    summary.code_files.sort_by(|a, b| a.path.cmp(&b.path));
    summary.test_files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(())
}

fn relative_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Reads collected files of one kind from a session directory.
pub fn collected_files(session_dir: &Path, kind: FileKind) -> Vec<(PathBuf, String)> {
    let root = session_dir.join(match kind {
        FileKind::Code => CODE_DIR,
        FileKind::Test => TESTS_DIR,
    });
    if !root.is_dir() {
        return Vec::new();
    }
    WalkDir::new(&root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let content = fs::read_to_string(e.path()).ok()?;
            let relative = e.path().strip_prefix(&root).ok()?.to_path_buf();
            Some((relative, content))
        })
        .collect()
}
