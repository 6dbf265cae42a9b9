//! Scorer: judges a collected session once per rubric.
//!
//! Each rubric is scored independently. A rubric without matching files, a
//! missing rubric document, or a judge that keeps failing yields a `null`
//! score with an error; it never aborts the other rubrics. The overall score
//! is the mean of the non-null rubric scores, or `null` if there are none.

pub mod judge;
pub mod retry;
pub mod rubric;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::checks::{self, CheckResult};
use crate::collector::{collected_files, extract_token_usage, CollectionSummary, FileKind};
use crate::config::JudgeSettings;
use crate::error::{JudgeError, ScoreError};
use crate::runner::{SessionMetadata, TokenUsage, SESSION_LOG};

pub use judge::{build_judge, CommandJudge, Judge, JudgeRequest, JudgeResponse, LlmJudge};
pub use retry::{retry_with_backoff, RetryOutcome, RetryPolicy};
pub use rubric::{is_test_rubric, load_rubric, Rubric};

pub const DETAILED_SCORES_FILE: &str = "detailed-scores.json";

/// Score for one rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricScore {
    pub score: Option<f64>,
    #[serde(default)]
    pub dimensions: BTreeMap<String, f64>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RubricScore {
    fn failed(error: &ScoreError, attempts: u32) -> Self {
        Self {
            score: None,
            dimensions: BTreeMap::new(),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            attempts,
            error: Some(error.to_string()),
        }
    }
}

/// Wall-clock figures for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    /// Agent session duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_secs: Option<f64>,
    /// Time spent judging.
    pub scoring_secs: f64,
}

/// All scores for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedScore {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub overall_score: Option<f64>,
    pub by_rubric: BTreeMap<String, RubricScore>,
    /// Agent token usage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    /// Tokens spent by the judge.
    #[serde(default)]
    pub judge_usage: TokenUsage,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub checks: Vec<CheckResult>,
}

impl DetailedScore {
    pub fn read(session_dir: &Path) -> Result<Self, ScoreError> {
        let content = fs::read_to_string(session_dir.join(DETAILED_SCORES_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write(&self, session_dir: &Path) -> Result<(), ScoreError> {
        fs::write(
            session_dir.join(DETAILED_SCORES_FILE),
            serde_json::to_string_pretty(self)?,
        )?;
        Ok(())
    }
}

/// Mean of the non-null scores, `None` when there are none.
pub fn overall_score(by_rubric: &BTreeMap<String, RubricScore>) -> Option<f64> {
    let scores: Vec<f64> = by_rubric.values().filter_map(|r| r.score).collect();
    if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

/// Scores sessions with a judge.
pub struct Scorer {
    judge: Arc<dyn Judge>,
    settings: JudgeSettings,
}

impl Scorer {
    pub fn new(judge: Arc<dyn Judge>, settings: JudgeSettings) -> Self {
        Self { judge, settings }
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.settings.max_attempts,
            Duration::from_millis(self.settings.base_delay_ms),
        )
    }

    /// Scores `session_dir` against each rubric and writes `detailed-scores.json`.
    ///
    /// Only failing to write the result file is an error.
    pub async fn score(
        &self,
        session_dir: &Path,
        rubric_names: &[String],
    ) -> Result<DetailedScore, ScoreError> {
        let started = Instant::now();
        let session_id = session_id_of(session_dir);

        let code = labelled(collected_files(session_dir, FileKind::Code));
        let tests = labelled(collected_files(session_dir, FileKind::Test));

        let mut by_rubric = BTreeMap::new();
        let mut judge_usage = TokenUsage::default();

        for name in rubric_names {
            let (score, usage) = self.score_rubric(name, &code, &tests).await;
            if let Some(usage) = usage {
                judge_usage.add(usage);
            }
            match (&score.score, &score.error) {
                (Some(s), _) => info!(session_id = %session_id, rubric = %name, score = s, "Rubric scored"),
                (None, Some(e)) => warn!(session_id = %session_id, rubric = %name, "Rubric not scored: {}", e),
                _ => {}
            }
            by_rubric.insert(name.clone(), score);
        }

        let detailed = assemble(session_dir, by_rubric, judge_usage, started.elapsed());
        detailed.write(session_dir)?;
        Ok(detailed)
    }

    async fn score_rubric(
        &self,
        name: &str,
        code: &[(String, String)],
        tests: &[(String, String)],
    ) -> (RubricScore, Option<TokenUsage>) {
        let rubric = match load_rubric(&self.settings.rubrics_dir, name) {
            Ok(r) => r,
            Err(e) => return (RubricScore::failed(&e, 0), None),
        };
        let files = if rubric.is_test_oriented() { tests } else { code };
        if files.is_empty() {
            return (RubricScore::failed(&ScoreError::NoFiles, 0), None);
        }

        let request = JudgeRequest {
            rubric,
            files: files.to_vec(),
            max_score: self.settings.max_score,
            max_chars_per_file: self.settings.max_chars_per_file,
        };

        let judge = Arc::clone(&self.judge);
        let request = &request;
        let outcome = retry_with_backoff(self.policy(), JudgeError::is_transient, move |_| {
            let judge = Arc::clone(&judge);
            async move { judge.judge(request).await }
        })
        .await;

        match outcome {
            RetryOutcome::Succeeded { value, attempts } => (
                RubricScore {
                    score: Some(value.score),
                    dimensions: value.dimensions,
                    strengths: value.strengths,
                    weaknesses: value.weaknesses,
                    attempts,
                    error: None,
                },
                value.usage,
            ),
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                let err = ScoreError::Exhausted {
                    attempts,
                    last_error: last_error.to_string(),
                };
                (RubricScore::failed(&err, attempts), None)
            }
        }
    }
}

fn session_id_of(session_dir: &Path) -> String {
    SessionMetadata::read(session_dir)
        .map(|m| m.session_id)
        .ok()
        .or_else(|| {
            session_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
        })
        .unwrap_or_default()
}

/// Combines rubric scores with the session's recorded checks, usage and timing.
fn assemble(
    session_dir: &Path,
    by_rubric: BTreeMap<String, RubricScore>,
    judge_usage: TokenUsage,
    scoring: Duration,
) -> DetailedScore {
    let metadata = SessionMetadata::read(session_dir).ok();
    let token_usage = CollectionSummary::read(session_dir)
        .ok()
        .and_then(|s| s.token_usage)
        .or_else(|| {
            fs::read_to_string(session_dir.join(SESSION_LOG))
                .ok()
                .and_then(|log| extract_token_usage(&log))
        });

    DetailedScore {
        session_id: session_id_of(session_dir),
        variant_id: metadata.as_ref().map(|m| m.variant_id.clone()),
        overall_score: overall_score(&by_rubric),
        by_rubric,
        token_usage,
        judge_usage,
        timing: Timing {
            session_secs: metadata.and_then(|m| m.duration_secs),
            scoring_secs: scoring.as_secs_f64(),
        },
        checks: checks::read_results(session_dir),
    }
}

/// Records a session without judging it, keeping checks, usage and timing.
pub fn record_unscored(session_dir: &Path) -> Result<DetailedScore, ScoreError> {
    let detailed = assemble(session_dir, BTreeMap::new(), TokenUsage::default(), Duration::ZERO);
    detailed.write(session_dir)?;
    Ok(detailed)
}

fn labelled(files: Vec<(std::path::PathBuf, String)>) -> Vec<(String, String)> {
    files
        .into_iter()
        .map(|(path, content)| (path.to_string_lossy().replace('\\', "/"), content))
        .collect()
}
