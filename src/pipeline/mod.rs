//! End-to-end evaluation pipeline.
//!
//! Ties the components together for one `run` invocation:
//!
//! 1. **Orchestrate**: every `variant × run` unit through the session runner
//! 2. **Check**: binary checks against each session workspace (`checks.json`)
//! 3. **Collect**: code/test files and `summary.json` per session
//! 4. **Score**: one judge call per rubric (`detailed-scores.json`)
//! 5. **Aggregate**: per-variant statistics (`report.json`, `report.md`)
//!
//! Per-session failures at any stage are recorded and the pipeline moves on.
//! Only output-directory I/O aborts a run.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use variant_forge::config::HarnessConfig;
//! use variant_forge::pipeline::{EvalPipeline, RunOptions};
//!
//! let config = Arc::new(HarnessConfig::default());
//! let spec = variant_forge::spec::load("evals/wordle.yaml")?;
//! let pipeline = EvalPipeline::from_config(config)?;
//! let outcome = pipeline.run(&spec, "results".as_ref(), &RunOptions::default()).await?;
//! println!("{}", outcome.run_dir.display());
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::{self, render_markdown, Report};
use crate::checks;
use crate::collector::{self, CollectOptions, CollectionSummary};
use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::orchestrator::{Orchestrator, RunAllOptions, RunMetadata, SessionExecutor};
use crate::runner::{remove_workspace, SessionResult, SessionRunner};
use crate::scorer::{self, build_judge, DetailedScore, Scorer};
use crate::spec::EvalSpec;

pub const REPORT_JSON: &str = "report.json";
pub const REPORT_MD: &str = "report.md";

/// Options for one `run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub parallelism: usize,
    pub timeout_override: Option<u64>,
    pub runs_override: Option<u32>,
    pub keep_workspaces: bool,
    /// Judge sessions; when false only checks, usage and timing are recorded.
    pub score: bool,
    /// Overrides the spec's baseline.
    pub baseline: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            timeout_override: None,
            runs_override: None,
            keep_workspaces: false,
            score: true,
            baseline: None,
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_dir: PathBuf,
    pub sessions: Vec<SessionResult>,
    pub report: Report,
}

/// Runs specs end to end.
pub struct EvalPipeline {
    config: Arc<HarnessConfig>,
    executor: Arc<dyn SessionExecutor>,
    scorer: Option<Scorer>,
}

impl EvalPipeline {
    /// Pipeline with an explicit executor and scorer.
    pub fn new(
        config: Arc<HarnessConfig>,
        executor: Arc<dyn SessionExecutor>,
        scorer: Option<Scorer>,
    ) -> Self {
        Self {
            config,
            executor,
            scorer,
        }
    }

    /// Pipeline using the configured agent command and judge backend.
    pub fn from_config(config: Arc<HarnessConfig>) -> Result<Self, HarnessError> {
        let judge = build_judge(&config.judge)?;
        let scorer = Scorer::new(judge, config.judge.clone());
        let executor = Arc::new(SessionRunner::from_config(Arc::clone(&config)));
        Ok(Self::new(config, executor, Some(scorer)))
    }

    /// Directory for one run: `<output>/<spec name>_<timestamp>`.
    pub fn run_dir_for(spec: &EvalSpec, output_root: &Path) -> PathBuf {
        let safe_name: String = spec
            .name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        output_root.join(format!(
            "{}_{}",
            safe_name,
            Utc::now().format("%Y-%m-%d_%H-%M-%S")
        ))
    }

    pub async fn run(
        &self,
        spec: &EvalSpec,
        output_root: &Path,
        opts: &RunOptions,
    ) -> Result<RunOutcome, HarnessError> {
        let run_dir = Self::run_dir_for(spec, output_root);
        fs::create_dir_all(&run_dir).map_err(|source| HarnessError::OutputDir {
            path: run_dir.clone(),
            source,
        })?;
        info!(run_dir = %run_dir.display(), "Run directory created");

        // Workspaces stay until checks and collection have read them.
        let orchestrator = Orchestrator::new(Arc::clone(&self.executor));
        let sessions = orchestrator
            .run_all(
                spec,
                &run_dir,
                &RunAllOptions {
                    parallelism: opts.parallelism,
                    timeout_override: opts.timeout_override,
                    runs_override: opts.runs_override,
                    keep_workspaces: true,
                },
            )
            .await?;

        let rubrics = if opts.score { spec.rubric_names() } else { Vec::new() };
        let mut scores = Vec::with_capacity(sessions.len());
        for chunk in sessions.chunks(opts.parallelism.max(1)) {
            let processed = futures::future::join_all(
                chunk
                    .iter()
                    .map(|s| self.process_session(spec, s, &run_dir, &rubrics, opts)),
            )
            .await;
            for result in processed {
                scores.push(result?);
            }
        }

        let baseline = opts.baseline.clone().or_else(|| spec.baseline.clone());
        let report = build_report(spec, scores, baseline.as_deref());
        write_report(&run_dir, &report)?;

        Ok(RunOutcome {
            run_dir,
            sessions,
            report,
        })
    }

    async fn process_session(
        &self,
        spec: &EvalSpec,
        session: &SessionResult,
        run_dir: &Path,
        rubrics: &[String],
        opts: &RunOptions,
    ) -> Result<DetailedScore, HarnessError> {
        let workspace = session.workspace_dir();
        let session_dir = &session.session_dir;

        if workspace.is_dir() {
            let results =
                checks::check(&workspace, &spec.binary_checks, self.config.check_timeout()).await;
            checks::write_results(session_dir, &results)?;
        } else {
            warn!(session_id = %session.session_id, "No workspace; skipping binary checks");
        }

        let collect_opts = CollectOptions::from_settings(&self.config.collector);
        if let Err(e) =
            collector::collect(&session.session_id, &workspace, run_dir, &collect_opts).await
        {
            warn!(session_id = %session.session_id, "Collection failed: {}", e);
        }

        if !(opts.keep_workspaces || self.config.keep_workspaces) {
            remove_workspace(&workspace);
        }

        let scored = match &self.scorer {
            Some(scorer) if !rubrics.is_empty() => scorer.score(session_dir, rubrics).await?,
            _ => scorer::record_unscored(session_dir)?,
        };
        Ok(scored)
    }
}

fn build_report(spec: &EvalSpec, scores: Vec<DetailedScore>, baseline: Option<&str>) -> Report {
    let order: Vec<String> = spec.variants.iter().map(|v| v.id.clone()).collect();
    let grouped = aggregate::group_by_variant(scores);
    let mut report = aggregate::aggregate(&grouped, &order, baseline);
    report.name = Some(spec.name.clone());
    report
}

fn write_report(run_dir: &Path, report: &Report) -> Result<(), HarnessError> {
    let json_path = run_dir.join(REPORT_JSON);
    fs::write(&json_path, serde_json::to_string_pretty(report)?).map_err(|source| {
        HarnessError::Write {
            path: json_path,
            source,
        }
    })?;
    let md_path = run_dir.join(REPORT_MD);
    fs::write(&md_path, render_markdown(report)).map_err(|source| HarnessError::Write {
        path: md_path,
        source,
    })
}

/// Rebuilds the report of an existing run directory.
///
/// Sessions without `detailed-scores.json` are recorded unscored first.
pub fn report_from_dir(run_dir: &Path, baseline: Option<&str>) -> Result<Report, HarnessError> {
    let metadata = RunMetadata::read(run_dir)?;
    let mut order: Vec<String> = Vec::new();
    let mut scores = Vec::with_capacity(metadata.sessions.len());

    for session in &metadata.sessions {
        if !order.contains(&session.variant_id) {
            order.push(session.variant_id.clone());
        }
        let mut score = match DetailedScore::read(&session.session_dir) {
            Ok(s) => s,
            Err(_) => scorer::record_unscored(&session.session_dir)?,
        };
        score.variant_id.get_or_insert_with(|| session.variant_id.clone());
        scores.push(score);
    }

    let baseline = baseline.map(String::from).or(metadata.baseline.clone());
    let grouped = aggregate::group_by_variant(scores);
    let mut report = aggregate::aggregate(&grouped, &order, baseline.as_deref());
    report.name = Some(metadata.spec_name.clone());
    write_report(run_dir, &report)?;
    Ok(report)
}

/// Summaries of all collected sessions in a run, keyed by session id.
pub fn collected_summaries(run_dir: &Path) -> BTreeMap<String, CollectionSummary> {
    let Ok(metadata) = RunMetadata::read(run_dir) else {
        return BTreeMap::new();
    };
    metadata
        .sessions
        .iter()
        .filter_map(|s| {
            CollectionSummary::read(&s.session_dir)
                .ok()
                .map(|summary| (s.session_id.clone(), summary))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentCommand;
    use crate::spec::{load_str, SpecFormat};
    use tempfile::TempDir;

    const SPEC: &str = r#"
name: hello
prompt: "Create output.txt"
variants:
  - id: base
  - id: eager
    prompt_suffix: " now"
binary_checks:
  - name: has-output
    command: "test -f output.txt"
metrics: []
baseline: base
"#;

    fn pipeline(script: &str) -> EvalPipeline {
        let config = Arc::new(HarnessConfig::default().with_agent(AgentCommand {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            stdin_prompt: true,
        }));
        let executor = Arc::new(SessionRunner::from_config(Arc::clone(&config)));
        EvalPipeline::new(config, executor, None)
    }

    #[tokio::test]
    async fn test_unscored_run_writes_reports() {
        let temp = TempDir::new().unwrap();
        let spec = load_str(SPEC, SpecFormat::Yaml).unwrap();
        let pipeline = pipeline(
            r#"p=$(cat); case "$p" in *now) echo hi > output.txt; echo 'x = 1' > main.py;; esac"#,
        );
        let opts = RunOptions {
            parallelism: 2,
            score: false,
            ..Default::default()
        };

        let outcome = pipeline.run(&spec, temp.path(), &opts).await.unwrap();
        assert_eq!(outcome.sessions.len(), 2);
        assert!(outcome.run_dir.join(REPORT_JSON).exists());
        assert!(outcome.run_dir.join(REPORT_MD).exists());
        assert!(outcome.run_dir.join("run-metadata.json").exists());

        let eager = outcome.report.variant("eager").unwrap();
        assert_eq!(eager.checks["has-output"].passed, 1);
        let base = outcome.report.variant("base").unwrap();
        assert_eq!(base.checks["has-output"].passed, 0);
        assert_eq!(base.overall.mean, None);

        for s in &outcome.sessions {
            assert!(!s.workspace_dir().exists());
            assert!(s.session_dir.join(collector::SUMMARY_FILE).exists());
        }
        let summaries = collected_summaries(&outcome.run_dir);
        assert_eq!(summaries.len(), 2);

        let rebuilt = report_from_dir(&outcome.run_dir, None).unwrap();
        assert_eq!(rebuilt.variants.len(), 2);
        assert_eq!(rebuilt.baseline.as_deref(), Some("base"));
    }
}
