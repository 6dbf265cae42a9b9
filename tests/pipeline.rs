//! End-to-end pipeline tests with `/bin/sh` fake agents and judges.
//!
//! No network access; every external process is a short shell script.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use variant_forge::collector::{CollectionStatus, CollectionSummary};
use variant_forge::config::{AgentCommand, HarnessConfig, JudgeBackend};
use variant_forge::orchestrator::RunMetadata;
use variant_forge::pipeline::{report_from_dir, EvalPipeline, RunOptions, REPORT_JSON, REPORT_MD};
use variant_forge::runner::{SessionStatus, EXIT_SPAWN_ERROR, EXIT_TIMEOUT};
use variant_forge::scorer::DetailedScore;
use variant_forge::spec::{load_str, SpecFormat};

const SPEC: &str = r#"
name: adder
prompt: "Write an add function."
runs_per_variant: 2
variants:
  - id: base
  - id: tdd
    prompt_suffix: " Use TDD."
binary_checks:
  - name: has-main
    command: "test -f main.py"
metrics:
  - name: quality
    rubric: code-quality
  - name: tests
    rubric: test-coverage
baseline: base
"#;

/// The tdd variant writes a marked implementation plus a test file.
const AGENT: &str = r#"p=$(cat)
case "$p" in
  *TDD*) echo 'VERSION_B = 1' > main.py; echo 'assert VERSION_B' > test_main.py ;;
  *) echo 'x = 1' > main.py ;;
esac
echo '{"type":"result","usage":{"input_tokens":120,"output_tokens":40}}'"#;

/// Scores 9 when it sees the tdd marker, 6 otherwise.
const JUDGE: &str = r#"p=$(cat)
case "$p" in
  *VERSION_B*) echo 'Here you go: {"score": 9, "dimensions": {"naming": 8}}' ;;
  *) echo '{"score": 6, "dimensions": {"naming": 5}}' ;;
esac"#;

fn sh(script: &str) -> AgentCommand {
    AgentCommand {
        program: "sh".into(),
        args: vec!["-c".into(), script.into()],
        stdin_prompt: true,
    }
}

fn write_rubrics(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("code-quality.md"), "Rate readability from 0 to 10.").unwrap();
    fs::write(dir.join("test-coverage.md"), "Rate test coverage from 0 to 10.").unwrap();
}

fn config(temp: &TempDir, agent: AgentCommand, judge: &str) -> Arc<HarnessConfig> {
    let rubrics = temp.path().join("rubrics");
    write_rubrics(&rubrics);
    let mut config = HarnessConfig::default()
        .with_agent(agent)
        .with_rubrics_dir(rubrics)
        .with_judge_backend(JudgeBackend::Command {
            program: "sh".into(),
            args: vec!["-c".into(), judge.into()],
        });
    config.judge.base_delay_ms = 1;
    config.judge.max_attempts = 2;
    Arc::new(config)
}

#[tokio::test]
async fn test_full_run_scores_and_compares_variants() {
    let temp = TempDir::new().unwrap();
    let spec = load_str(SPEC, SpecFormat::Yaml).unwrap();
    let pipeline = EvalPipeline::from_config(config(&temp, sh(AGENT), JUDGE)).unwrap();
    let opts = RunOptions {
        parallelism: 2,
        ..Default::default()
    };

    let outcome = pipeline
        .run(&spec, &temp.path().join("results"), &opts)
        .await
        .unwrap();

    assert_eq!(outcome.sessions.len(), 4);
    assert!(outcome
        .sessions
        .iter()
        .all(|s| s.status == SessionStatus::Completed));
    assert!(outcome.run_dir.join(REPORT_JSON).exists());
    assert!(outcome.run_dir.join(REPORT_MD).exists());

    let metadata = RunMetadata::read(&outcome.run_dir).unwrap();
    assert_eq!(metadata.total_units, 4);
    assert_eq!(metadata.batches, 2);
    assert_eq!(metadata.succeeded, 4);

    let base_session = outcome
        .sessions
        .iter()
        .find(|s| s.variant_id == "base")
        .unwrap();
    let detailed = DetailedScore::read(&base_session.session_dir).unwrap();
    assert_eq!(detailed.by_rubric["code-quality"].score, Some(6.0));
    assert_eq!(detailed.by_rubric["test-coverage"].score, None);
    assert_eq!(
        detailed.by_rubric["test-coverage"].error.as_deref(),
        Some("no files to judge")
    );
    assert_eq!(detailed.overall_score, Some(6.0));
    assert_eq!(detailed.token_usage.unwrap().input_tokens, 120);
    assert!(detailed.checks.iter().all(|c| c.passed));
    assert!(base_session.session_dir.join("code/main.py").exists());

    let report = &outcome.report;
    let base = report.variant("base").unwrap();
    let tdd = report.variant("tdd").unwrap();
    assert_eq!(base.overall.mean, Some(6.0));
    assert_eq!(tdd.overall.mean, Some(9.0));
    assert_eq!(tdd.by_rubric["test-coverage"].n, 2);
    assert_eq!(tdd.by_dimension["code-quality.naming"].mean, Some(8.0));
    assert_eq!(tdd.checks["has-main"].passed, 2);
    assert_eq!(tdd.check_score.mean, Some(1.0));

    let delta = tdd.delta.unwrap();
    assert_eq!(delta.absolute, 3.0);
    assert_eq!(delta.percent, Some(50.0));
    assert_eq!(report.ranking[0].variant_id, "tdd");

    let markdown = fs::read_to_string(outcome.run_dir.join(REPORT_MD)).unwrap();
    assert!(markdown.contains("# adder report"));
    assert!(markdown.contains("1. `tdd` +3.00 (+50.0%)"));
}

#[tokio::test]
async fn test_timeouts_are_recorded_not_fatal() {
    let temp = TempDir::new().unwrap();
    let spec = load_str(
        r#"
name: slow
prompt: "p"
variants:
  - id: quick
  - id: stuck
    timeout_seconds: 1
binary_checks: []
metrics: []
"#,
        SpecFormat::Yaml,
    )
    .unwrap();
    // The agent runs inside `<session>/workspace`; metadata.json names the variant.
    let agent = sh(r#"cat >/dev/null; if grep -q stuck ../metadata.json; then sleep 10; fi"#);
    let pipeline = EvalPipeline::from_config(config(&temp, agent, JUDGE)).unwrap();
    let opts = RunOptions {
        parallelism: 2,
        score: false,
        ..Default::default()
    };

    let outcome = pipeline.run(&spec, temp.path(), &opts).await.unwrap();
    let stuck = outcome
        .sessions
        .iter()
        .find(|s| s.variant_id == "stuck")
        .unwrap();
    assert_eq!(stuck.status, SessionStatus::Timeout);
    assert_eq!(stuck.exit_code, EXIT_TIMEOUT);
    let summary = CollectionSummary::read(&stuck.session_dir).unwrap();
    assert_eq!(summary.status, CollectionStatus::Timeout);

    let quick = outcome.report.variant("quick").unwrap();
    assert_eq!(quick.sessions, 1);
    assert_eq!(quick.overall.mean, None);
    let quick_session = outcome
        .sessions
        .iter()
        .find(|s| s.variant_id == "quick")
        .unwrap();
    assert_eq!(
        CollectionSummary::read(&quick_session.session_dir).unwrap().status,
        CollectionStatus::Complete
    );
    assert_eq!(RunMetadata::read(&outcome.run_dir).unwrap().timed_out, 1);
}

#[tokio::test]
async fn test_missing_agent_still_produces_report() {
    let temp = TempDir::new().unwrap();
    let spec = load_str(SPEC, SpecFormat::Yaml).unwrap();
    let agent = AgentCommand {
        program: "/nonexistent/agent-binary".into(),
        args: Vec::new(),
        stdin_prompt: false,
    };
    let pipeline = EvalPipeline::from_config(config(&temp, agent, JUDGE)).unwrap();

    let outcome = pipeline
        .run(&spec, temp.path(), &RunOptions::default())
        .await
        .unwrap();

    assert!(outcome
        .sessions
        .iter()
        .all(|s| s.status == SessionStatus::SpawnError && s.exit_code == EXIT_SPAWN_ERROR));
    for s in &outcome.sessions {
        assert_eq!(
            CollectionSummary::read(&s.session_dir).unwrap().status,
            CollectionStatus::Incomplete
        );
    }
    for variant in &outcome.report.variants {
        assert_eq!(variant.overall.mean, None);
        assert_eq!(variant.overall.n, 0);
    }
    assert!(outcome.report.ranking.is_empty());
}

#[tokio::test]
async fn test_failing_judge_yields_null_scores_after_retries() {
    let temp = TempDir::new().unwrap();
    let spec = load_str(SPEC, SpecFormat::Yaml).unwrap();
    let pipeline =
        EvalPipeline::from_config(config(&temp, sh(AGENT), "cat >/dev/null; exit 3")).unwrap();

    let outcome = pipeline
        .run(&spec, temp.path(), &RunOptions {
            runs_override: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();

    let tdd = outcome
        .sessions
        .iter()
        .find(|s| s.variant_id == "tdd")
        .unwrap();
    let detailed = DetailedScore::read(&tdd.session_dir).unwrap();
    let quality = &detailed.by_rubric["code-quality"];
    assert_eq!(quality.score, None);
    assert_eq!(quality.attempts, 2);
    assert!(quality.error.as_deref().unwrap().contains("2 attempt"));
    assert_eq!(detailed.overall_score, None);
}

#[tokio::test]
async fn test_report_rebuilds_from_run_dir() {
    let temp = TempDir::new().unwrap();
    let spec = load_str(SPEC, SpecFormat::Yaml).unwrap();
    let pipeline = EvalPipeline::from_config(config(&temp, sh(AGENT), JUDGE)).unwrap();
    let outcome = pipeline
        .run(&spec, temp.path(), &RunOptions::default())
        .await
        .unwrap();

    fs::remove_file(outcome.run_dir.join(REPORT_JSON)).unwrap();
    let rebuilt = report_from_dir(&outcome.run_dir, Some("tdd")).unwrap();
    assert!(outcome.run_dir.join(REPORT_JSON).exists());
    assert_eq!(rebuilt.baseline.as_deref(), Some("tdd"));
    assert_eq!(rebuilt.ranking[0].variant_id, "base");
    assert_eq!(rebuilt.ranking[0].delta.absolute, -3.0);
    assert_eq!(rebuilt.variant("tdd").unwrap().overall.mean, Some(9.0));
}
