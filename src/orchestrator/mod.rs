//! Orchestrator: expands a spec into session units and runs them in batches.
//!
//! Units are drained in chunks of `parallelism`. Every unit of a batch is
//! spawned at once and the whole batch settles before the next starts, so no
//! more than `parallelism` agent processes are ever alive together. A failed
//! unit is recorded, never propagated.

pub mod progress;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::HarnessError;
use crate::runner::{SessionOptions, SessionResult, SessionRunner, SessionStatus, EXIT_SETUP_ERROR};
use crate::spec::{EvalSpec, SessionUnit};

pub use progress::{ProgressCounters, ProgressSnapshot};

pub const RUN_METADATA_FILE: &str = "run-metadata.json";

/// Executes a single session unit.
#[async_trait]
pub trait SessionExecutor: Send + Sync {
    async fn execute(&self, request: SessionRequest) -> SessionResult;
}

/// Everything needed to run one unit.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub unit: SessionUnit,
    pub prompt: String,
    pub output_dir: PathBuf,
    pub timeout: Duration,
    pub options: SessionOptions,
}

#[async_trait]
impl SessionExecutor for SessionRunner {
    async fn execute(&self, request: SessionRequest) -> SessionResult {
        self.run(
            &request.unit.variant,
            &request.prompt,
            &request.output_dir,
            request.timeout,
            request.options,
        )
        .await
    }
}

/// Options for [`Orchestrator::run_all`].
#[derive(Debug, Clone)]
pub struct RunAllOptions {
    /// Maximum sessions in flight; 1 means strictly sequential.
    pub parallelism: usize,
    /// CLI timeout, used when neither variant nor spec set one.
    pub timeout_override: Option<u64>,
    /// Overrides `runs_per_variant`.
    pub runs_override: Option<u32>,
    /// Keep workspaces after the agent exits.
    pub keep_workspaces: bool,
}

impl Default for RunAllOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            timeout_override: None,
            runs_override: None,
            keep_workspaces: false,
        }
    }
}

/// Aggregated metadata for one `run` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub spec_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub parallelism: usize,
    pub total_units: usize,
    pub batches: usize,
    pub peak_in_flight: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<String>,
    pub sessions: Vec<SessionResult>,
}

impl RunMetadata {
    pub fn read(run_dir: &Path) -> Result<Self, HarnessError> {
        let content = fs::read_to_string(run_dir.join(RUN_METADATA_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn write(&self, run_dir: &Path) -> Result<(), HarnessError> {
        let path = run_dir.join(RUN_METADATA_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|source| HarnessError::Write { path, source })
    }
}

/// Runs every unit of a spec through a [`SessionExecutor`].
pub struct Orchestrator {
    executor: Arc<dyn SessionExecutor>,
    progress: ProgressCounters,
}

impl Orchestrator {
    pub fn new(executor: Arc<dyn SessionExecutor>) -> Self {
        Self {
            executor,
            progress: ProgressCounters::new(),
        }
    }

    pub fn progress(&self) -> &ProgressCounters {
        &self.progress
    }

    /// Runs all `variants × runs` units and writes `run-metadata.json`.
    ///
    /// Only a failure to create or write into `output_dir` is an error.
    pub async fn run_all(
        &self,
        spec: &EvalSpec,
        output_dir: &Path,
        opts: &RunAllOptions,
    ) -> Result<Vec<SessionResult>, HarnessError> {
        fs::create_dir_all(output_dir).map_err(|source| HarnessError::OutputDir {
            path: output_dir.to_path_buf(),
            source,
        })?;

        let parallelism = opts.parallelism.max(1);
        let units = spec.expand_units(opts.runs_override);
        let total = units.len();
        let started_at = Utc::now();

        info!(
            spec = %spec.name,
            units = total,
            parallelism,
            "Starting evaluation"
        );

        let mut results = Vec::with_capacity(total);
        let mut batches = 0;

        for chunk in units.chunks(parallelism) {
            batches += 1;
            let mut handles = Vec::with_capacity(chunk.len());

            for unit in chunk {
                let request = self.request_for(spec, unit, output_dir, opts);
                let executor = Arc::clone(&self.executor);
                let progress = self.progress.clone();
                progress.launch();
                handles.push(tokio::spawn(async move {
                    let result = executor.execute(request).await;
                    let settled = progress.settle();
                    info!(
                        variant = %result.variant_id,
                        run = result.run_index,
                        session_id = %result.session_id,
                        "[{}/{}] session {}",
                        settled,
                        total,
                        result.status
                    );
                    result
                }));
            }

            let settled = futures::future::join_all(handles).await;
            for (unit, joined) in chunk.iter().zip(settled) {
                match joined {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        error!(variant = %unit.variant.id, "Session task panicked: {}", e);
                        results.push(panicked_result(unit, output_dir, e.to_string()));
                    }
                }
            }
        }

        let snapshot = self.progress.snapshot();
        let metadata = RunMetadata {
            spec_name: spec.name.clone(),
            started_at,
            finished_at: Utc::now(),
            parallelism,
            total_units: total,
            batches,
            peak_in_flight: snapshot.peak_in_flight,
            succeeded: results.iter().filter(|r| r.is_success()).count(),
            failed: results
                .iter()
                .filter(|r| !r.is_success() && r.status != SessionStatus::Timeout)
                .count(),
            timed_out: results
                .iter()
                .filter(|r| r.status == SessionStatus::Timeout)
                .count(),
            baseline: spec.baseline.clone(),
            sessions: results.clone(),
        };
        metadata.write(output_dir)?;

        if metadata.succeeded < total {
            warn!(
                succeeded = metadata.succeeded,
                total, "Some sessions did not complete successfully"
            );
        }
        info!(batches, peak_in_flight = snapshot.peak_in_flight, "All batches settled");
        Ok(results)
    }

    fn request_for(
        &self,
        spec: &EvalSpec,
        unit: &SessionUnit,
        output_dir: &Path,
        opts: &RunAllOptions,
    ) -> SessionRequest {
        SessionRequest {
            prompt: spec.prompt_for(&unit.variant),
            output_dir: output_dir.to_path_buf(),
            timeout: spec.timeout_for(&unit.variant, opts.timeout_override),
            options: SessionOptions {
                run_index: unit.run_index,
                keep_workspace: opts.keep_workspaces,
                session_id: None,
                fixture: spec.fixture_for(&unit.variant).map(String::from),
            },
            unit: unit.clone(),
        }
    }
}

fn panicked_result(unit: &SessionUnit, output_dir: &Path, error: String) -> SessionResult {
    let session_id = format!("panicked-{}-{}", unit.variant.id, unit.run_index);
    SessionResult {
        variant_id: unit.variant.id.clone(),
        run_index: unit.run_index,
        session_dir: output_dir.join(&session_id),
        session_id,
        exit_code: EXIT_SETUP_ERROR,
        status: SessionStatus::SetupError,
        duration_secs: 0.0,
        error: Some(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{CheckDef, ExecutionSettings, Variant};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Sleeps, tracks concurrency and fails one variant.
    #[derive(Default)]
    struct FakeExecutor {
        current: AtomicUsize,
        max_seen: AtomicUsize,
        timeouts: Mutex<Vec<(String, Duration)>>,
    }

    #[async_trait]
    impl SessionExecutor for FakeExecutor {
        async fn execute(&self, request: SessionRequest) -> SessionResult {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            self.timeouts
                .lock()
                .unwrap()
                .push((request.unit.variant.id.clone(), request.timeout));
            tokio::time::sleep(Duration::from_millis(40)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            let failing = request.unit.variant.id == "broken";
            SessionResult {
                variant_id: request.unit.variant.id.clone(),
                run_index: request.unit.run_index,
                session_id: format!("{}-{}", request.unit.variant.id, request.unit.run_index),
                session_dir: request.output_dir.clone(),
                exit_code: if failing { 1 } else { 0 },
                status: if failing {
                    SessionStatus::Failed
                } else {
                    SessionStatus::Completed
                },
                duration_secs: 0.04,
                error: None,
            }
        }
    }

    fn spec(variants: &[&str], runs: u32) -> EvalSpec {
        EvalSpec {
            name: "demo".into(),
            description: None,
            prompt: "Write a CLI".into(),
            variants: variants.iter().map(|v| Variant::new(*v)).collect(),
            runs_per_variant: runs,
            binary_checks: vec![CheckDef::new("exists", "true")],
            metrics: Vec::new(),
            execution: ExecutionSettings::default(),
            fixture: None,
            baseline: None,
        }
    }

    #[tokio::test]
    async fn test_two_variants_parallel_two_is_one_batch() {
        let temp = TempDir::new().unwrap();
        let executor = Arc::new(FakeExecutor::default());
        let orchestrator = Orchestrator::new(executor.clone());
        let opts = RunAllOptions {
            parallelism: 2,
            ..Default::default()
        };

        let results = orchestrator
            .run_all(&spec(&["a", "b"], 1), temp.path(), &opts)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        let meta = RunMetadata::read(temp.path()).unwrap();
        assert_eq!(meta.batches, 1);
        assert_eq!(meta.peak_in_flight, 2);
        assert_eq!(executor.max_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_parallelism() {
        let temp = TempDir::new().unwrap();
        let executor = Arc::new(FakeExecutor::default());
        let orchestrator = Orchestrator::new(executor.clone());
        let opts = RunAllOptions {
            parallelism: 3,
            ..Default::default()
        };

        let results = orchestrator
            .run_all(&spec(&["a", "b", "c", "d"], 2), temp.path(), &opts)
            .await
            .unwrap();

        assert_eq!(results.len(), 8);
        assert!(executor.max_seen.load(Ordering::SeqCst) <= 3);
        assert!(orchestrator.progress().snapshot().peak_in_flight <= 3);
        assert_eq!(RunMetadata::read(temp.path()).unwrap().batches, 3);
    }

    #[tokio::test]
    async fn test_sequential_and_failures_do_not_abort() {
        let temp = TempDir::new().unwrap();
        let executor = Arc::new(FakeExecutor::default());
        let orchestrator = Orchestrator::new(executor.clone());

        let results = orchestrator
            .run_all(&spec(&["broken", "ok"], 2), temp.path(), &RunAllOptions::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(executor.max_seen.load(Ordering::SeqCst), 1);
        let meta = RunMetadata::read(temp.path()).unwrap();
        assert_eq!(meta.succeeded, 2);
        assert_eq!(meta.failed, 2);
        let order: Vec<_> = results.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(order, vec!["broken-0", "broken-1", "ok-0", "ok-1"]);
    }

    #[tokio::test]
    async fn test_runs_override_and_timeout_precedence() {
        let temp = TempDir::new().unwrap();
        let executor = Arc::new(FakeExecutor::default());
        let orchestrator = Orchestrator::new(executor.clone());

        let mut spec = spec(&["fast", "plain"], 5);
        spec.variants[0].timeout_seconds = Some(30);
        let opts = RunAllOptions {
            parallelism: 4,
            timeout_override: Some(90),
            runs_override: Some(1),
            ..Default::default()
        };

        let results = orchestrator.run_all(&spec, temp.path(), &opts).await.unwrap();
        assert_eq!(results.len(), 2);

        let timeouts = executor.timeouts.lock().unwrap().clone();
        for (variant, timeout) in timeouts {
            match variant.as_str() {
                "fast" => assert_eq!(timeout, Duration::from_secs(30)),
                _ => assert_eq!(timeout, Duration::from_secs(90)),
            }
        }
    }
}
