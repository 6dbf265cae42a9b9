//! CLI command definitions for variant-forge.
//!
//! `run` drives a whole evaluation; `validate`, `collect`, `score` and
//! `report` expose the individual stages for re-running them on existing
//! output.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::collector::{self, CollectOptions};
use crate::config::{HarnessConfig, JudgeBackend};
use crate::pipeline::{self, EvalPipeline, RunOptions};
use crate::runner::{AgentAdapter, CommandAgent, SessionMetadata, SessionResult, SessionRunner};
use crate::scorer::{build_judge, Scorer};
use crate::spec::{self, EvalSpec};

/// Default output directory for run results.
const DEFAULT_OUTPUT_DIR: &str = "./results";

/// Run a coding agent under prompt variants and compare the results.
#[derive(Parser)]
#[command(name = "variant-forge")]
#[command(about = "Evaluate coding-agent prompt variants against a baseline")]
#[command(version)]
#[command(
    long_about = "variant-forge runs a coding-agent CLI once per variant and run, runs binary checks in each workspace, collects the produced code, scores it with an LLM judge against rubrics and reports per-variant statistics.\n\nExample usage:\n  variant-forge run evals/wordle.yaml --parallel 4 --output ./results"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Only log warnings and skip progress output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Harness configuration file (YAML).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// API key for an LLM judge backend.
    #[arg(long, env = "JUDGE_API_KEY", global = true, hide_env_values = true)]
    pub judge_api_key: Option<String>,
}

impl Cli {
    /// Effective default log filter.
    pub fn log_filter(&self) -> String {
        if self.quiet {
            "warn".to_string()
        } else {
            self.log_level.clone()
        }
    }
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run every variant of a spec, then check, collect, score and report.
    Run(RunArgs),

    /// Load and validate a spec without running anything.
    Validate(ValidateArgs),

    /// Collect code and test files of one session.
    Collect(CollectArgs),

    /// Score a collected session against rubrics.
    Score(ScoreArgs),

    /// Rebuild the report of an existing run directory.
    Report(ReportArgs),
}

/// Arguments for `variant-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the evaluation spec (YAML or JSON).
    pub spec: PathBuf,

    /// Number of sessions to run concurrently.
    #[arg(short, long, default_value = "1", conflicts_with = "sequential")]
    pub parallel: usize,

    /// Run sessions one at a time (same as --parallel 1).
    #[arg(long)]
    pub sequential: bool,

    /// Session timeout in seconds, overriding the spec and variants.
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Runs per variant, overriding the spec.
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub runs: Option<u32>,

    /// Output directory; each run gets its own subdirectory.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: PathBuf,

    /// Validate and print the execution plan without launching anything.
    /// The agent program is only looked up on PATH.
    #[arg(long)]
    pub dry_run: bool,

    /// Variant to compare the others against, overriding the spec.
    #[arg(long)]
    pub baseline: Option<String>,

    /// Keep session workspaces after collection.
    #[arg(long)]
    pub keep_workspaces: bool,

    /// Skip LLM judging; record checks, usage and timing only.
    #[arg(long)]
    pub no_score: bool,

    /// Print the report as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `variant-forge validate`.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to the evaluation spec.
    pub spec: PathBuf,
}

/// Arguments for `variant-forge collect`.
#[derive(Parser, Debug)]
pub struct CollectArgs {
    /// Session id to collect.
    pub session_id: String,

    /// Directory the agent worked in.
    #[arg(short, long)]
    pub source: PathBuf,

    /// Directory receiving `<session-id>/`.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Seconds to wait for the session to complete.
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Milliseconds between completion polls.
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Glob pattern of files to collect (repeatable).
    #[arg(long = "pattern")]
    pub patterns: Vec<String>,

    /// Collect without waiting for completion and overwrite earlier results.
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for `variant-forge score`.
#[derive(Parser, Debug)]
pub struct ScoreArgs {
    /// Session directory holding collected `code/` and `tests/`.
    pub session_dir: PathBuf,

    /// Rubric to score against (repeatable).
    #[arg(short, long = "rubric", required = true)]
    pub rubrics: Vec<String>,

    /// Directory holding rubric documents.
    #[arg(long)]
    pub rubrics_dir: Option<PathBuf>,
}

/// Arguments for `variant-forge report`.
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Run directory containing `run-metadata.json`.
    pub run_dir: PathBuf,

    /// Variant to compare the others against.
    #[arg(long)]
    pub baseline: Option<String>,

    /// Print the report as JSON instead of Markdown.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref(), cli.judge_api_key.as_deref())?;
    match cli.command {
        Commands::Run(args) => run_eval_command(args, config, cli.quiet).await,
        Commands::Validate(args) => run_validate_command(args),
        Commands::Collect(args) => run_collect_command(args, config).await,
        Commands::Score(args) => run_score_command(args, config).await,
        Commands::Report(args) => run_report_command(args),
    }
}

/// Builds the harness configuration: file (or defaults), then CLI overrides.
fn load_config(path: Option<&Path>, judge_api_key: Option<&str>) -> anyhow::Result<HarnessConfig> {
    let mut config = match path {
        Some(path) => HarnessConfig::from_file(path)?,
        None => HarnessConfig::default(),
    };
    if let (JudgeBackend::Llm { api_key, .. }, Some(key)) = (&mut config.judge.backend, judge_api_key)
    {
        if api_key.is_none() {
            *api_key = Some(key.to_string());
        }
    }
    Ok(config)
}

// ============================================================================
// run
// ============================================================================

async fn run_eval_command(args: RunArgs, config: HarnessConfig, quiet: bool) -> anyhow::Result<()> {
    let spec = spec::load(&args.spec)?;
    let parallelism = if args.sequential { 1 } else { args.parallel.max(1) };

    if args.dry_run {
        print_plan(&spec, &args, parallelism);
        let agent = CommandAgent::new(config.agent.clone());
        if !agent.is_available().await {
            warn!(
                "Agent '{}' is not available on this system; a real run would fail to spawn",
                config.agent.program
            );
        }
        return Ok(());
    }

    let keep_workspaces = config.keep_workspaces || args.keep_workspaces;
    let config = Arc::new(config.with_keep_workspaces(keep_workspaces));
    let pipeline = if args.no_score {
        EvalPipeline::new(
            Arc::clone(&config),
            Arc::new(SessionRunner::from_config(Arc::clone(&config))),
            None,
        )
    } else {
        EvalPipeline::from_config(Arc::clone(&config))?
    };

    let opts = RunOptions {
        parallelism,
        timeout_override: args.timeout,
        runs_override: args.runs,
        keep_workspaces,
        score: !args.no_score,
        baseline: args.baseline.clone(),
    };

    info!(spec = %spec.name, parallelism, "Running evaluation");
    let outcome = pipeline.run(&spec, &args.output, &opts).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    } else if !quiet {
        print_sessions(&outcome.sessions);
        println!();
        print!("{}", crate::aggregate::render_markdown(&outcome.report));
        println!("\nResults saved to: {}", outcome.run_dir.display());
    }
    Ok(())
}

fn print_plan(spec: &EvalSpec, args: &RunArgs, parallelism: usize) {
    let units = spec.expand_units(args.runs);
    println!("\n=== Execution plan: {} ===", spec.name);
    println!("Variants:     {}", spec.variants.len());
    println!("Sessions:     {}", units.len());
    println!("Parallelism:  {}", parallelism);
    println!("Batches:      {}", units.len().div_ceil(parallelism));
    println!("Checks:       {}", spec.binary_checks.len());
    println!("Rubrics:      {}", spec.rubric_names().join(", "));
    if let Some(baseline) = args.baseline.as_ref().or(spec.baseline.as_ref()) {
        println!("Baseline:     {}", baseline);
    }
    println!();
    for variant in &spec.variants {
        let timeout = spec.timeout_for(variant, args.timeout);
        println!(
            "  {} x{} timeout={}s fixture={}",
            variant.id,
            args.runs.unwrap_or(spec.runs_per_variant),
            timeout.as_secs(),
            spec.fixture_for(variant).unwrap_or("-"),
        );
        println!(
            "    prompt: {}",
            SessionMetadata::preview(&spec.prompt_for(variant))
        );
    }
}

fn print_sessions(sessions: &[SessionResult]) {
    println!("\n=== Sessions ===");
    println!(
        "{:<20} {:>4} {:<38} {:<12} {:>5}",
        "VARIANT", "RUN", "SESSION", "STATUS", "EXIT"
    );
    for s in sessions {
        println!(
            "{:<20} {:>4} {:<38} {:<12} {:>5}",
            s.variant_id,
            s.run_index,
            s.session_id,
            s.status.to_string(),
            s.exit_code
        );
        if let Some(err) = &s.error {
            println!("    error: {err}");
        }
    }
}

// ============================================================================
// validate
// ============================================================================

#[derive(Debug, Serialize)]
struct ValidateOutput<'a> {
    status: &'static str,
    name: &'a str,
    variants: Vec<&'a str>,
    sessions: usize,
    checks: usize,
    rubrics: Vec<String>,
}

fn run_validate_command(args: ValidateArgs) -> anyhow::Result<()> {
    let spec = spec::load(&args.spec)?;
    let output = ValidateOutput {
        status: "valid",
        name: &spec.name,
        variants: spec.variants.iter().map(|v| v.id.as_str()).collect(),
        sessions: spec.expand_units(None).len(),
        checks: spec.binary_checks.len(),
        rubrics: spec.rubric_names(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

// ============================================================================
// collect / score / report
// ============================================================================

async fn run_collect_command(args: CollectArgs, config: HarnessConfig) -> anyhow::Result<()> {
    let mut opts = CollectOptions::from_settings(&config.collector).with_force(args.force);
    if let Some(secs) = args.timeout {
        opts.timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = args.poll_interval {
        opts.poll_interval = Duration::from_millis(ms);
    }
    if !args.patterns.is_empty() {
        opts.patterns = args.patterns;
    }

    let summary = collector::collect(&args.session_id, &args.source, &args.output, &opts).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_score_command(args: ScoreArgs, mut config: HarnessConfig) -> anyhow::Result<()> {
    if !args.session_dir.is_dir() {
        anyhow::bail!(
            "Session directory does not exist: {}",
            args.session_dir.display()
        );
    }
    if let Some(dir) = args.rubrics_dir {
        config.judge.rubrics_dir = dir;
    }
    let judge = build_judge(&config.judge)?;
    let scorer = Scorer::new(judge, config.judge.clone());
    let detailed = scorer.score(&args.session_dir, &args.rubrics).await?;
    println!("{}", serde_json::to_string_pretty(&detailed)?);
    Ok(())
}

fn run_report_command(args: ReportArgs) -> anyhow::Result<()> {
    if !args.run_dir.is_dir() {
        anyhow::bail!("Run directory does not exist: {}", args.run_dir.display());
    }
    let report = pipeline::report_from_dir(&args.run_dir, args.baseline.as_deref())?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", crate::aggregate::render_markdown(&report));
    }
    Ok(())
}
