//! Harness configuration.
//!
//! A single [`HarnessConfig`] is built at the CLI boundary (optional YAML
//! file, then flag overrides) and passed explicitly to every component.
//! Nothing below the CLI reads process environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// How the agent CLI is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Local/isolated run; the caller picks the session id.
    #[default]
    Local,
    /// Remote backend; the agent generates the session id.
    Remote,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Local => write!(f, "local"),
            ExecutionMode::Remote => write!(f, "remote"),
        }
    }
}

/// Command template for the agent CLI.
///
/// Arguments may contain `{prompt}`, `{session_id}` and `{workspace}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCommand {
    /// Executable to run.
    pub program: String,
    /// Argument templates.
    #[serde(default)]
    pub args: Vec<String>,
    /// Write the prompt to the agent's stdin instead of (or as well as) args.
    #[serde(default)]
    pub stdin_prompt: bool,
}

impl Default for AgentCommand {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec![
                "-p".to_string(),
                "{prompt}".to_string(),
                "--session-id".to_string(),
                "{session_id}".to_string(),
                "--output-format".to_string(),
                "stream-json".to_string(),
                "--verbose".to_string(),
            ],
            stdin_prompt: false,
        }
    }
}

/// Where fixtures are looked up, in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureSources {
    /// Prepared cache of fixtures, keyed by the fixture's final path component.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Root that relative fixture paths resolve against.
    #[serde(default)]
    pub local_root: Option<PathBuf>,
    /// Base URL for remote clones (`<remote_base>/<fixture_path>`).
    #[serde(default)]
    pub remote_base: Option<String>,
}

/// Limits and polling for the result collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    /// How long to wait for a session to complete.
    pub timeout_secs: u64,
    /// Delay between completion polls.
    pub poll_interval_ms: u64,
    /// Maximum number of files copied per session.
    pub max_files: usize,
    /// Files larger than this are skipped.
    pub max_file_bytes: u64,
    /// Glob patterns selecting the files to collect.
    pub patterns: Vec<String>,
    /// Name of the marker file signalling completion.
    pub complete_marker: String,
    /// Command that pulls remote artifacts; `{session_id}` and `{dest}` are substituted.
    pub fetch_command: Option<String>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            poll_interval_ms: 2_000,
            max_files: 200,
            max_file_bytes: 512 * 1024,
            patterns: default_patterns(),
            complete_marker: ".complete".to_string(),
            fetch_command: None,
        }
    }
}

impl CollectorSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_patterns() -> Vec<String> {
    [
        "py", "rs", "js", "jsx", "ts", "tsx", "go", "java", "kt", "rb", "php", "c", "h", "cpp",
        "hpp", "cs", "swift", "sh", "html", "css", "sql",
    ]
    .iter()
    .map(|ext| format!("**/*.{}", ext))
    .collect()
}

/// Which judge backend scores rubrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JudgeBackend {
    /// External executable: prompt on stdin, JSON on stdout.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// OpenAI-compatible chat completions endpoint.
    Llm {
        api_base: String,
        model: String,
        #[serde(default)]
        api_key: Option<String>,
    },
}

impl Default for JudgeBackend {
    fn default() -> Self {
        JudgeBackend::Command {
            program: "claude".to_string(),
            args: vec!["-p".to_string(), "--output-format".to_string(), "json".to_string()],
        }
    }
}

/// Judge and retry settings for the scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeSettings {
    pub backend: JudgeBackend,
    /// Directory holding `<rubric>.md` documents.
    pub rubrics_dir: PathBuf,
    /// Timeout for a single judge call.
    pub timeout_secs: u64,
    /// Total attempts per rubric, including the first.
    pub max_attempts: u32,
    /// Base delay of the exponential backoff.
    pub base_delay_ms: u64,
    /// Upper bound of the score scale.
    pub max_score: f64,
    /// Per-file content limit when building the judge prompt.
    pub max_chars_per_file: usize,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            backend: JudgeBackend::default(),
            rubrics_dir: PathBuf::from("./rubrics"),
            timeout_secs: 300,
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_score: 10.0,
            max_chars_per_file: 20_000,
        }
    }
}

/// Complete harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Agent command template.
    pub agent: AgentCommand,
    /// Local or remote execution.
    pub mode: ExecutionMode,
    /// Fixture lookup order.
    pub fixtures: FixtureSources,
    /// Keep session workspaces after the run.
    pub keep_workspaces: bool,
    /// Timeout for each binary check, independent of the session timeout.
    pub check_timeout_secs: u64,
    /// Collector settings.
    pub collector: CollectorSettings,
    /// Judge settings.
    pub judge: JudgeSettings,
    /// Extra environment passed to the agent process.
    pub agent_env: Vec<(String, String)>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            agent: AgentCommand::default(),
            mode: ExecutionMode::Local,
            fixtures: FixtureSources::default(),
            keep_workspaces: false,
            check_timeout_secs: 60,
            collector: CollectorSettings::default(),
            judge: JudgeSettings::default(),
            agent_env: Vec::new(),
        }
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file; missing keys take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: HarnessConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings no component can work with.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.agent.program.trim().is_empty() {
            return Err(HarnessError::Config("agent.program must not be empty".into()));
        }
        if self.check_timeout_secs == 0 {
            return Err(HarnessError::Config("check_timeout_secs must be > 0".into()));
        }
        if self.collector.max_files == 0 {
            return Err(HarnessError::Config("collector.max_files must be > 0".into()));
        }
        if self.judge.max_attempts == 0 {
            return Err(HarnessError::Config("judge.max_attempts must be > 0".into()));
        }
        if self.judge.max_score <= 0.0 {
            return Err(HarnessError::Config("judge.max_score must be > 0".into()));
        }
        Ok(())
    }

    /// Sets the agent command.
    pub fn with_agent(mut self, agent: AgentCommand) -> Self {
        self.agent = agent;
        self
    }

    /// Sets the execution mode.
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Keeps session workspaces after the run.
    pub fn with_keep_workspaces(mut self, keep: bool) -> Self {
        self.keep_workspaces = keep;
        self
    }

    /// Sets the binary check timeout.
    pub fn with_check_timeout(mut self, secs: u64) -> Self {
        self.check_timeout_secs = secs;
        self
    }

    /// Sets the judge backend.
    pub fn with_judge_backend(mut self, backend: JudgeBackend) -> Self {
        self.judge.backend = backend;
        self
    }

    /// Sets the rubric directory.
    pub fn with_rubrics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.judge.rubrics_dir = dir.into();
        self
    }

    /// Adds an environment variable for the agent process.
    pub fn with_agent_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.agent_env.push((key.into(), value.into()));
        self
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
}
