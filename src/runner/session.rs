//! Session runner: one agent invocation from workspace setup to cleanup.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::agent::{AgentAdapter, AgentInvocation, CommandAgent};
use super::metadata::SessionMetadata;
use super::result::{
    SessionResult, SessionStatus, EXIT_SETUP_ERROR, EXIT_SPAWN_ERROR, EXIT_TIMEOUT,
};
use super::workspace::{remove_workspace, FixtureResolver, FixtureSource};
use crate::collector::extract::extract_session_id;
use crate::config::{ExecutionMode, HarnessConfig};
use crate::error::SessionError;
use crate::process::ProcessOutput;
use crate::spec::Variant;

pub const PROMPT_FILE: &str = "prompt.txt";
pub const SESSION_LOG: &str = "session.log";
pub const WORKSPACE_DIR: &str = "workspace";

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub run_index: u32,
    /// Keep the workspace after the agent exits.
    pub keep_workspace: bool,
    /// Session id to use in local mode; generated when absent.
    pub session_id: Option<String>,
    /// Fixture to copy into the workspace.
    pub fixture: Option<String>,
}

/// Runs single agent sessions.
pub struct SessionRunner {
    config: Arc<HarnessConfig>,
    agent: Arc<dyn AgentAdapter>,
    fixtures: FixtureResolver,
}

impl SessionRunner {
    pub fn new(config: Arc<HarnessConfig>, agent: Arc<dyn AgentAdapter>) -> Self {
        let fixtures = FixtureResolver::new(config.fixtures.clone());
        Self {
            config,
            agent,
            fixtures,
        }
    }

    /// Runner using the configured agent command template.
    pub fn from_config(config: Arc<HarnessConfig>) -> Self {
        let agent = Arc::new(CommandAgent::new(config.agent.clone()));
        Self::new(config, agent)
    }

    pub fn agent(&self) -> &Arc<dyn AgentAdapter> {
        &self.agent
    }

    /// Runs one session and always returns its result.
    ///
    /// Exactly one directory is created under `output_dir`, named by the
    /// session id. In remote mode the directory starts as `pending-<uuid>`
    /// and is renamed once the agent reports its id.
    pub async fn run(
        &self,
        variant: &Variant,
        prompt: &str,
        output_dir: &Path,
        timeout: Duration,
        opts: SessionOptions,
    ) -> SessionResult {
        let provisional_id = match self.config.mode {
            ExecutionMode::Local => opts
                .session_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            ExecutionMode::Remote => format!("pending-{}", Uuid::new_v4()),
        };
        let mut session_dir = output_dir.join(&provisional_id);
        let mut result = SessionResult {
            variant_id: variant.id.clone(),
            run_index: opts.run_index,
            session_id: provisional_id.clone(),
            session_dir: session_dir.clone(),
            exit_code: EXIT_SETUP_ERROR,
            status: SessionStatus::SetupError,
            duration_secs: 0.0,
            error: None,
        };

        let workspace = session_dir.join(WORKSPACE_DIR);
        if let Err(e) = fs::create_dir_all(&workspace) {
            error!(session_id = %provisional_id, "Cannot create session directory: {}", e);
            result.error = Some(SessionError::Setup(e.to_string()).to_string());
            return result;
        }

        let mut metadata = SessionMetadata {
            session_id: provisional_id.clone(),
            variant_id: variant.id.clone(),
            run_index: opts.run_index,
            fixture: opts.fixture.clone(),
            fixture_source: None,
            start_time: Utc::now(),
            prompt_preview: SessionMetadata::preview(prompt),
            timeout_secs: timeout.as_secs(),
            execution_mode: self.config.mode,
            agent: self.agent.name().to_string(),
            end_time: None,
            exit_code: None,
            status: None,
            duration_secs: None,
            error: None,
        };

        if let Err(e) = self.prepare(&session_dir, &workspace, prompt, &mut metadata).await {
            warn!(session_id = %provisional_id, variant = %variant.id, "Session setup failed: {}", e);
            result.error = Some(e.to_string());
            metadata.finish(EXIT_SETUP_ERROR, SessionStatus::SetupError, result.error.clone());
            self.settle(&session_dir, &metadata);
            if !opts.keep_workspace {
                remove_workspace(&workspace);
            }
            return result;
        }

        let invocation = AgentInvocation {
            prompt: prompt.to_string(),
            session_id: match self.config.mode {
                ExecutionMode::Local => Some(provisional_id.clone()),
                ExecutionMode::Remote => None,
            },
            workspace: workspace.clone(),
            timeout,
            env_vars: self.config.agent_env.clone(),
        };

        info!(session_id = %provisional_id, variant = %variant.id, run = opts.run_index, "Launching agent");
        let outcome = self.agent.run(&invocation).await;
        let (exit_code, status, error) = classify(&outcome, timeout);
        result.exit_code = exit_code;
        result.status = status;
        result.error = error;

        if let Ok(output) = &outcome {
            result.duration_secs = output.duration.as_secs_f64();
            if let Err(e) = write_log(&session_dir, output) {
                warn!(session_id = %provisional_id, "Failed to write session log: {}", e);
            }
        }

        if self.config.mode == ExecutionMode::Remote {
            let reported = outcome.as_ref().ok().and_then(|o| extract_session_id(&o.stdout));
            match reported {
                Some(id) => match rename_session(&session_dir, output_dir, &id) {
                    Ok(dir) => {
                        debug!(session_id = %id, "Captured remote session id");
                        session_dir = dir;
                        result.session_id = id.clone();
                        result.session_dir = session_dir.clone();
                        metadata.session_id = id;
                    }
                    Err(e) => warn!("Could not rename session directory: {}", e),
                },
                None => {
                    let missing = SessionError::MissingSessionId.to_string();
                    warn!(session_id = %provisional_id, "{}", missing);
                    result.error.get_or_insert(missing);
                }
            }
        }

        metadata.finish(exit_code, status, result.error.clone());
        self.settle(&session_dir, &metadata);

        if !opts.keep_workspace {
            remove_workspace(&session_dir.join(WORKSPACE_DIR));
        }

        info!(
            session_id = %result.session_id,
            variant = %variant.id,
            exit_code = result.exit_code,
            "Session {}",
            result.status
        );
        result
    }

    async fn prepare(
        &self,
        session_dir: &Path,
        workspace: &Path,
        prompt: &str,
        metadata: &mut SessionMetadata,
    ) -> Result<(), SessionError> {
        if let Some(fixture) = metadata.fixture.clone() {
            let source: FixtureSource = self.fixtures.materialize(&fixture, workspace).await?;
            metadata.fixture_source = Some(source);
        }
        fs::write(session_dir.join(PROMPT_FILE), prompt)?;
        metadata.write(session_dir)?;
        Ok(())
    }

    /// Final metadata plus the completion marker the collector waits for.
    fn settle(&self, session_dir: &Path, metadata: &SessionMetadata) {
        if let Err(e) = metadata.write(session_dir) {
            error!(session_id = %metadata.session_id, "Failed to write metadata: {}", e);
        }
        let marker = session_dir.join(&self.config.collector.complete_marker);
        if let Err(e) = fs::write(&marker, metadata.end_time.map(|t| t.to_rfc3339()).unwrap_or_default()) {
            warn!("Failed to write completion marker {}: {}", marker.display(), e);
        }
    }
}

fn classify(
    outcome: &Result<ProcessOutput, SessionError>,
    timeout: Duration,
) -> (i32, SessionStatus, Option<String>) {
    match outcome {
        Err(e) => (EXIT_SPAWN_ERROR, SessionStatus::SpawnError, Some(e.to_string())),
        Ok(out) if out.timed_out => (
            EXIT_TIMEOUT,
            SessionStatus::Timeout,
            Some(SessionError::Timeout(timeout).to_string()),
        ),
        Ok(out) => match out.exit_code {
            Some(0) => (0, SessionStatus::Completed, None),
            Some(code) => (
                code,
                SessionStatus::Failed,
                Some(format!("agent exited with code {}", code)),
            ),
            None => (
                -1,
                SessionStatus::Failed,
                Some("agent terminated by signal".to_string()),
            ),
        },
    }
}

fn write_log(session_dir: &Path, output: &ProcessOutput) -> std::io::Result<()> {
    let mut log = output.stdout.clone();
    if !output.stderr.is_empty() {
        if !log.is_empty() && !log.ends_with('\n') {
            log.push('\n');
        }
        log.push_str("--- stderr ---\n");
        log.push_str(&output.stderr);
    }
    fs::write(session_dir.join(SESSION_LOG), log)
}

fn rename_session(current: &Path, output_dir: &Path, id: &str) -> std::io::Result<PathBuf> {
    if id.contains(['/', '\\']) || id == "." || id == ".." {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unsafe session id '{}'", id),
        ));
    }
    let target = output_dir.join(id);
    if target.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists", target.display()),
        ));
    }
    fs::rename(current, &target)?;
    Ok(target)
}
