//! Agent CLI adapter.
//!
//! Launches the external agent with a composed prompt inside a workspace
//! directory and captures its output. The adapter knows nothing about
//! variants or scoring; it only substitutes placeholders and runs the
//! configured command under a timeout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::AgentCommand;
use crate::error::SessionError;
use crate::process::{run_with_timeout, ProcessOutput};

/// One invocation of the agent.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    /// Composed prompt.
    pub prompt: String,
    /// Caller-selected session id (local mode only).
    pub session_id: Option<String>,
    /// Working directory for the agent.
    pub workspace: PathBuf,
    /// Maximum execution time.
    pub timeout: Duration,
    /// Extra environment variables.
    pub env_vars: Vec<(String, String)>,
}

/// Anything that can run an agent session.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Human-readable name of the agent program.
    fn name(&self) -> &str;

    /// Runs the agent. `Err` only if the process could not be spawned.
    async fn run(&self, invocation: &AgentInvocation) -> Result<ProcessOutput, SessionError>;

    /// Checks if the agent program is available on this system without
    /// launching it.
    async fn is_available(&self) -> bool;
}

/// Adapter for a command-line agent described by an [`AgentCommand`] template.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: AgentCommand,
}

impl CommandAgent {
    pub fn new(command: AgentCommand) -> Self {
        Self { command }
    }

    /// Resolves the argument templates for one invocation.
    ///
    /// Arguments that reference `{session_id}` are dropped along with the
    /// flag before them when no session id is available, so remote-mode
    /// agents are never handed an empty id.
    pub fn render_args(&self, invocation: &AgentInvocation) -> Vec<String> {
        let workspace = invocation.workspace.display().to_string();
        let mut rendered: Vec<String> = Vec::with_capacity(self.command.args.len());

        for arg in &self.command.args {
            if arg.contains("{session_id}") && invocation.session_id.is_none() {
                if rendered.last().map(|prev| prev.starts_with('-')).unwrap_or(false) {
                    rendered.pop();
                }
                continue;
            }
            let value = arg
                .replace("{prompt}", &invocation.prompt)
                .replace("{workspace}", &workspace)
                .replace(
                    "{session_id}",
                    invocation.session_id.as_deref().unwrap_or_default(),
                );
            rendered.push(value);
        }
        rendered
    }
}

#[async_trait]
impl AgentAdapter for CommandAgent {
    fn name(&self) -> &str {
        &self.command.program
    }

    async fn run(&self, invocation: &AgentInvocation) -> Result<ProcessOutput, SessionError> {
        let args = self.render_args(invocation);

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&args).current_dir(&invocation.workspace);
        for (key, value) in &invocation.env_vars {
            cmd.env(key, value);
        }

        info!(
            "Starting agent {} in {}",
            self.command.program,
            invocation.workspace.display()
        );

        let stdin = self
            .command
            .stdin_prompt
            .then(|| invocation.prompt.as_bytes());

        let output = run_with_timeout(cmd, stdin, invocation.timeout)
            .await
            .map_err(|e| SessionError::Spawn {
                program: self.command.program.clone(),
                reason: e.to_string(),
            })?;

        debug!(
            exit_code = ?output.exit_code,
            timed_out = output.timed_out,
            "Agent finished in {:?}",
            output.duration
        );
        Ok(output)
    }

    async fn is_available(&self) -> bool {
        find_program(&self.command.program).is_some()
    }
}

/// Resolves `program` the way a spawn would: paths are checked as given,
/// bare names are looked up in `PATH`.
fn find_program(program: &str) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
