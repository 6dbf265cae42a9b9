//! Binary check runner.
//!
//! A check is an external shell predicate. Its content is never parsed; it
//! passes iff `sh -c <command>` exits 0 within the per-check timeout.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CheckError, HarnessError};
use crate::process::{run_with_timeout, shell};
use crate::runner::result::truncate;
use crate::spec::CheckDef;

pub const CHECKS_FILE: &str = "checks.json";

const MAX_ERROR_CHARS: usize = 2_000;

/// Result of one check against one workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub weight: f64,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    fn failed(def: &CheckDef, exit_code: Option<i32>, error: String) -> Self {
        Self {
            name: def.name.clone(),
            weight: def.weight,
            passed: false,
            exit_code,
            error: Some(error),
        }
    }
}

/// Substitutes `{workspace}` with the absolute workspace path.
pub fn render_command(command: &str, workspace: &Path) -> String {
    let absolute = workspace
        .canonicalize()
        .unwrap_or_else(|_| workspace.to_path_buf());
    command.replace("{workspace}", &absolute.display().to_string())
}

/// Runs every check against `workspace`, in order.
pub async fn check(workspace: &Path, checks: &[CheckDef], timeout: Duration) -> Vec<CheckResult> {
    let mut results = Vec::with_capacity(checks.len());
    for def in checks {
        results.push(run_check(workspace, def, timeout).await);
    }
    results
}

async fn run_check(workspace: &Path, def: &CheckDef, timeout: Duration) -> CheckResult {
    if !workspace.is_dir() {
        let err = CheckError::Execution {
            name: def.name.clone(),
            reason: format!("workspace {} does not exist", workspace.display()),
        };
        return CheckResult::failed(def, None, err.to_string());
    }

    let script = render_command(&def.command, workspace);
    let mut cmd = shell(&script);
    cmd.current_dir(workspace);

    let output = match run_with_timeout(cmd, None, timeout).await {
        Ok(o) => o,
        Err(e) => {
            let err = CheckError::Execution {
                name: def.name.clone(),
                reason: e.to_string(),
            };
            warn!("{}", err);
            return CheckResult::failed(def, None, err.to_string());
        }
    };

    if output.timed_out {
        let err = CheckError::Timeout {
            name: def.name.clone(),
            timeout,
        };
        return CheckResult::failed(def, None, err.to_string());
    }

    debug!(check = %def.name, exit_code = ?output.exit_code, "Check finished");
    if output.success() {
        return CheckResult {
            name: def.name.clone(),
            weight: def.weight,
            passed: true,
            exit_code: output.exit_code,
            error: None,
        };
    }

    let stderr = output.stderr.trim();
    let error = if stderr.is_empty() {
        format!("exit status {:?}", output.exit_code)
    } else {
        truncate(stderr, MAX_ERROR_CHARS)
    };
    CheckResult::failed(def, output.exit_code, error)
}

/// Weighted fraction of passed checks, `None` if there are none.
pub fn weighted_pass_rate(results: &[CheckResult]) -> Option<f64> {
    let total: f64 = results.iter().map(|r| r.weight).sum();
    if results.is_empty() || total <= 0.0 {
        return None;
    }
    let passed: f64 = results.iter().filter(|r| r.passed).map(|r| r.weight).sum();
    Some(passed / total)
}

pub fn write_results(session_dir: &Path, results: &[CheckResult]) -> Result<(), HarnessError> {
    let path = session_dir.join(CHECKS_FILE);
    let json = serde_json::to_string_pretty(results)?;
    fs::write(&path, json).map_err(|source| HarnessError::Write { path, source })
}

/// Reads `checks.json`; a missing file means no checks were run.
pub fn read_results(session_dir: &Path) -> Vec<CheckResult> {
    fs::read_to_string(session_dir.join(CHECKS_FILE))
        .ok()
        .and_then(|c| serde_json::from_str(&c).ok())
        .unwrap_or_default()
}
