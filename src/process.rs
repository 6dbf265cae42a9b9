//! Bounded execution of external processes.
//!
//! Every external program the harness launches (agent, binary checks, judge,
//! remote fetch, fixture clone) goes through [`run_with_timeout`]. On timeout
//! only that child is killed, and whatever it wrote so far is still returned.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to wait for pipe readers after a child was killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Captured result of a finished (or killed) process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code; `None` if the process was killed or ended by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// True when the process exceeded its timeout and was killed.
    pub timed_out: bool,
    pub duration: Duration,
}

impl ProcessOutput {
    /// Returns true if the process exited with code 0.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

fn spawn_reader<R>(reader: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut r) = reader {
            if let Err(e) = r.read_to_end(&mut buf).await {
                debug!(error = %e, "Pipe read ended with error");
            }
        }
        buf
    })
}

async fn drain(handle: JoinHandle<Vec<u8>>, grace: Option<Duration>) -> String {
    let bytes = match grace {
        Some(g) => match tokio::time::timeout(g, handle).await {
            Ok(Ok(bytes)) => bytes,
            _ => Vec::new(),
        },
        None => handle.await.unwrap_or_default(),
    };
    String::from_utf8_lossy(&bytes).to_string()
}

/// Runs `cmd` to completion or until `timeout` elapses.
///
/// Stdout and stderr are always piped. If `stdin` is given it is written and
/// closed before waiting. Returns `Err` only when the process cannot be
/// spawned; a timeout is reported through [`ProcessOutput::timed_out`].
pub async fn run_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> std::io::Result<ProcessOutput> {
    let start = Instant::now();

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            if let Err(e) = pipe.write_all(input).await {
                warn!(error = %e, "Failed to write to child stdin");
            }
            pipe.shutdown().await.ok();
        }
    }

    let stdout_handle = spawn_reader(child.stdout.take());
    let stderr_handle = spawn_reader(child.stderr.take());

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => Ok(ProcessOutput {
            exit_code: status.code(),
            stdout: drain(stdout_handle, None).await,
            stderr: drain(stderr_handle, None).await,
            timed_out: false,
            duration: start.elapsed(),
        }),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill timed out process");
            }
            Ok(ProcessOutput {
                exit_code: None,
                stdout: drain(stdout_handle, Some(DRAIN_GRACE)).await,
                stderr: drain(stderr_handle, Some(DRAIN_GRACE)).await,
                timed_out: true,
                duration: start.elapsed(),
            })
        }
    }
}

/// Builds a `sh -c <script>` command.
pub fn shell(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}
