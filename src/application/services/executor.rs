//! Bounded local shell execution
//!
//! Commands run as `/bin/sh -c <command>` in their own process group. The
//! whole group is killed when the wall-clock limit expires, so background
//! children of the shell do not outlive the run.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::domain::entities::{ExecutionResult, FailureKind};

/// Shell used for every command
pub const SHELL: &str = "/bin/sh";

/// Default wall-clock limit for a single command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

/// Bytes kept per output stream; anything beyond is read and discarded.
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Runs trusted command lines. Performs no filtering of its own: callers
/// decide who may reach it.
#[derive(Debug, Clone)]
pub struct Executor {
    timeout: Duration,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Executor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run with the configured timeout
    pub async fn run(&self, command: &str) -> ExecutionResult {
        self.run_with_timeout(command, self.timeout).await
    }

    pub async fn run_with_timeout(&self, command: &str, timeout: Duration) -> ExecutionResult {
        tracing::debug!("Running '{}' (timeout {:?})", command, timeout);
        let started = Instant::now();

        let mut cmd = Command::new(SHELL);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult::failure(
                    FailureKind::NonZeroExit,
                    format!("'{}' could not be started: {}", command, e),
                );
            }
        };

        // The shell leads its own group; keep the id, since it is gone from
        // `child` once the shell has been reaped.
        let pgid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Waiting includes draining both pipes, so a background job that keeps
        // stdout open counts against the limit too.
        let outcome = tokio::time::timeout(timeout, async {
            tokio::join!(child.wait(), drain(stdout), drain(stderr))
        })
        .await;

        match outcome {
            Ok((Ok(status), out, err)) => {
                tracing::debug!("'{}' finished with {} in {:?}", command, status, started.elapsed());
                if status.success() {
                    ExecutionResult::Success(String::from_utf8_lossy(&out).into_owned())
                } else {
                    ExecutionResult::failure(
                        FailureKind::NonZeroExit,
                        non_zero_detail(command, status, &out, &err),
                    )
                }
            }
            Ok((Err(e), _, _)) => ExecutionResult::failure(
                FailureKind::NonZeroExit,
                format!("'{}' could not be awaited: {}", command, e),
            ),
            Err(_) => {
                terminate(&mut child, pgid).await;
                tracing::debug!("'{}' killed after {:?}", command, started.elapsed());
                ExecutionResult::failure(
                    FailureKind::Timeout,
                    format!("'{}' timed out after {:?}", command, timeout),
                )
            }
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut kept = Vec::new();
    let Some(mut pipe) = pipe else {
        return kept;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = MAX_OUTPUT_BYTES.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    kept
}

/// Kill the shell's process group, then the shell itself, and reap it. The
/// group is killed even when the shell has already exited, since background
/// jobs it started may still hold the output pipes.
async fn terminate(child: &mut Child, pgid: Option<u32>) {
    #[cfg(unix)]
    {
        if let Some(pgid) = pgid {
            // SAFETY: plain syscall on a pgid we created; ESRCH is harmless.
            unsafe {
                libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;
    if child.id().is_none() {
        // shell already reaped
        return;
    }
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill timed out command: {}", e);
    }
}

fn non_zero_detail(command: &str, status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> String {
    let mut detail = match status.code() {
        Some(code) => format!("'{}' returned non-zero exit status {}", command, code),
        None => format!("'{}' was terminated by a signal", command),
    };
    for stream in [stderr, stdout] {
        let text = String::from_utf8_lossy(stream);
        let text = text.trim_end();
        if !text.is_empty() {
            detail.push('\n');
            detail.push_str(text);
        }
    }
    detail
}
