//! Async subprocess runner for provider CLIs.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::ProviderError;

/// Default timeout for one-shot CLI invocations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Captured output of a finished (or killed) CLI invocation.
#[derive(Debug, Clone)]
pub struct CliOutput {
    /// Exit code; 0 on success. Meaningless when `timed_out` is set.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    /// True when the process was killed after exceeding its timeout.
    pub timed_out: bool,
}

impl CliOutput {
    pub fn ok(&self) -> bool {
        !self.timed_out && self.code == 0
    }

    /// Stdout and stderr joined, for keyword scanning.
    pub fn combined(&self) -> String {
        format!("{} {}", self.stdout, self.stderr)
    }
}

/// Run a CLI command to completion, capturing output.
///
/// On timeout the child is killed and a `CliOutput` with `timed_out` set is
/// returned rather than an error, so callers can classify it themselves.
pub async fn run_cli(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<CliOutput, ProviderError> {
    let command_line = format!("{} {}", program, args.join(" "));
    debug!(command = %command_line, "running CLI");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProviderError::Spawn {
            command: command_line.clone(),
            source,
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| ProviderError::Spawn {
            command: command_line.clone(),
            source,
        })?,
        Err(_) => {
            // kill_on_drop reaps the child once the future is dropped.
            warn!(command = %command_line, timeout_secs = timeout.as_secs(), "CLI timed out");
            return Ok(CliOutput {
                code: -1,
                stdout: String::new(),
                stderr: format!("timed out after {}s", timeout.as_secs()),
                timed_out: true,
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let code = output.status.code().unwrap_or(-1);

    debug!(
        command = %command_line,
        code,
        stdout_preview = %stdout.chars().take(200).collect::<String>(),
        "CLI finished"
    );

    Ok(CliOutput {
        code,
        stdout,
        stderr,
        timed_out: false,
    })
}

/// Start a long-running subprocess (e.g. a device-code auth flow) with stderr
/// folded into stdout. The caller owns the child's lifecycle.
pub fn start_long_running(program: &str, args: &[&str]) -> Result<Child, ProviderError> {
    let command_line = format!("{} {}", program, args.join(" "));
    debug!(command = %command_line, "starting long-running CLI");

    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProviderError::Spawn {
            command: command_line,
            source,
        })
}

/// Read lines from a child's stdout until `done` matches the accumulated text,
/// EOF is reached, or a line takes longer than `line_timeout`.
///
/// Returns whatever was collected; empty output yields `None`.
pub(crate) async fn read_initial_output<R>(
    stdout: R,
    line_timeout: Duration,
    done: impl Fn(&str) -> bool,
) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stdout).lines();
    let mut collected = String::new();

    loop {
        match tokio::time::timeout(line_timeout, reader.next_line()).await {
            Ok(Ok(Some(line))) => {
                collected.push_str(&line);
                collected.push('\n');
                if done(&collected) {
                    break;
                }
            }
            Ok(Ok(None)) | Ok(Err(_)) | Err(_) => break,
        }
    }

    if collected.is_empty() {
        None
    } else {
        Some(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_cli_captures_stdout() {
        let out = run_cli("echo", &["hello"], DEFAULT_TIMEOUT).await.unwrap();
        assert!(out.ok());
        assert_eq!(out.stdout, "hello");
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn run_cli_reports_nonzero_exit() {
        let out = run_cli("sh", &["-c", "echo oops >&2; exit 3"], DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert!(!out.ok());
        assert_eq!(out.code, 3);
        assert_eq!(out.stderr, "oops");
    }

    #[tokio::test]
    async fn run_cli_times_out_and_reports_it() {
        let out = run_cli("sleep", &["5"], Duration::from_millis(100))
            .await
            .unwrap();
        assert!(out.timed_out);
        assert!(!out.ok());
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let err = run_cli("definitely-not-a-real-binary", &[], DEFAULT_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Spawn { .. }));
    }

    #[tokio::test]
    async fn read_initial_output_stops_on_predicate() {
        let input: &[u8] = b"line one\ncode ABCD-1234\ntrailing\n";
        let output = read_initial_output(input, Duration::from_secs(1), |text| {
            text.contains("ABCD-1234")
        })
        .await
        .unwrap();
        assert!(output.contains("line one"));
        assert!(output.contains("ABCD-1234"));
        assert!(!output.contains("trailing"));
    }
}
