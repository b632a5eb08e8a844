//! Subprocess execution helpers for the signature-verification and
//! CVMFS-ingestion executables invoked by the control plane.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Result of a command run to completion without a timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandResult {
    pub fn ok(&self) -> Result<&Self> {
        if self.success {
            Ok(self)
        } else {
            Err(anyhow::anyhow!(
                "command failed with exit code {:?}: {}",
                self.exit_code,
                self.stderr
            ))
        }
    }

    fn from_output(output: &Output, duration: Duration) -> Self {
        Self {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Result of a command run with timeout bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

/// Run a command to completion and capture its output.
pub fn run_command(program: &str, args: &[&str]) -> Result<CommandResult> {
    let start = Instant::now();
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to run command: {program} {args:?}"))?;
    Ok(CommandResult::from_output(&output, start.elapsed()))
}

/// Run a command in a specific working directory.
pub fn run_command_in_dir(program: &str, args: &[&str], dir: &Path) -> Result<CommandResult> {
    let start = Instant::now();
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("failed to run command: {program} {args:?} in {}", dir.display()))?;
    Ok(CommandResult::from_output(&output, start.elapsed()))
}

/// Run a command with an optional timeout, killing it if the deadline is
/// exceeded. Used for the signature-verification and ingest executables,
/// which are untrusted third-party scripts.
pub fn run_command_with_timeout(
    program: &str,
    args: &[&str],
    working_dir: &Path,
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let start = Instant::now();

    let Some(timeout_dur) = timeout else {
        let output = run_command_in_dir(program, args, working_dir)?;
        return Ok(CommandOutput {
            exit_code: output.exit_code.unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
            timed_out: false,
            duration: Duration::from_millis(output.duration_ms),
        });
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn command: {program}"))?;

    let deadline = Instant::now() + timeout_dur;
    loop {
        match child
            .try_wait()
            .with_context(|| format!("failed to poll command: {program}"))?
        {
            Some(status) => {
                return Ok(CommandOutput {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: read_pipe(child.stdout.take()),
                    stderr: read_pipe(child.stderr.take()),
                    timed_out: false,
                    duration: start.elapsed(),
                });
            }
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();

                    let mut stderr = read_pipe(child.stderr.take());
                    stderr.push_str(&format!(
                        "\n{program} timed out after {}",
                        humantime::format_duration(timeout_dur)
                    ));

                    return Ok(CommandOutput {
                        exit_code: -1,
                        stdout: read_pipe(child.stdout.take()),
                        stderr,
                        timed_out: true,
                        duration: start.elapsed(),
                    });
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

fn read_pipe<R: Read>(stream: Option<R>) -> String {
    let mut buffer = Vec::new();
    if let Some(mut s) = stream {
        let _ = s.read_to_end(&mut buffer);
    }
    String::from_utf8_lossy(&buffer).to_string()
}

/// Run a command, streaming its stdout/stderr straight to ours. Used for
/// the privileged ingest script so operators see progress live.
pub fn run_command_streaming(program: &str, args: &[&str]) -> Result<CommandResult> {
    let start = Instant::now();
    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .output()
        .with_context(|| format!("failed to run command: {program} {args:?}"))?;
    Ok(CommandResult::from_output(&output, start.elapsed()))
}

/// Whether a program can be found on `PATH`.
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_command_captures_stdout() {
        let result = run_command("echo", &["hello"]).expect("run");
        assert!(result.success);
        assert!(result.stdout.contains("hello"));
    }

    #[test]
    fn run_command_reports_failure() {
        let result = run_command("sh", &["-c", "exit 3"]).expect("run");
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert!(result.ok().is_err());
    }

    #[test]
    fn run_command_with_timeout_kills_long_running_process() {
        let td = tempfile::tempdir().expect("tempdir");
        let output = run_command_with_timeout(
            "sh",
            &["-c", "sleep 5"],
            td.path(),
            Some(Duration::from_millis(100)),
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(output.stderr.contains("timed out"));
    }

    #[test]
    fn run_command_with_timeout_none_runs_to_completion() {
        let td = tempfile::tempdir().expect("tempdir");
        let output =
            run_command_with_timeout("echo", &["done"], td.path(), None).expect("run");
        assert!(!output.timed_out);
        assert_eq!(output.exit_code, 0);
        assert!(output.stdout.contains("done"));
    }

    #[test]
    fn command_exists_for_a_real_binary() {
        assert!(command_exists("sh"));
    }

    #[test]
    fn command_exists_false_for_nonexistent_binary() {
        assert!(!command_exists("this-command-does-not-exist-xyz123"));
    }

    #[test]
    fn command_result_serializes() {
        let result = CommandResult {
            success: true,
            exit_code: Some(0),
            stdout: "output".to_string(),
            stderr: String::new(),
            duration_ms: 10,
        };
        let json = serde_json::to_string(&result).expect("serialize");
        assert!(json.contains("\"success\":true"));
    }
}
