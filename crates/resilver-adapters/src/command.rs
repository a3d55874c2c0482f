//! Subprocess runner for administrative commands.
//!
//! Runs a program to completion, capturing stdout and stderr concurrently.
//! If the deadline passes the process receives SIGTERM, then SIGKILL after a
//! short grace period.

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use resilver_proto::{AdminError, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Time a terminated child gets to exit before it is killed.
const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Captured result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Executes commands with a fixed deadline.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `program` and returns its output whatever the exit status.
    pub async fn output(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let line = render(program, args);
        debug!(command = %line, "Running command");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AdminError::Spawn {
                command: line.clone(),
                source,
            })?;

        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();

        // Read both streams concurrently so a full stderr pipe cannot block stdout
        let collect = async {
            let stdout = async {
                let mut buf = String::new();
                if let Some(mut out) = stdout_handle {
                    out.read_to_string(&mut buf).await?;
                }
                Ok::<_, std::io::Error>(buf)
            };
            let stderr = async {
                let mut buf = String::new();
                if let Some(mut err) = stderr_handle {
                    err.read_to_string(&mut buf).await?;
                }
                Ok::<_, std::io::Error>(buf)
            };
            let (stdout, stderr) = tokio::try_join!(stdout, stderr)?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>(CommandOutput {
                stdout,
                stderr,
                exit_code: status.code(),
            })
        };

        let outcome = tokio::time::timeout(self.timeout, collect).await;
        match outcome {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(command = %line, timeout_secs = self.timeout.as_secs(), "Command timed out, sending SIGTERM");
                terminate_child(&mut child, TERMINATION_GRACE).await?;
                Err(AdminError::Timeout {
                    command: line,
                    timeout: self.timeout,
                }
                .into())
            }
        }
    }

    /// Runs `program` and returns its stdout, failing on a non-zero exit.
    pub async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let output = self.output(program, args).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(AdminError::CommandFailed {
                command: render(program, args),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            }
            .into())
        }
    }
}

/// Renders a command line for logs and error messages.
pub fn render(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sends SIGTERM, then SIGKILL if the child has not exited within `grace`.
pub(crate) async fn terminate_child(child: &mut Child, grace: Duration) -> std::io::Result<()> {
    let Some(id) = child.id() else {
        // Already reaped
        return Ok(());
    };
    #[allow(clippy::cast_possible_wrap)]
    let pid = Pid::from_raw(id as i32);
    debug!(%pid, "Sending SIGTERM");
    let _ = kill(pid, Signal::SIGTERM);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => {
            let status = status?;
            debug!(%pid, ?status, "Child exited");
            Ok(())
        }
        Err(_) => {
            debug!(%pid, "Grace period expired, sending SIGKILL");
            child.kill().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resilver_proto::Error;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let runner = CommandRunner::new(Duration::from_secs(10));
        let out = runner.run("echo", &args(&["tank", "ONLINE"])).await.unwrap();
        assert_eq!(out.trim(), "tank ONLINE");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_command_failure() {
        let runner = CommandRunner::new(Duration::from_secs(10));
        let err = runner
            .run("sh", &args(&["-c", "echo \"cannot open 'tank': no such pool\" >&2; exit 1"]))
            .await
            .unwrap_err();
        match err {
            Error::Admin(AdminError::CommandFailed { exit_code, stderr, .. }) => {
                assert_eq!(exit_code, Some(1));
                assert!(stderr.contains("no such pool"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_output_keeps_failed_streams() {
        let runner = CommandRunner::new(Duration::from_secs(10));
        let out = runner
            .output("sh", &args(&["-c", "echo out; echo err >&2; exit 3"]))
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_timeout_terminates_child() {
        let runner = CommandRunner::new(Duration::from_millis(200));
        let err = runner.run("sleep", &args(&["30"])).await.unwrap_err();
        assert!(matches!(err, Error::Admin(AdminError::Timeout { .. })), "{err}");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let runner = CommandRunner::new(Duration::from_secs(1));
        let err = runner.run("resilver-no-such-binary", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Admin(AdminError::Spawn { .. })));
    }

    #[test]
    fn test_render() {
        assert_eq!(render("zpool", &args(&["status", "tank"])), "zpool status tank");
        assert_eq!(render("zpool", &[]), "zpool");
    }
}
