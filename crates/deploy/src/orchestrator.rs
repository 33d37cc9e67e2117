//! External compose tool invocation

use async_trait::async_trait;
use dockyard_common::{Error, Result};
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Bytes of output kept per stream
pub const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// Default limit on one orchestrator call
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Captured output of a finished command
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs compose subcommands for one project
///
/// Implementations fail with `CommandFailed` on a non-zero exit and never
/// retry.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn compose(&self, project: &str, compose_file: &Path, args: &[String])
        -> Result<CommandOutput>;
}

/// `docker compose` run as a child process
pub struct DockerCompose {
    binary: String,
    timeout: Duration,
}

impl DockerCompose {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

impl Default for DockerCompose {
    fn default() -> Self {
        Self::new("docker", DEFAULT_COMMAND_TIMEOUT)
    }
}

/// Append a line, then drop whole characters from the front past `cap`
fn push_tail(buf: &mut String, line: &str, cap: usize) {
    buf.push_str(line);
    buf.push('\n');
    if buf.len() > cap {
        let mut cut = buf.len() - cap;
        while !buf.is_char_boundary(cut) {
            cut += 1;
        }
        buf.drain(..cut);
    }
}

async fn capture<R>(reader: Option<R>, project: String, stream: &'static str) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let Some(reader) = reader else {
        return captured;
    };

    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!("[{} {}] {}", project, stream, line);
                push_tail(&mut captured, &line, MAX_CAPTURE_BYTES);
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Stopped reading {} of {}: {}", stream, project, e);
                break;
            }
        }
    }
    captured
}

#[async_trait]
impl Orchestrator for DockerCompose {
    async fn compose(
        &self,
        project: &str,
        compose_file: &Path,
        args: &[String],
    ) -> Result<CommandOutput> {
        let mut command = Command::new(&self.binary);
        command
            .arg("compose")
            .arg("-p")
            .arg(project)
            .arg("-f")
            .arg(compose_file)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = compose_file.parent() {
            command.current_dir(dir);
        }

        info!(
            "Running {} compose -p {} -f {} {}",
            self.binary,
            project,
            compose_file.display(),
            args.join(" ")
        );

        let mut child = command
            .spawn()
            .map_err(|e| Error::CommandFailed(format!("failed to start {}: {}", self.binary, e)))?;

        let mut stdout = tokio::spawn(capture(child.stdout.take(), project.to_string(), "stdout"));
        let mut stderr = tokio::spawn(capture(child.stderr.take(), project.to_string(), "stderr"));

        // One deadline covers the exit and draining both pipes
        let deadline = Instant::now() + self.timeout;

        let status = match timeout_at(deadline, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out command for {}: {}", project, e);
                }
                stdout.abort();
                stderr.abort();
                return Err(Error::CommandTimedOut(self.timeout.as_secs()));
            }
        };

        let drained = timeout_at(deadline, async {
            let out = (&mut stdout).await.unwrap_or_default();
            let err = (&mut stderr).await.unwrap_or_default();
            (out, err)
        })
        .await;

        let output = match drained {
            Ok((stdout, stderr)) => CommandOutput { stdout, stderr },
            Err(_) => {
                warn!(
                    "Output of {} still open after the command exited, giving up",
                    project
                );
                stdout.abort();
                stderr.abort();
                return Err(Error::CommandTimedOut(self.timeout.as_secs()));
            }
        };

        if status.success() {
            Ok(output)
        } else {
            let detail = output.stderr.trim();
            Err(Error::CommandFailed(if detail.is_empty() {
                format!("{} exited with {}", self.binary, status)
            } else {
                detail.to_string()
            }))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    /// `sh compose ...` runs a script named `compose` from the compose
    /// file's directory, standing in for the real tool.
    fn fake_tool(script: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("compose"), script).unwrap();
        let compose_file = dir.path().join("docker-compose.yml");
        fs::write(&compose_file, "services: {}\n").unwrap();
        (dir, compose_file)
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_push_tail_keeps_last_bytes() {
        let mut buf = String::new();
        push_tail(&mut buf, "first", 16);
        push_tail(&mut buf, "second", 16);
        assert_eq!(buf, "first\nsecond\n");
        push_tail(&mut buf, "third", 16);
        assert_eq!(buf, "st\nsecond\nthird\n");

        let mut wide = String::new();
        push_tail(&mut wide, "ééééé", 5);
        assert_eq!(wide, "éé\n");
    }

    #[tokio::test]
    async fn test_passes_project_and_file() {
        let (_dir, compose_file) = fake_tool("echo \"$*\"\n");
        let tool = DockerCompose::new("sh", Duration::from_secs(10));

        let output = tool
            .compose("my_app_", &compose_file, &args(&["up", "-d"]))
            .await
            .unwrap();
        assert_eq!(
            output.stdout.trim(),
            format!("-p my_app_ -f {} up -d", compose_file.display())
        );
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_stderr() {
        let (_dir, compose_file) = fake_tool("echo progress\necho 'no such service' >&2\nexit 3\n");
        let tool = DockerCompose::new("sh", Duration::from_secs(10));

        let err = tool
            .compose("demo", &compose_file, &args(&["restart"]))
            .await
            .unwrap_err();
        match err {
            Error::CommandFailed(detail) => assert_eq!(detail, "no such service"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let (_dir, compose_file) = fake_tool("sleep 30\n");
        let tool = DockerCompose::new("sh", Duration::from_secs(1));

        let err = tool
            .compose("demo", &compose_file, &args(&["up", "-d"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandTimedOut(1)));
    }

    #[tokio::test]
    async fn test_timeout_covers_inherited_output_pipes() {
        // The tool exits at once but a background child keeps stdout open
        let (_dir, compose_file) = fake_tool("sleep 8 &\nexit 0\n");
        let tool = DockerCompose::new("sh", Duration::from_secs(1));

        let started = std::time::Instant::now();
        let err = tool
            .compose("demo", &compose_file, &args(&["up", "-d"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandTimedOut(1)));
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "call took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let (_dir, compose_file) = fake_tool("");
        let tool = DockerCompose::new("/nonexistent/docker", Duration::from_secs(1));

        let err = tool
            .compose("demo", &compose_file, &args(&["stop"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed(_)));
    }
}
