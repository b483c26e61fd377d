use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{Attach, AttachedStream, Launcher, TmuxSession};
use crate::capture::PaneDump;
use crate::error::DeckError;
use crate::health::{LivenessProbe, ProbeOutcome};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Client for interacting with tmux via CLI
#[derive(Debug, Clone)]
pub struct TmuxClient {
    /// Path to tmux binary
    tmux_path: String,
    /// Server socket name passed as `-L`
    socket: Option<String>,
    /// Deadline for each command
    timeout: Duration,
}

/// `=name` matches the session called exactly `name`. A bare name would
/// fall back to prefix matching and could hit `deck-12` for `deck-1`.
fn session_target(name: &str) -> String {
    format!("={}", name)
}

/// Active pane of the session called exactly `name`.
fn pane_target(name: &str) -> String {
    format!("={}:", name)
}

impl TmuxClient {
    pub fn new() -> Self {
        Self::with_path("tmux")
    }

    pub fn with_path(tmux_path: impl Into<String>) -> Self {
        Self {
            tmux_path: tmux_path.into(),
            socket: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn on_socket(mut self, socket: Option<String>) -> Self {
        self.socket = socket;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.tmux_path);
        if let Some(socket) = &self.socket {
            cmd.args(["-L", socket.as_str()]);
        }
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        let name = args.first().copied().unwrap_or("");
        let mut cmd = self.command();
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(output) => output.with_context(|| format!("Failed to execute tmux {}", name)),
            Err(_) => Err(DeckError::Timeout {
                operation: "tmux command",
                after: self.timeout,
            })
            .with_context(|| format!("tmux {} did not finish", name)),
        }
    }

    async fn run_ok(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("tmux {} failed: {}", args[0], stderr.trim());
        }
        Ok(output)
    }

    /// Check if tmux server is running
    pub async fn is_server_running(&self) -> bool {
        self.run(&["list-sessions"])
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// List all tmux sessions
    pub async fn list_sessions(&self) -> Result<Vec<TmuxSession>> {
        let output = self
            .run(&["list-sessions", "-F", "#{session_name}"])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("no server running")
                || stderr.contains("no sessions")
                || stderr.contains("error connecting")
            {
                return Ok(Vec::new());
            }
            anyhow::bail!("tmux list-sessions failed: {}", stderr);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter(|name| !name.is_empty())
            .map(|name| TmuxSession {
                name: name.to_string(),
            })
            .collect())
    }

    /// Create a detached session with its shell in `work_dir`
    pub async fn create_session(&self, name: &str, work_dir: &Path) -> Result<()> {
        let work_dir = work_dir.to_string_lossy();
        self.run_ok(&["new-session", "-d", "-s", name, "-c", &*work_dir])
            .await
            .with_context(|| format!("Failed to create session '{}'", name))?;
        Ok(())
    }

    /// Kill a session
    pub async fn kill_session(&self, session_id: &str) -> Result<()> {
        self.run_ok(&["kill-session", "-t", &session_target(session_id)])
            .await
            .context("Failed to kill tmux session")?;
        Ok(())
    }

    /// Type `text` literally into the session's active pane
    pub async fn send_literal(&self, session_id: &str, text: &str) -> Result<()> {
        self.run_ok(&["send-keys", "-t", &pane_target(session_id), "-l", "--", text])
            .await?;
        Ok(())
    }

    /// Press a named key (`Enter`, `C-c`, `F5`, ...)
    pub async fn send_key(&self, session_id: &str, key: &str) -> Result<()> {
        self.run_ok(&["send-keys", "-t", &pane_target(session_id), key])
            .await?;
        Ok(())
    }

    /// Snapshot the last `lines` lines of the pane through a named paste
    /// buffer, deleting the buffer before returning.
    pub async fn dump_pane(&self, session_id: &str, lines: usize) -> Result<String> {
        let buffer = format!("agent-deck-dump-{}-{}", std::process::id(), session_id);
        let start = format!("-{}", lines);
        let target = pane_target(session_id);

        let captured = self
            .run_ok(&[
                "capture-pane", "-e", "-J", "-S", &start, "-b", &buffer, "-t", &target,
            ])
            .await;
        let content = match captured {
            Ok(_) => self.run_ok(&["show-buffer", "-b", &buffer]).await,
            Err(e) => Err(e),
        };

        if let Err(e) = self.run(&["delete-buffer", "-b", &buffer]).await {
            debug!(buffer = %buffer, error = %e, "delete-buffer failed");
        }

        let output = content.context("Failed to dump pane")?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Append everything the pane prints to `path`
    pub async fn pipe_to_file(&self, session_id: &str, path: &Path) -> Result<()> {
        let command = format!("cat >> {}", shell_quote(&path.to_string_lossy()));
        self.run_ok(&["pipe-pane", "-o", "-t", &pane_target(session_id), &command])
            .await
            .context("Failed to set up pipe-pane")?;
        Ok(())
    }

    /// Get the command to attach to a session (for external execution)
    pub fn attach_command(&self, session_id: &str) -> Vec<String> {
        let mut cmd = vec![self.tmux_path.clone()];
        if let Some(socket) = &self.socket {
            cmd.extend(["-L".to_string(), socket.clone()]);
        }
        cmd.extend([
            "attach-session".to_string(),
            "-t".to_string(),
            session_target(session_id),
        ]);
        cmd
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

fn is_timeout(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<DeckError>(), Some(DeckError::Timeout { .. }))
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[async_trait]
impl Launcher for TmuxClient {
    async fn start(
        &self,
        name: &str,
        work_dir: &Path,
        initial_input: Option<&str>,
    ) -> Result<String> {
        self.create_session(name, work_dir).await?;

        if let Some(input) = initial_input.filter(|s| !s.trim().is_empty()) {
            if let Err(e) = self.send_literal(name, input).await {
                warn!(session = name, error = %e, "initial input not delivered");
            } else if let Err(e) = self.send_key(name, "Enter").await {
                warn!(session = name, error = %e, "initial input not submitted");
            }
        }

        info!(session = name, dir = %work_dir.display(), "session started");
        Ok(name.to_string())
    }

    async fn send_text(&self, session_id: &str, text: &str, press_enter: bool) -> bool {
        if !text.is_empty() {
            if let Err(e) = self.send_literal(session_id, text).await {
                warn!(session = session_id, error = %e, "send_text failed");
                return false;
            }
        }
        if press_enter {
            return self.send_control_key(session_id, "Enter").await;
        }
        true
    }

    async fn send_control_key(&self, session_id: &str, key: &str) -> bool {
        match self.send_key(session_id, key).await {
            Ok(()) => true,
            Err(e) => {
                warn!(session = session_id, key, error = %e, "send key failed");
                false
            }
        }
    }

    async fn exists(&self, session_id: &str) -> bool {
        self.run(&["has-session", "-t", &session_target(session_id)])
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn terminate(&self, session_id: &str) -> bool {
        match self.kill_session(session_id).await {
            Ok(()) => {
                info!(session = session_id, "session terminated");
                true
            }
            Err(e) => {
                warn!(session = session_id, error = %e, "terminate failed");
                false
            }
        }
    }
}

#[async_trait]
impl Attach for TmuxClient {
    async fn attach(&self, session_id: &str) -> Result<AttachedStream> {
        // stdin stays open inside `child`; control mode exits on EOF.
        let target = session_target(session_id);
        let mut child = self
            .command()
            .args(["-C", "attach-session", "-r", "-t", target.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to start control-mode client")?;

        let stdout = child
            .stdout
            .take()
            .context("control-mode client has no stdout")?;

        debug!(session = session_id, "control-mode reader attached");
        Ok(AttachedStream {
            output: Box::new(stdout),
            child: Some(child),
        })
    }
}

#[async_trait]
impl PaneDump for TmuxClient {
    async fn dump(&self, session_id: &str, lines: usize) -> Result<String> {
        self.dump_pane(session_id, lines).await
    }
}

#[async_trait]
impl LivenessProbe for TmuxClient {
    async fn probe(&self, session_id: &str) -> ProbeOutcome {
        let output = match self
            .run(&["display-message", "-p", "-t", &pane_target(session_id), "#{pane_dead}"])
            .await
        {
            Ok(output) => output,
            Err(e) if is_timeout(&e) => return ProbeOutcome::TimedOut,
            Err(e) => return ProbeOutcome::Failed(format!("{:#}", e)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("can't find") || stderr.contains("no server running") {
                return ProbeOutcome::NotFound;
            }
            return ProbeOutcome::Failed(stderr.trim().to_string());
        }

        match String::from_utf8_lossy(&output.stdout).trim() {
            "1" => ProbeOutcome::NotFound,
            _ => ProbeOutcome::Alive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_are_exact() {
        assert_eq!(session_target("deck-1"), "=deck-1");
        assert_eq!(pane_target("deck-1"), "=deck-1:");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/tmp/a b"), "'/tmp/a b'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_attach_command() {
        let client = TmuxClient::new();
        assert_eq!(
            client.attach_command("deck-1"),
            vec!["tmux", "attach-session", "-t", "=deck-1"]
        );

        let client = TmuxClient::new().on_socket(Some("side".to_string()));
        assert_eq!(
            client.attach_command("deck-1"),
            vec!["tmux", "-L", "side", "attach-session", "-t", "=deck-1"]
        );
    }

    #[tokio::test]
    async fn test_stuck_command_times_out() {
        // any binary that outlives the deadline will do
        let client = TmuxClient::with_path("sleep").with_timeout(Duration::from_millis(50));
        let err = client.run(&["5"]).await.expect_err("deadline");
        assert!(is_timeout(&err));
    }

    fn tmux_available() -> bool {
        std::process::Command::new("tmux")
            .arg("-V")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    #[tokio::test]
    async fn test_gone_session_never_resolves_to_a_longer_name() {
        if !tmux_available() {
            return;
        }
        let socket = format!("agent-deck-test-{}", std::process::id());
        let client = TmuxClient::new().on_socket(Some(socket));
        let dir = tempfile::tempdir().expect("tempdir");
        client
            .create_session("deck-12", dir.path())
            .await
            .expect("create deck-12");

        let exists = client.exists("deck-1").await;
        let probe = client.probe("deck-1").await;
        let killed = client.terminate("deck-1").await;
        let typed = client.send_control_key("deck-1", "Enter").await;
        let survivor = client.exists("deck-12").await;
        let _ = client.run(&["kill-server"]).await;

        assert!(!exists);
        assert_eq!(probe, ProbeOutcome::NotFound);
        assert!(!killed);
        assert!(!typed);
        assert!(survivor);
    }
}
