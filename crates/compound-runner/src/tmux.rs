//! Terminal-multiplexer session and pane management. The compound runner
//! owns every pane ID it creates; workers never see tmux directly.

use std::borrow::Cow;
use std::path::Path;

use anyhow::{Result, bail};
use shell_escape::escape;
use tokio::process::Command;

pub const TMUX_SESSION_PREFIX: &str = "fleet-compound";

fn sh_escape(s: &str) -> Cow<'_, str> {
    escape(Cow::Borrowed(s))
}

#[derive(Debug, Clone)]
pub struct PaneLayout {
    pub session: String,
    pub server_pane: String,
    pub dashboard_pane: String,
    pub worker_panes: Vec<String>,
}

impl PaneLayout {
    pub fn fixer_pane(&self) -> &str {
        &self.worker_panes[0]
    }

    pub fn verifier_panes(&self) -> &[String] {
        &self.worker_panes[1..]
    }
}

pub struct TmuxSession;

impl TmuxSession {
    /// Create the session and split it into `{server, dashboard, N
    /// worker}` panes, one per line in the target window. Pane-border
    /// titles are set best-effort — a tmux build without that option
    /// doesn't fail the mission.
    pub async fn create_layout(target_dir: &Path, mission_id: &str, num_workers: u32) -> Result<PaneLayout> {
        let session = format!("{TMUX_SESSION_PREFIX}-{mission_id}");
        let dir = target_dir.to_string_lossy().to_string();

        let status = Command::new("tmux")
            .args(["new-session", "-d", "-s", &session, "-c", &dir])
            .status()
            .await?;
        if !status.success() {
            bail!("tmux new-session failed");
        }

        let server_pane = format!("{session}:0.0");
        let mut panes = vec![server_pane.clone()];

        let total_panes = 2 + num_workers; // server + dashboard + workers
        for _ in 1..total_panes {
            let target = panes.last().cloned().unwrap_or_else(|| server_pane.clone());
            let out = Command::new("tmux")
                .args(["split-window", "-d", "-t", &target, "-c", &dir, "-P", "-F", "#{pane_id}"])
                .output()
                .await?;
            if !out.status.success() {
                bail!("tmux split-window failed: {}", String::from_utf8_lossy(&out.stderr));
            }
            panes.push(String::from_utf8_lossy(&out.stdout).trim().to_string());
        }

        let _ = Command::new("tmux").args(["select-layout", "-t", &session, "even-vertical"]).status().await;

        let dashboard_pane = panes[1].clone();
        let worker_panes = panes[2..].to_vec();

        Self::set_title(&server_pane, "server").await;
        Self::set_title(&dashboard_pane, "dashboard").await;
        for (i, pane) in worker_panes.iter().enumerate() {
            let label = if i == 0 { "fixer".to_string() } else { format!("verifier-{i}") };
            Self::set_title(pane, &label).await;
        }

        Ok(PaneLayout { session, server_pane, dashboard_pane, worker_panes })
    }

    async fn set_title(pane: &str, title: &str) {
        let _ = Command::new("tmux").args(["select-pane", "-t", pane, "-T", title]).status().await;
    }

    /// Send a shell command line into `pane` followed by Enter. The
    /// caller is responsible for shell-escaping any user-controlled
    /// substring via [`shell_escape`].
    pub async fn send_command(pane: &str, command_line: &str) -> Result<()> {
        let status = Command::new("tmux")
            .args(["send-keys", "-t", pane, command_line, "Enter"])
            .status()
            .await?;
        if !status.success() {
            bail!("tmux send-keys failed for pane {pane}");
        }
        Ok(())
    }

    /// Capture the last `lines` lines of a pane's scrollback.
    pub async fn capture_tail(pane: &str, lines: u32) -> Result<String> {
        let start = format!("-{lines}");
        let out = Command::new("tmux")
            .args(["capture-pane", "-t", pane, "-p", "-S", &start])
            .output()
            .await?;
        if !out.status.success() {
            bail!("tmux capture-pane failed for pane {pane}");
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }

    /// Capture a pane's full scrollback, doubling the requested window
    /// (100, 500, 2000, then unbounded) until `predicate` is satisfied or
    /// the unbounded capture has been tried. Mirrors the progressive
    /// expansion `execute()` uses to find both a start and end marker
    /// without paying for an unbounded capture on every poll.
    pub async fn capture_until(pane: &str, predicate: impl Fn(&str) -> bool) -> Result<String> {
        for window in [100u32, 500, 2000] {
            let text = Self::capture_tail(pane, window).await?;
            if predicate(&text) {
                return Ok(text);
            }
        }
        let out = Command::new("tmux").args(["capture-pane", "-t", pane, "-p", "-S", "-"]).output().await?;
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }

    pub async fn kill_session(session: &str) {
        let _ = Command::new("tmux").args(["kill-session", "-t", session]).status().await;
    }
}

/// Build a `cat <prompt-file> | <binary> ...` command line, escaping
/// every interpolated argument.
pub fn worker_command_line(prompt_file: &Path, binary: &str, extra_args: &[&str]) -> String {
    let mut cmd = format!(
        "cat {} | {}",
        sh_escape(&prompt_file.to_string_lossy()),
        sh_escape(binary),
    );
    for arg in extra_args {
        cmd.push(' ');
        cmd.push_str(&sh_escape(arg));
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_command_line_escapes_prompt_path() {
        let path = Path::new("/tmp/needs a quote'/prompt.txt");
        let cmd = worker_command_line(path, "claude", &["--print"]);
        assert!(cmd.starts_with("cat "));
        assert!(cmd.contains("claude"));
        assert!(cmd.contains("--print"));
    }

    #[test]
    fn shell_escape_neutralizes_single_quotes() {
        let escaped = sh_escape("it's a test");
        assert!(!escaped.contains("it's a test") || escaped.contains("'\\''"));
    }
}
