//! Preflight checks. Every check here must pass before a mission touches
//! git or tmux state — if any fails, `run()` aborts with
//! [`crate::result::MissionResult::failed_preflight`] and nothing has
//! been mutated yet.

use std::fmt;
use std::path::Path;

use crate::config::RunnerConfig;
use crate::tmux::TMUX_SESSION_PREFIX;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreflightError {
    MissingTool(&'static str),
    NotAGitWorktree(String),
    PortInUse(u16),
}

impl fmt::Display for PreflightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreflightError::MissingTool(name) => write!(f, "required tool not installed: {name}"),
            PreflightError::NotAGitWorktree(dir) => write!(f, "target directory is not a git worktree: {dir}"),
            PreflightError::PortInUse(port) => write!(f, "port {port} is already in use"),
        }
    }
}

impl std::error::Error for PreflightError {}

/// Run every preflight check in order, short-circuiting on the first
/// failure. Stale tmux session cleanup runs last, after every other
/// check has passed, since it is itself a mutation.
pub async fn run(cfg: &RunnerConfig) -> Result<(), PreflightError> {
    check_tool("tmux").await?;
    check_tool("git").await?;
    if cfg.is_live {
        check_tool("claude").await?;
    }
    check_git_worktree(&cfg.target_dir)?;
    check_port_free(cfg).await?;
    kill_stale_session().await;
    Ok(())
}

async fn check_tool(name: &'static str) -> Result<(), PreflightError> {
    if which::which(name).is_ok() {
        Ok(())
    } else {
        Err(PreflightError::MissingTool(name))
    }
}

fn check_git_worktree(target_dir: &Path) -> Result<(), PreflightError> {
    if target_dir.is_dir() && target_dir.join(".git").exists() {
        Ok(())
    } else {
        Err(PreflightError::NotAGitWorktree(target_dir.to_string_lossy().into_owned()))
    }
}

/// A free port means the health probe fails to connect; a successful
/// response means something is already bound there.
async fn check_port_free(cfg: &RunnerConfig) -> Result<(), PreflightError> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(500))
        .build()
        .map_err(|_| PreflightError::PortInUse(cfg.port))?;
    match client.get(cfg.health_url()).send().await {
        Ok(resp) if resp.status().is_success() => Err(PreflightError::PortInUse(cfg.port)),
        _ => Ok(()),
    }
}

async fn kill_stale_session() {
    let _ = tokio::process::Command::new("tmux")
        .args(["kill-session", "-t", TMUX_SESSION_PREFIX])
        .output()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn non_git_dir_fails_worktree_check() {
        let dir = std::env::temp_dir().join(format!("compound-runner-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let err = check_git_worktree(&dir).unwrap_err();
        assert_eq!(err, PreflightError::NotAGitWorktree(dir.to_string_lossy().into_owned()));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_directory_fails_worktree_check() {
        let dir = PathBuf::from("/definitely/does/not/exist/xyz");
        assert!(check_git_worktree(&dir).is_err());
    }

    #[test]
    fn git_dir_passes_worktree_check() {
        let dir = std::env::temp_dir().join(format!("compound-runner-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join(".git")).unwrap();
        assert!(check_git_worktree(&dir).is_ok());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
