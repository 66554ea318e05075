//! Disposable git branch staging. `stage()` records everything needed to
//! put the target repository back exactly how it was found; `restore()`
//! is safe to call on every exit path (success, failure, signal) because
//! each step only undoes what `stage()` actually did.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct GitStage {
    pub target_dir: PathBuf,
    pub original_branch: String,
    pub fleet_branch: String,
    pub has_stashed: bool,
}

async fn git(target_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git").arg("-C").arg(target_dir).args(args).output().await?;
    if !output.status.success() {
        bail!("git {:?} failed: {}", args, String::from_utf8_lossy(&output.stderr));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn git_status(target_dir: &Path) -> Result<bool> {
    let out = git(target_dir, &["status", "--porcelain"]).await?;
    Ok(!out.trim().is_empty())
}

impl GitStage {
    /// Record the current branch, stash if the tree is dirty, and check
    /// out a fresh disposable branch named `fleet/fix-<now_ms>`.
    pub async fn stage(target_dir: &Path, now_ms: i64) -> Result<Self> {
        let original_branch = git(target_dir, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await
            .context("reading current branch")?;

        let has_stashed = if git_status(target_dir).await? {
            git(target_dir, &["stash", "push", "-u", "-m", "fleet: auto-stash before mission"])
                .await
                .context("stashing dirty working tree")?;
            true
        } else {
            false
        };

        let fleet_branch = format!("fleet/fix-{now_ms}");
        git(target_dir, &["checkout", "-b", &fleet_branch]).await.context("checking out fleet branch")?;

        Ok(Self { target_dir: target_dir.to_path_buf(), original_branch, fleet_branch, has_stashed })
    }

    /// Commit any uncommitted changes on the fleet branch with the given
    /// message. No-op when the tree is clean.
    pub async fn commit_if_dirty(&self, message: &str) -> Result<bool> {
        if !git_status(&self.target_dir).await? {
            return Ok(false);
        }
        git(&self.target_dir, &["add", "-A"]).await?;
        git(&self.target_dir, &["commit", "-m", message]).await?;
        Ok(true)
    }

    /// Undo staging: check out the original branch if we're still on the
    /// fleet branch, then pop the stash if one was pushed. Every step is
    /// independently idempotent so this is safe to call more than once.
    pub async fn restore(&self) {
        let current = git(&self.target_dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await.unwrap_or_default();
        if current == self.fleet_branch
            && let Err(e) = git(&self.target_dir, &["checkout", &self.original_branch]).await
        {
            tracing::error!(error = %e, "failed to restore original branch");
        }

        if self.has_stashed
            && let Err(e) = git(&self.target_dir, &["stash", "pop"]).await
        {
            tracing::error!(error = %e, "failed to pop auto-stash");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn init_repo() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("compound-runner-git-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let run = |args: &[&str]| {
            StdCommand::new("git").arg("-C").arg(&dir).args(args).status().unwrap();
        };
        run(&["init", "-q", "-b", "main"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.join("README.md"), "hello").unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-q", "-m", "initial"]);
        dir
    }

    #[tokio::test]
    async fn stage_creates_fleet_branch_and_restore_returns_to_original() {
        let dir = init_repo();
        let stage = GitStage::stage(&dir, 12345).await.unwrap();
        assert_eq!(stage.original_branch, "main");
        assert_eq!(stage.fleet_branch, "fleet/fix-12345");
        assert!(!stage.has_stashed);

        let current = git(&dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await.unwrap();
        assert_eq!(current, "fleet/fix-12345");

        stage.restore().await;
        let current = git(&dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await.unwrap();
        assert_eq!(current, "main");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn dirty_tree_is_stashed_and_popped_on_restore() {
        let dir = init_repo();
        std::fs::write(dir.join("README.md"), "dirty change").unwrap();

        let stage = GitStage::stage(&dir, 99).await.unwrap();
        assert!(stage.has_stashed);

        stage.restore().await;
        let content = std::fs::read_to_string(dir.join("README.md")).unwrap();
        assert_eq!(content, "dirty change");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn commit_if_dirty_is_noop_on_clean_tree() {
        let dir = init_repo();
        let stage = GitStage::stage(&dir, 1).await.unwrap();
        let committed = stage.commit_if_dirty("iteration 1 fixes").await.unwrap();
        assert!(!committed);
        stage.restore().await;
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
