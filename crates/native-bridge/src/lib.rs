//! Discovers the native worker binary, prepares each worker's per-agent
//! filesystem workspace, and builds the environment it runs under.
//!
//! "Native" spawn mode runs the worker as a standalone binary (as opposed
//! to a plain child process of this server or a tmux pane) with its own
//! well-known inbox directory. This bridge only prepares the ground the
//! worker stands on; `worker-manager` still owns the actual spawn.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Env var names the worker process receives, spelled out so call sites
/// don't scatter string literals.
pub mod env_keys {
    pub const AGENT_ID: &str = "AGENT_ID";
    pub const TEAM_NAME: &str = "TEAM_NAME";
    pub const AGENT_NAME: &str = "AGENT_NAME";
    pub const AGENT_TYPE: &str = "AGENT_TYPE";
    pub const SERVER_URL: &str = "SERVER_URL";
    pub const SWARM_ID: &str = "SWARM_ID";
    pub const INBOX_DIR: &str = "INBOX_DIR";
}

/// Everything needed to describe one worker's native environment.
#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    pub agent_id: String,
    pub team_name: String,
    pub agent_name: String,
    pub agent_type: String,
    pub server_url: String,
    pub swarm_id: Option<String>,
}

pub struct NativeBridge {
    /// Root directory under which each agent gets `<base>/<agent_id>/`.
    base_dir: PathBuf,
    binary_path: Option<PathBuf>,
}

impl NativeBridge {
    /// Probe `PATH` for the native worker binary once at construction,
    /// the same way the manager probes it on startup to decide whether to
    /// auto-promote the default spawn mode.
    pub fn discover(base_dir: impl Into<PathBuf>, binary_name: &str) -> Self {
        let binary_path = which::which(binary_name).ok();
        if let Some(path) = &binary_path {
            tracing::info!(binary = %path.display(), "native worker binary discovered");
        } else {
            tracing::info!(binary_name, "native worker binary not found on PATH");
        }
        Self { base_dir: base_dir.into(), binary_path }
    }

    pub fn is_available(&self) -> bool {
        self.binary_path.is_some()
    }

    /// True when the manager should fall back to its default spawn mode
    /// because the native binary isn't installed.
    pub fn should_fallback(&self) -> bool {
        !self.is_available()
    }

    pub fn binary_path(&self) -> Option<&Path> {
        self.binary_path.as_deref()
    }

    fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.base_dir.join(agent_id)
    }

    pub fn inbox_dir(&self, agent_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join("inbox")
    }

    /// Create the per-agent workspace directory tree. Idempotent.
    pub async fn prepare_workspace(&self, agent_id: &str) -> Result<PathBuf> {
        let dir = self.agent_dir(agent_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating native workspace for {agent_id}"))?;
        tokio::fs::create_dir_all(self.inbox_dir(agent_id))
            .await
            .with_context(|| format!("creating inbox dir for {agent_id}"))?;
        Ok(dir)
    }

    /// Build the environment map the worker process is started with.
    pub fn build_env(&self, desc: &AgentDescriptor) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("FORCE_COLOR".to_string(), "0".to_string());
        env.insert(env_keys::AGENT_ID.to_string(), desc.agent_id.clone());
        env.insert(env_keys::TEAM_NAME.to_string(), desc.team_name.clone());
        env.insert(env_keys::AGENT_NAME.to_string(), desc.agent_name.clone());
        env.insert(env_keys::AGENT_TYPE.to_string(), desc.agent_type.clone());
        env.insert(env_keys::SERVER_URL.to_string(), desc.server_url.clone());
        env.insert(
            env_keys::INBOX_DIR.to_string(),
            self.inbox_dir(&desc.agent_id).to_string_lossy().into_owned(),
        );
        if let Some(swarm_id) = &desc.swarm_id {
            env.insert(env_keys::SWARM_ID.to_string(), swarm_id.clone());
        }
        env
    }

    /// Hash the resolved environment + workspace path as a config-drift
    /// signal: a future respawn can compare this against the value it
    /// last recorded and log when the worker's environment changed since
    /// it was last prepared. Advisory only — never forces a rebuild.
    pub fn hash_descriptor(&self, desc: &AgentDescriptor) -> String {
        let env = self.build_env(desc);
        let mut keys: Vec<&String> = env.keys().collect();
        keys.sort();

        let mut hasher = Sha256::new();
        hasher.update(self.agent_dir(&desc.agent_id).to_string_lossy().as_bytes());
        for key in keys {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(env[key].as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Remove a worker's workspace directory. Best-effort — missing
    /// directories are not an error.
    pub async fn cleanup_workspace(&self, agent_id: &str) -> Result<()> {
        let dir = self.agent_dir(agent_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("removing native workspace"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp() -> PathBuf {
        std::env::temp_dir().join(format!("native-bridge-test-{}", uuid_like()))
    }

    fn uuid_like() -> String {
        format!("{:x}", std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos())
    }

    fn desc() -> AgentDescriptor {
        AgentDescriptor {
            agent_id: "w-1".into(),
            team_name: "fixers".into(),
            agent_name: "w-1".into(),
            agent_type: "fixer".into(),
            server_url: "http://localhost:4000".into(),
            swarm_id: Some("swarm-1".into()),
        }
    }

    #[test]
    fn unknown_binary_name_is_unavailable() {
        let bridge = NativeBridge::discover(tmp(), "definitely-not-a-real-binary-xyz");
        assert!(!bridge.is_available());
        assert!(bridge.should_fallback());
    }

    #[test]
    fn build_env_carries_required_keys() {
        let bridge = NativeBridge::discover(tmp(), "definitely-not-a-real-binary-xyz");
        let env = bridge.build_env(&desc());
        assert_eq!(env.get(env_keys::AGENT_ID).map(String::as_str), Some("w-1"));
        assert_eq!(env.get("FORCE_COLOR").map(String::as_str), Some("0"));
        assert_eq!(env.get(env_keys::SWARM_ID).map(String::as_str), Some("swarm-1"));
    }

    #[test]
    fn hash_is_stable_for_same_descriptor() {
        let dir = tmp();
        let bridge = NativeBridge::discover(&dir, "definitely-not-a-real-binary-xyz");
        let h1 = bridge.hash_descriptor(&desc());
        let h2 = bridge.hash_descriptor(&desc());
        assert_eq!(h1, h2);
    }

    #[test]
    fn hash_changes_when_descriptor_changes() {
        let dir = tmp();
        let bridge = NativeBridge::discover(&dir, "definitely-not-a-real-binary-xyz");
        let h1 = bridge.hash_descriptor(&desc());
        let mut other = desc();
        other.server_url = "http://localhost:5000".into();
        let h2 = bridge.hash_descriptor(&other);
        assert_ne!(h1, h2);
    }

    #[tokio::test]
    async fn prepare_workspace_creates_inbox_dir() {
        let dir = tmp();
        let bridge = NativeBridge::discover(&dir, "definitely-not-a-real-binary-xyz");
        let agent_dir = bridge.prepare_workspace("w-1").await.unwrap();
        assert!(agent_dir.exists());
        assert!(bridge.inbox_dir("w-1").exists());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn cleanup_on_missing_dir_is_not_an_error() {
        let dir = tmp();
        let bridge = NativeBridge::discover(&dir, "definitely-not-a-real-binary-xyz");
        bridge.cleanup_workspace("ghost").await.unwrap();
    }
}
