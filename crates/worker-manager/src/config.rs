use crate::types::SpawnMode;
use std::sync::Arc;

/// Outcome of asking a [`SpawnController`] whether spawning is allowed
/// for a given `(role, depth)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnDecision {
    Allowed,
    AllowedWithWarning(String),
    Denied(String),
}

/// A pluggable policy hook consulted on every spawn. The default
/// configuration carries none, in which case spawning is always allowed.
pub trait SpawnController: Send + Sync {
    fn check_spawn(&self, role: &str, depth_level: i32) -> SpawnDecision;
    /// Called once a spawn succeeds, so the controller can update its own
    /// bookkeeping (e.g. per-team quotas).
    fn register(&self, _handle: &str, _role: &str, _depth_level: i32) {}
}

#[derive(Clone)]
pub struct ManagerConfig {
    pub max_workers: usize,
    pub default_team_name: String,
    pub server_url: String,
    pub auto_restart: bool,
    pub use_worktrees: bool,
    pub worktree_base_dir: String,
    pub inject_mail: bool,
    pub spawn_controller: Option<Arc<dyn SpawnController>>,
    pub default_spawn_mode: SpawnMode,
    pub native_only: bool,
    /// Ambient addition (§2.2 of the expanded spec): workers `ready` with
    /// no `current_task_id` for longer than this are dismissed
    /// automatically. 0 disables idle teardown.
    pub idle_worker_timeout_secs: u64,
    /// Base directory for per-agent native workspaces / inboxes.
    pub native_base_dir: String,
    /// Name of the native worker binary to probe for on `PATH`.
    pub native_binary_name: String,
    /// Name of the process-mode worker binary (e.g. `claude`).
    pub worker_binary: String,
    /// Git repo worktrees are allocated from. `use_worktrees` is a no-op
    /// without this set, since there is no repo to branch from.
    pub repo_root: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            default_team_name: "fleet".to_string(),
            server_url: "http://127.0.0.1:4000".to_string(),
            auto_restart: true,
            use_worktrees: false,
            worktree_base_dir: "/tmp/fleet-worktrees".to_string(),
            inject_mail: true,
            spawn_controller: None,
            default_spawn_mode: SpawnMode::Process,
            native_only: false,
            idle_worker_timeout_secs: 0,
            native_base_dir: "/tmp/fleet-native".to_string(),
            native_binary_name: "claude-worker".to_string(),
            worker_binary: "claude".to_string(),
            repo_root: None,
        }
    }
}
