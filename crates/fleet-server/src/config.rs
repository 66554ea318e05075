use std::sync::OnceLock;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Shared secret clients present to `POST /auth` in exchange for a
    /// bearer token. Required — there is no anonymous-access mode.
    pub auth_secret: String,

    /// How long an issued bearer token remains valid.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_db_pool_size")]
    pub db_pool_size: u32,

    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: u64,
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_team_name")]
    pub default_team_name: String,
    #[serde(default = "default_auto_restart")]
    pub auto_restart: bool,
    #[serde(default)]
    pub use_worktrees: bool,
    #[serde(default = "default_worktree_base_dir")]
    pub worktree_base_dir: String,
    #[serde(default = "default_inject_mail")]
    pub inject_mail: bool,
    #[serde(default)]
    pub native_only: bool,
    #[serde(default = "default_native_base_dir")]
    pub native_base_dir: String,
    #[serde(default = "default_native_binary_name")]
    pub native_binary_name: String,
    #[serde(default = "default_worker_binary")]
    pub worker_binary: String,
    #[serde(default)]
    pub repo_root: Option<String>,
    #[serde(default)]
    pub idle_worker_timeout_secs: u64,

    #[serde(default = "default_inbox_base_dir")]
    pub inbox_base_dir: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:4000".to_string()
}
fn default_token_ttl_secs() -> u64 {
    86_400
}
fn default_db_pool_size() -> u32 {
    5
}
fn default_rate_limit_rps() -> u64 {
    20
}
fn default_rate_limit_burst() -> u32 {
    40
}
fn default_max_workers() -> usize {
    5
}
fn default_team_name() -> String {
    "fleet".to_string()
}
fn default_auto_restart() -> bool {
    true
}
fn default_worktree_base_dir() -> String {
    "/tmp/fleet-worktrees".to_string()
}
fn default_inject_mail() -> bool {
    true
}
fn default_native_base_dir() -> String {
    "/tmp/fleet-native".to_string()
}
fn default_native_binary_name() -> String {
    "claude-worker".to_string()
}
fn default_worker_binary() -> String {
    "claude".to_string()
}
fn default_inbox_base_dir() -> String {
    "/tmp/fleet-inbox".to_string()
}

static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Loads configuration once from environment variables prefixed `FLEET_`
/// (e.g. `FLEET_LISTEN_ADDR`, `FLEET_AUTH_SECRET`), caching the result for
/// the life of the process.
pub fn settings() -> &'static Settings {
    SETTINGS.get_or_init(|| {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("FLEET").try_parsing(true))
            .build()
            .expect("failed to build configuration")
            .try_deserialize()
            .expect("invalid configuration: check FLEET_* environment variables")
    })
}

impl Settings {
    pub fn manager_config(&self) -> worker_manager::ManagerConfig {
        worker_manager::ManagerConfig {
            max_workers: self.max_workers,
            default_team_name: self.default_team_name.clone(),
            server_url: format!("http://{}", self.listen_addr),
            auto_restart: self.auto_restart,
            use_worktrees: self.use_worktrees,
            worktree_base_dir: self.worktree_base_dir.clone(),
            inject_mail: self.inject_mail,
            spawn_controller: None,
            default_spawn_mode: worker_manager::SpawnMode::Process,
            native_only: self.native_only,
            idle_worker_timeout_secs: self.idle_worker_timeout_secs,
            native_base_dir: self.native_base_dir.clone(),
            native_binary_name: self.native_binary_name.clone(),
            worker_binary: self.worker_binary.clone(),
            repo_root: self.repo_root.clone(),
        }
    }
}
