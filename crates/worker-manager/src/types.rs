use serde::{Deserialize, Serialize};

pub const MAX_RESTART_ATTEMPTS: u32 = 3;
pub const RECENT_OUTPUT_CAPACITY: usize = 100;

/// Captured tmux pane text beyond this size is treated as "approaching
/// the worker's context window", triggering a rollover to a fresh pane.
pub const TMUX_ROLLOVER_BYTES: usize = 400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpawnMode {
    Process,
    Native,
    Tmux,
    External,
}

impl SpawnMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SpawnMode::Process => "process",
            SpawnMode::Native => "native",
            SpawnMode::Tmux => "tmux",
            SpawnMode::External => "external",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "process" => Some(SpawnMode::Process),
            "native" => Some(SpawnMode::Native),
            "tmux" => Some(SpawnMode::Tmux),
            "external" => Some(SpawnMode::External),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Starting,
    Ready,
    Working,
    Stopping,
    Stopped,
    Error,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Starting => "starting",
            WorkerState::Ready => "ready",
            WorkerState::Working => "working",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
            WorkerState::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

impl Health {
    pub fn as_str(self) -> &'static str {
        match self {
            Health::Healthy => "healthy",
            Health::Degraded => "degraded",
            Health::Unhealthy => "unhealthy",
        }
    }
}

/// Request body for [`crate::WorkerManager::spawn_worker`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpawnRequest {
    pub handle: String,
    pub team_name: Option<String>,
    pub working_dir: Option<String>,
    pub session_id: Option<String>,
    pub initial_prompt: Option<String>,
    pub role: Option<String>,
    pub model: Option<String>,
    pub spawn_mode: Option<SpawnMode>,
    pub swarm_id: Option<String>,
    pub depth_level: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskRequest {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
}

/// Public-facing snapshot of a worker's record. This, not the internal
/// process handle, is what callers outside this crate ever see.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    pub id: String,
    pub handle: String,
    pub team_name: String,
    pub role: String,
    pub swarm_id: Option<String>,
    pub depth_level: i32,
    pub spawn_mode: SpawnMode,
    pub state: WorkerState,
    pub health: Health,
    pub working_dir: String,
    pub worktree_path: Option<String>,
    pub worktree_branch: Option<String>,
    pub session_id: Option<String>,
    pub last_heartbeat: i64,
    pub spawned_at: i64,
    pub restart_count: u32,
    pub current_task_id: Option<String>,
    pub pane_id: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct HealthStats {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RestartStats {
    pub total: usize,
    pub last_hour: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutingRecommendation {
    pub complexity: &'static str,
    pub strategy: &'static str,
    pub model: &'static str,
    pub confidence: f32,
}

/// Events the manager broadcasts to any subscriber (the HTTP/WebSocket
/// surface is the main consumer, but nothing in this crate depends on
/// that layer existing).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerEvent {
    Spawned { id: String, handle: String },
    Ready { id: String, handle: String },
    Output { id: String, handle: String, event: log_parser::Event },
    Result { id: String, handle: String, text: Option<String>, duration_ms: Option<u64> },
    Error { id: String, handle: String, message: String },
    Unhealthy { id: String, handle: String },
    Exit { id: String, handle: String, code: Option<i32> },
    Dismissed { id: String, handle: String },
    Rollover { id: String, handle: String, new_pane_id: String },
}
