//! Owns the worker lifecycle: spawn, dismiss, health monitoring, output
//! capture, and the routing heuristic used to place new tasks. Builds on
//! [`log_parser`] for NDJSON decoding, [`message_bus`]/[`blackboard`] for
//! inter-worker messaging, [`inbox_bridge`] for pending mail, and
//! [`native_bridge`] for the native spawn mode.

mod config;
mod error;
mod manager;
mod prompt;
mod routing;
mod types;

pub use config::{ManagerConfig, SpawnController, SpawnDecision};
pub use error::WorkerManagerError;
pub use manager::WorkerManager;
pub use types::{
    Health, HealthStats, RestartStats, RoutingRecommendation, SpawnMode, SpawnRequest,
    TaskRequest, WorkerEvent, WorkerState, WorkerSummary,
};
