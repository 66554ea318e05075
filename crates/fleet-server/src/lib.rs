//! The external I/O surface: HTTP + WebSocket glue around
//! [`worker_manager::WorkerManager`] and [`blackboard::Blackboard`].
//! Everything here is thin — the components it wires together own all
//! the actual state machines and invariants.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;

pub use state::AppState;

pub fn build_router(state: AppState, rate_limiter: common::rate_limit::RateLimitLayer, prometheus_handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/health", get(routes::health_check))
        .route("/metrics", get(move || { let handle = prometheus_handle.clone(); async move { handle.render() } }))
        .route("/auth", post(auth::auth_handler))
        .route("/orchestrate/spawn", post(routes::spawn_worker))
        .route("/orchestrate/dismiss/{handle}", post(routes::dismiss_worker))
        .route("/orchestrate/send/{handle}", post(routes::send_to_worker))
        .route("/orchestrate/output/{handle}", get(routes::worker_output))
        .route("/blackboard", post(routes::post_blackboard_message))
        .route("/blackboard/{swarmId}", get(routes::read_blackboard))
        .route("/stats", get(routes::fleet_stats))
        .route("/ws", get(ws::worker_events_ws))
        .layer(rate_limiter)
        .with_state(state)
}
