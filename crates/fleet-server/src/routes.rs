//! Route handlers implementing the HTTP contract of the core: health,
//! auth, worker orchestration, and blackboard read/write. Every
//! protected handler starts with `auth::require_bearer` — there is no
//! tower auth layer because `/health`, `/auth`, and `/metrics` must stay
//! reachable without one.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use blackboard::{MessageType, Priority, ReadOptions};
use serde::{Deserialize, Serialize};
use serde_json::json;
use worker_manager::{SpawnMode, SpawnRequest};

use crate::auth::require_bearer;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> Response {
    if state.health().await {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "database unavailable").into_response()
    }
}

#[derive(Deserialize)]
pub struct SpawnBody {
    pub handle: String,
    #[serde(alias = "initialPrompt", alias = "task")]
    pub prompt: Option<String>,
    pub role: Option<String>,
    #[serde(alias = "teamName", alias = "team")]
    pub team_name: Option<String>,
    #[serde(alias = "workingDir")]
    pub working_dir: Option<String>,
    #[serde(alias = "spawnMode")]
    pub spawn_mode: Option<String>,
    #[serde(alias = "swarmId")]
    pub swarm_id: Option<String>,
    #[serde(alias = "sessionId")]
    pub session_id: Option<String>,
    #[serde(alias = "depthLevel")]
    pub depth_level: Option<i32>,
    pub model: Option<String>,
}

pub async fn spawn_worker(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SpawnBody>,
) -> Result<Response, Response> {
    require_bearer(&headers, &state)?;

    if body.handle.trim().is_empty() {
        return Err(ApiError::Validation("handle must not be empty".into()).into_response());
    }

    let spawn_mode = match body.spawn_mode.as_deref() {
        Some(s) => match SpawnMode::parse(s) {
            Some(m) => Some(m),
            None => return Err(ApiError::Validation(format!("unknown spawnMode '{s}'")).into_response()),
        },
        None => None,
    };

    let req = SpawnRequest {
        handle: body.handle,
        team_name: body.team_name,
        working_dir: body.working_dir,
        session_id: body.session_id,
        initial_prompt: body.prompt,
        role: body.role,
        model: body.model,
        spawn_mode,
        swarm_id: body.swarm_id,
        depth_level: body.depth_level,
    };

    let summary = state.workers.spawn_worker(req).await.map_err(|e| ApiError::from(e).into_response())?;
    Ok(Json(summary).into_response())
}

pub async fn dismiss_worker(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(handle): Path<String>,
) -> Result<Response, Response> {
    require_bearer(&headers, &state)?;
    state.workers.dismiss_worker_by_handle(&handle, true).await;
    Ok(Json(json!({ "ok": true })).into_response())
}

#[derive(Deserialize)]
pub struct SendBody {
    #[serde(alias = "text")]
    pub message: String,
}

pub async fn send_to_worker(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(handle): Path<String>,
    Json(body): Json<SendBody>,
) -> Result<Response, Response> {
    require_bearer(&headers, &state)?;
    let Some(summary) = state.workers.get_worker_by_handle(&handle) else {
        return Err(ApiError::NotFound(format!("no worker with handle '{handle}'")).into_response());
    };
    let delivered = state.workers.send_to_worker(&summary.id, &body.message).await;
    Ok(Json(json!({ "delivered": delivered })).into_response())
}

pub async fn worker_output(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(handle): Path<String>,
) -> Result<Response, Response> {
    require_bearer(&headers, &state)?;
    let Some(summary) = state.workers.get_worker_by_handle(&handle) else {
        return Err(ApiError::NotFound(format!("no worker with handle '{handle}'")).into_response());
    };
    let lines = state.workers.get_worker_output(&summary.id);
    Ok(Json(json!({ "lines": lines })).into_response())
}

#[derive(Deserialize)]
pub struct BlackboardPostBody {
    #[serde(alias = "swarmId")]
    pub swarm_id: String,
    #[serde(alias = "senderHandle", alias = "sender")]
    pub sender_handle: String,
    #[serde(alias = "messageType")]
    pub message_type: String,
    #[serde(alias = "content")]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(alias = "targetHandle")]
    pub target_handle: Option<String>,
}

fn parse_message_type(s: &str) -> Result<MessageType, Response> {
    match s {
        "request" => Ok(MessageType::Request),
        "response" => Ok(MessageType::Response),
        "status" => Ok(MessageType::Status),
        "directive" => Ok(MessageType::Directive),
        "checkpoint" => Ok(MessageType::Checkpoint),
        other => Err(ApiError::Validation(format!("unknown messageType '{other}'")).into_response()),
    }
}

fn parse_priority(s: &str) -> Result<Priority, Response> {
    match s {
        "low" => Ok(Priority::Low),
        "normal" => Ok(Priority::Normal),
        "high" => Ok(Priority::High),
        "critical" => Ok(Priority::Critical),
        other => Err(ApiError::Validation(format!("unknown priority '{other}'")).into_response()),
    }
}

pub async fn post_blackboard_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BlackboardPostBody>,
) -> Result<Response, Response> {
    require_bearer(&headers, &state)?;
    let Some(bb) = &state.blackboard else {
        return Err(ApiError::Validation("no durable blackboard configured on this server".into()).into_response());
    };

    let message_type = parse_message_type(&body.message_type)?;
    let priority = match body.priority.as_deref() {
        Some(p) => parse_priority(p)?,
        None => Priority::Normal,
    };

    let message = bb
        .post_message(&body.swarm_id, &body.sender_handle, message_type, body.payload, body.target_handle, priority)
        .await
        .map_err(|e| ApiError::from(e).into_response())?;

    Ok(Json(message).into_response())
}

#[derive(Deserialize)]
pub struct BlackboardQuery {
    #[serde(rename = "messageType")]
    message_type: Option<String>,
    priority: Option<String>,
    #[serde(rename = "unreadOnly", default)]
    unread_only: bool,
    #[serde(rename = "readerHandle")]
    reader_handle: Option<String>,
    #[serde(rename = "targetHandle")]
    target_handle: Option<String>,
    limit: Option<i64>,
}

pub async fn read_blackboard(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(swarm_id): Path<String>,
    Query(q): Query<BlackboardQuery>,
) -> Result<Response, Response> {
    require_bearer(&headers, &state)?;
    let Some(bb) = &state.blackboard else {
        return Err(ApiError::Validation("no durable blackboard configured on this server".into()).into_response());
    };

    let message_type = q.message_type.as_deref().map(parse_message_type).transpose()?;
    let priority = q.priority.as_deref().map(parse_priority).transpose()?;

    let mut opts = ReadOptions::new();
    opts.message_type = message_type;
    opts.priority = priority;
    opts.unread_only = q.unread_only;
    opts.reader_handle = q.reader_handle;
    opts.target_handle = q.target_handle;
    if let Some(limit) = q.limit {
        opts.limit = limit;
    }

    let messages = bb.read_messages(&swarm_id, &opts).await.map_err(|e| ApiError::from(e).into_response())?;
    Ok(Json(messages).into_response())
}

#[derive(Serialize)]
pub struct FleetStats {
    pub workers: worker_manager::HealthStats,
    pub restarts: worker_manager::RestartStats,
    pub bus: message_bus::BusStats,
}

pub async fn fleet_stats(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, Response> {
    require_bearer(&headers, &state)?;
    let stats = FleetStats {
        workers: state.workers.get_health_stats(),
        restarts: state.workers.get_restart_stats().await,
        bus: state.workers.bus().stats(),
    };
    Ok(Json(stats).into_response())
}
