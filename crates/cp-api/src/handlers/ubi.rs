//! /cp/ubi handlers: task intake, settlement callbacks, and task queries.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use cp_core::{Job, TaskId, TaskSpec, TaskStatus};
use cp_services::{SettlementEvent, TaskView};

use super::{api_error, bad_request, ApiError, ApiState};

// ── /cp/ubi (POST) ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ReceiveTaskResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

pub async fn handle_receive_task(
    State(state): State<ApiState>,
    Json(spec): Json<TaskSpec>,
) -> Result<Json<ReceiveTaskResponse>, ApiError> {
    let orch = &state.orchestrator;
    let task_id = orch.receive_task(spec).map_err(api_error)?;
    let view = orch.get_task(task_id).map_err(api_error)?;
    Ok(Json(ReceiveTaskResponse {
        task_id,
        status: view.task.status,
    }))
}

// ── /cp/docker/receive/ubi (POST) ─────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct ProofCallback {
    pub tx_hash: String,
    #[serde(flatten)]
    pub event: SettlementEvent,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProofCallbackResponse {
    pub task_id: TaskId,
    /// False when the event was a replay of the recorded state.
    pub applied: bool,
}

pub async fn handle_proof_callback(
    State(state): State<ApiState>,
    Json(cb): Json<ProofCallback>,
) -> Result<Json<ProofCallbackResponse>, ApiError> {
    let orch = &state.orchestrator;
    let task = orch
        .ledger()
        .task_by_tx_hash(&cb.tx_hash)
        .map_err(|e| api_error(e.into()))?;
    let applied = orch
        .receive_proof_callback(&cb.tx_hash, cb.event)
        .map_err(api_error)?;
    Ok(Json(ProofCallbackResponse {
        task_id: task.id,
        applied,
    }))
}

// ── /cp/ubi/tasks (GET) ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    /// Include every status, not only SUCCESS.
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskView>,
}

pub async fn handle_list_tasks(
    State(state): State<ApiState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let filter = match q.status.as_deref() {
        Some(raw) => Some(
            raw.parse::<TaskStatus>()
                .map_err(|e| bad_request(e.to_string()))?,
        ),
        None if q.all => None,
        None => Some(TaskStatus::Success),
    };
    let tasks = state.orchestrator.list_tasks(filter).map_err(api_error)?;
    Ok(Json(TaskListResponse { tasks }))
}

// ── /cp/ubi/tasks/{id} (GET) ──────────────────────────────────────────────────

pub async fn handle_get_task(
    State(state): State<ApiState>,
    Path(id): Path<TaskId>,
) -> Result<Json<TaskView>, ApiError> {
    state.orchestrator.get_task(id).map(Json).map_err(api_error)
}

// ── /cp/ubi/tasks/{id}/jobs (GET) ─────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct JobsResponse {
    pub task_id: TaskId,
    pub jobs: Vec<Job>,
}

pub async fn handle_task_jobs(
    State(state): State<ApiState>,
    Path(id): Path<TaskId>,
) -> Result<Json<JobsResponse>, ApiError> {
    let jobs = state.orchestrator.jobs(id).map_err(api_error)?;
    Ok(Json(JobsResponse { task_id: id, jobs }))
}

// ── /cp/ubi/tasks/{id}/cancel (POST) ──────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub task_id: TaskId,
    /// False when the task had already finished.
    pub cancelled: bool,
}

pub async fn handle_cancel_task(
    State(state): State<ApiState>,
    Path(id): Path<TaskId>,
) -> Result<Json<CancelResponse>, ApiError> {
    let cancelled = state.orchestrator.cancel(id).map_err(api_error)?;
    Ok(Json(CancelResponse {
        task_id: id,
        cancelled,
    }))
}
