//! HTTP API handlers: the orchestrator's operations as JSON.

pub mod cp;
pub mod ubi;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use cp_services::{EngineError, LedgerError, Orchestrator, ProviderError};

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Orchestrator,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

pub(crate) fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { error: msg.into() }))
}

/// Map a provider error onto a status code.
pub(crate) fn api_error(e: ProviderError) -> ApiError {
    let status = match &e {
        ProviderError::Validation(_) => StatusCode::BAD_REQUEST,
        ProviderError::Ledger(LedgerError::NotFound(_) | LedgerError::UnknownTx(_)) => {
            StatusCode::NOT_FOUND
        }
        ProviderError::Ledger(
            LedgerError::DuplicateTask(_)
            | LedgerError::Conflict { .. }
            | LedgerError::ActiveJob(_)
            | LedgerError::ProofRetained(_)
            | LedgerError::InvalidTransition { .. }
            | LedgerError::ProofMismatch { .. },
        )
        | ProviderError::Engine(EngineError::AlreadyRunning(_)) => StatusCode::CONFLICT,
        ProviderError::Engine(EngineError::Busy) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %e, "request failed");
    }
    (status, Json(ErrorBody { error: e.to_string() }))
}

pub use cp::handle_cp_resources;
pub use ubi::{
    handle_cancel_task, handle_get_task, handle_list_tasks, handle_proof_callback,
    handle_receive_task, handle_task_jobs,
};
